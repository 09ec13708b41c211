//! Rendering of linked, filtered trees built by hand.

mod common;

use common::{body, tree};
use pretty_assertions::assert_eq;
use pugneum::ast::{Code, Filter, Mixin, NamedBlock, Tag};
use pugneum::render::escape_html;
use pugneum::{Block, BlockMode, RenderErrorKind, RenderOptions, render};

fn html(tree: &Block, options: &RenderOptions) -> String {
    let out = render(tree, options).unwrap_or_else(|e| panic!("render failed:\n{e}"));
    body(&out).to_string()
}

fn kind(tree: &Block, options: &RenderOptions) -> RenderErrorKind {
    render(tree, options).expect_err("should fail").kind
}

#[test]
fn render_built_tree() {
    let menu = Block::new().node(
        Tag::new("ul")
            .class("menu")
            .child(Tag::new("li").text("a"))
            .child(Tag::new("li").attr("data-n", "1 < 2").flag("hidden").text("b")),
    );
    assert_eq!(
        html(&menu, &RenderOptions::new()),
        "<ul class=\"menu\"><li>a</li><li data-n=\"1 &lt; 2\" hidden>b</li></ul>"
    );
}

#[test]
fn render_always_starts_with_doctype() {
    let out = render(&Block::new(), &RenderOptions::new()).expect("render");
    assert_eq!(out, "<!DOCTYPE html>");
    let out = render(&tree("doctype xml\np"), &RenderOptions::new()).expect("render");
    assert_eq!(out, "<!DOCTYPE html><p></p>");
}

#[test]
fn render_void_elements() {
    let ok = Block::new()
        .node(Tag::new("img").attr("src", "a.png").text("  "))
        .node(Tag::new("custom").self_closing());
    assert_eq!(
        html(&ok, &RenderOptions::new()),
        "<img src=\"a.png\"><custom>"
    );

    let bad = Block::new().node(Tag::new("br").text("x"));
    let err = render(&bad, &RenderOptions::new()).expect_err("void with content");
    assert_eq!(err.code(), "PUGNEUM:VOID_ELEMENT_WITH_CONTENT");
    assert_eq!(
        err.msg(),
        "br is a self closing element: <br> but contains nested content"
    );
}

#[test]
fn render_block_comment() {
    assert_eq!(
        html(&tree("//\n  p x\n//-\n  p y\n"), &RenderOptions::new()),
        "<!--p x-->"
    );
}

#[test]
fn render_globals_shadowed_by_parameters() {
    let doc = Block::new()
        .node(Mixin::declare("show", Some("x")).child(Code::variable("x")))
        .node(Mixin::call("show", Some("'inner'")))
        .node(Code::variable("x"));
    let options = RenderOptions::new().global("x", "outer");
    assert_eq!(html(&doc, &options), "innerouter");
}

#[test]
fn render_unescaped_code() {
    let doc = Block::new()
        .node(Code::variable("v"))
        .node(Code::variable("v").unescaped());
    let options = RenderOptions::new().global("v", "<i>");
    assert_eq!(html(&doc, &options), "&lt;i&gt;<i>");
}

#[test]
fn render_mixin_errors() {
    let options = RenderOptions::new();
    let declare = Mixin::declare("m", Some("a, b"));

    let doc = Block::new()
        .node(declare.clone())
        .node(Mixin::call("m", Some("'x'")));
    assert_eq!(kind(&doc, &options), RenderErrorKind::ArgumentCountMismatch {
        name: "m".into(),
        expected: 2,
        found: 1,
    });

    let doc = Block::new()
        .node(declare)
        .node(Mixin::call("m", Some("a + b, 'y'")));
    assert_eq!(kind(&doc, &options), RenderErrorKind::InvalidArgument {
        arg: "a + b".into()
    });

    let doc = Block::new().node(Mixin::declare("bad", Some("1x")));
    assert_eq!(kind(&doc, &options), RenderErrorKind::InvalidParameter {
        param: "1x".into()
    });

    let doc = Block::new().node(Code::variable("nope"));
    assert_eq!(kind(&doc, &options), RenderErrorKind::UndefinedVariable {
        name: "nope".into()
    });
}

#[test]
fn render_recursion_limit() {
    let doc = Block::new()
        .node(Mixin::declare("again", None).child(Mixin::call("again", None)))
        .node(Mixin::call("again", None));
    let options = RenderOptions::new().max_mixin_depth(8);
    let err = render(&doc, &options).expect_err("runaway recursion");
    assert_eq!(err.kind, RenderErrorKind::RecursionLimit { limit: 8 });
    assert_eq!(err.code(), "PUGNEUM:MIXIN_RECURSION_LIMIT");
}

#[test]
fn render_rejects_unprocessed_nodes() {
    let options = RenderOptions::new();
    let err = render(&Block::new().node(Filter::new("md", "x")), &options).expect_err("filter");
    assert!(err.msg().ends_with("; apply filters first"), "{}", err.msg());

    let block = NamedBlock::new("content", BlockMode::Replace);
    let err = render(&Block::new().node(block), &options).expect_err("named block");
    assert_eq!(err.code(), "PUGNEUM:UNSUPPORTED_NODE");
    assert!(err.msg().ends_with("; link the tree first"), "{}", err.msg());
}

#[test]
fn render_escapes_html() {
    assert_eq!(
        escape_html("<a href=\"x\">&</a>"),
        "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;"
    );
    assert_eq!(escape_html("it's"), "it's");
}
