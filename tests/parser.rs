//! Parser tree shapes and error tests.

mod common;

use common::tree;
use pugneum::ast::Node;
use pugneum::{AttrValue, BlockMode, LexOptions, ParseError, ParseOptions, lex, parse};

fn parse_err(src: &str) -> ParseError {
    let tokens = lex(src, &LexOptions::new()).expect("tokenize");
    parse(&tokens, &ParseOptions::new().src(src)).expect_err("should fail to parse")
}

/// Type names of every node in document order.
fn shape(src: &str) -> Vec<&'static str> {
    let block = tree(src);
    let mut out = Vec::new();
    block.walk(&mut |node| out.push(node.type_name()));
    out
}

// -----------------------------------------------------------
// Tree shapes.
// -----------------------------------------------------------

#[test]
fn parse_document() {
    let src = "doctype html\nhtml\n  head\n    title Hi\n  body\n    p.lead(data-x='1') text\n";
    let block = tree(src);
    assert!(matches!(&block.nodes[0], Node::Doctype(d) if d.val == "html"));

    let mut tags = Vec::new();
    block.walk(&mut |node| {
        if let Node::Tag(tag) = node {
            tags.push(tag.name.as_str());
        }
    });
    assert_eq!(tags, ["html", "head", "title", "body", "p"]);
}

#[test]
fn parse_attribute_escaping() {
    let block = tree("p.lead(data-x='1' hidden)");
    let Node::Tag(p) = &block.nodes[0] else {
        panic!("expected tag");
    };
    let attrs: Vec<_> = p
        .attrs
        .iter()
        .map(|a| (a.name.as_str(), a.val.clone(), a.must_escape))
        .collect();
    assert_eq!(attrs, [
        ("class", AttrValue::from("lead"), false),
        ("data-x", AttrValue::from("1"), true),
        ("hidden", AttrValue::True, true),
    ]);
}

#[test]
fn parse_spans_carry_filename() {
    let src = "div\n  p one\n  p two";
    let tokens = lex(src, &LexOptions::new()).expect("tokenize");
    let block = parse(&tokens, &ParseOptions::new().filename("page.pg")).expect("parse");
    assert_eq!(block.span.file.as_deref(), Some("page.pg"));
    let mut lines = Vec::new();
    block.walk(&mut |node| {
        assert_eq!(node.span().file.as_deref(), Some("page.pg"));
        lines.push(node.span().line);
    });
    assert_eq!(lines, [1, 2, 2, 3, 3]);
}

#[test]
fn parse_inline_interpolation() {
    let block = tree("p Hello #{name}, #[strong welcome]!");
    let Node::Tag(p) = &block.nodes[0] else {
        panic!("expected tag");
    };
    let kinds: Vec<_> = p.block.nodes.iter().map(Node::type_name).collect();
    assert_eq!(kinds, ["Text", "Code", "Text", "Tag", "Text"]);
}

#[test]
fn parse_html_passthrough() {
    assert_eq!(shape("<ul>\n  li a\n</ul>"), ["Text", "Tag", "Text", "Text"]);
    let block = tree("<ul>\n  li a\n</ul>");
    assert!(matches!(&block.nodes[2], Node::Text(t) if t.is_html && t.val == "</ul>"));
}

#[test]
fn parse_mixin_declaration_and_calls() {
    let block = tree("mixin item(label)\n  li #{label}\nul\n  +item('one')\n  +item('two')");
    let Node::Mixin(decl) = &block.nodes[0] else {
        panic!("expected mixin");
    };
    assert!(!decl.call);
    assert_eq!(decl.args.as_deref(), Some("label"));

    let Node::Tag(ul) = &block.nodes[1] else {
        panic!("expected tag");
    };
    let calls: Vec<_> = ul
        .block
        .nodes
        .iter()
        .filter_map(|n| match n {
            Node::Mixin(m) if m.call => m.args.as_deref(),
            _ => None,
        })
        .collect();
    assert_eq!(calls, ["'one'", "'two'"]);
}

#[test]
fn parse_mixin_block_placeholder() {
    let block = tree("mixin box\n  div\n    block\n+box\n  p inner");
    assert!(block.nodes[0].children().is_some_and(|c| {
        matches!(&c[0], Node::Tag(div) if matches!(div.block.nodes[0], Node::MixinBlock(_)))
    }));
    let Node::Mixin(call) = &block.nodes[1] else {
        panic!("expected call");
    };
    assert_eq!(call.block.as_ref().map(|b| b.nodes.len()), Some(1));
}

#[test]
fn parse_inheritance() {
    let block = tree(
        "extends layout.pg\nblock prepend head\n  meta(charset='utf-8')\nappend body\n  p x",
    );
    assert!(matches!(&block.nodes[0], Node::Extends(e) if e.file.path == "layout.pg"));
    let blocks: Vec<_> = block.nodes[1..]
        .iter()
        .filter_map(|n| match n {
            Node::NamedBlock(b) => Some((b.name.as_str(), b.mode, b.nodes.len())),
            _ => None,
        })
        .collect();
    assert_eq!(blocks, [
        ("head", BlockMode::Prepend, 1),
        ("body", BlockMode::Append, 1),
    ]);
}

#[test]
fn parse_include_filters_with_options() {
    let block = tree("include:md(flavor='gfm') notes.md");
    let Node::RawInclude(raw) = &block.nodes[0] else {
        panic!("expected raw include");
    };
    assert_eq!(raw.file.path, "notes.md");
    assert_eq!(raw.filters[0].name, "md");
    assert_eq!(raw.filters[0].attrs[0].name, "flavor");
    assert!(raw.file.contents.is_none());
}

#[test]
fn parse_include_with_yield_body() {
    let block = tree("include card.pg\n  p body");
    let Node::Include(include) = &block.nodes[0] else {
        panic!("expected include");
    };
    assert_eq!(include.file.path, "card.pg");
    assert_eq!(include.block.nodes.len(), 1);
}

#[test]
fn parse_filter_body_is_text() {
    assert_eq!(shape(":markdown\n  # hi\n  there"), [
        "Filter", "Text", "Text", "Text"
    ]);
}

#[test]
fn parse_tree_serializes_with_type_tags() {
    let value = serde_json::to_value(tree("p(title='x') hi")).expect("serialize");
    assert_eq!(value["nodes"][0]["type"], "Tag");
    assert_eq!(value["nodes"][0]["name"], "p");
    assert_eq!(value["nodes"][0]["attrs"][0]["mustEscape"], true);
    assert_eq!(value["nodes"][0]["block"]["nodes"][0]["val"], "hi");
}

// -----------------------------------------------------------
// Errors.
// -----------------------------------------------------------

#[test]
fn parse_error_codes() {
    let cases = [
        ("p#a#b", "PUGNEUM:DUPLICATE_ID"),
        ("a(x='1' x='2')", "PUGNEUM:DUPLICATE_ATTRIBUTE"),
        ("mixin m", "PUGNEUM:MIXIN_WITHOUT_BODY"),
        ("p\n  block", "PUGNEUM:BLOCK_OUTSIDE_MIXIN"),
        ("include style.css\n  p", "PUGNEUM:RAW_INCLUDE_BLOCK"),
        ("/", "PUGNEUM:INVALID_TOKEN"),
        ("+m/", "PUGNEUM:INVALID_TOKEN"),
    ];
    for (src, code) in cases {
        assert_eq!(parse_err(src).code(), code, "source: {src:?}");
    }
}

#[test]
fn parse_error_location() {
    let err = parse_err("div\n  p\n  a(x='1' x='2')");
    assert_eq!((err.span.line, err.span.column), (3, 11));
    assert_eq!(err.msg(), "Duplicate attribute \"x\" is not allowed.");
    assert!(err.to_string().starts_with("3:11\n"));
}
