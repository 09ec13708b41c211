//! Template inheritance and inclusion across files.

mod common;

use common::{Files, body, tree};
use pretty_assertions::assert_eq;
use pugneum::{FilterSet, link};

fn render(files: &Files, entry: &str) -> String {
    let out = files
        .render(entry, &FilterSet::new())
        .unwrap_or_else(|e| panic!("render failed:\n{e}"));
    body(&out).to_string()
}

#[test]
fn linker_removes_inheritance_nodes() {
    let files = Files::new(&[
        ("root/layout.pg", "html\n  include head.pg\n  body\n    block content\n"),
        ("root/head.pg", "head\n  block title\n    title Default\n"),
        (
            "root/page.pg",
            "extends layout.pg\nblock title\n  title Custom\nblock content\n  p x\n",
        ),
    ]);
    let linked = files.link("root/page.pg").expect("link");
    let mut leftovers = Vec::new();
    linked.walk(&mut |node| {
        if matches!(node.type_name(), "NamedBlock" | "Extends" | "Include") {
            leftovers.push(node.type_name());
        }
    });
    assert!(leftovers.is_empty(), "unlinked nodes: {leftovers:?}");
    assert_eq!(
        render(&files, "root/page.pg"),
        "<html><head><title>Custom</title></head><body><p>x</p></body></html>"
    );
}

#[test]
fn linker_prepend_and_append_stack() {
    let files = Files::new(&[
        ("root/layout.pg", "ul\n  block items\n    li b\n"),
        (
            "root/page.pg",
            "extends layout.pg\nprepend items\n  li a\nappend items\n  li c\n",
        ),
    ]);
    assert_eq!(
        render(&files, "root/page.pg"),
        "<ul><li>a</li><li>b</li><li>c</li></ul>"
    );
}

#[test]
fn linker_nested_block_override() {
    let files = Files::new(&[
        (
            "root/layout.pg",
            "block outer\n  div\n    block inner\n      p default\n",
        ),
        ("root/page.pg", "extends layout.pg\nblock inner\n  p custom\n"),
    ]);
    assert_eq!(render(&files, "root/page.pg"), "<div><p>custom</p></div>");
}

#[test]
fn linker_mixins_declared_before_blocks() {
    let files = Files::new(&[
        ("root/layout.pg", "body\n  block content\n"),
        (
            "root/page.pg",
            "extends layout.pg\nblock content\n  +hi('Bo')\nmixin hi(name)\n  p Hi #{name}\n",
        ),
    ]);
    assert_eq!(render(&files, "root/page.pg"), "<body><p>Hi Bo</p></body>");
}

#[test]
fn linker_include_inside_block() {
    let files = Files::new(&[
        ("root/layout.pg", "body\n  block content\n"),
        ("root/page.pg", "extends layout.pg\nblock content\n  include part.pg\n"),
        ("root/part.pg", "em part\n"),
    ]);
    assert_eq!(render(&files, "root/page.pg"), "<body><em>part</em></body>");
}

#[test]
fn linker_included_file_may_extend() {
    let files = Files::new(&[
        ("root/index.pg", "div\n  include widget.pg\n"),
        ("root/widget.pg", "extends frame.pg\nblock inner\n  p w\n"),
        ("root/frame.pg", "section\n  block inner\n"),
    ]);
    assert_eq!(
        render(&files, "root/index.pg"),
        "<div><section><p>w</p></section></div>"
    );
}

#[test]
fn linker_unloaded_extends() {
    let err = link(tree("extends layout.pg\n")).expect_err("should fail");
    assert_eq!(err.code(), "PUGNEUM:UNLOADED_FILE");
    assert_eq!(err.msg(), "the file \"layout.pg\" has not been loaded");
}
