//! Property-based tests with proptest.
//!
//! Generate random element trees, print them as indented source, and
//! check that the lexer balances indentation and that rendering reproduces
//! the tree. Block merging is checked against its list laws.

mod common;

use pugneum::ast::{Node, Text};
use pugneum::linker::merge_nodes;
use pugneum::{BlockMode, Options, render_str};
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct Element {
    name: String,
    text: Option<String>,
    children: Vec<Element>,
}

impl Element {
    fn source(&self, depth: usize, out: &mut String) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&self.name);
        if let Some(text) = &self.text {
            out.push(' ');
            out.push_str(text);
        }
        out.push('\n');
        for child in &self.children {
            child.source(depth + 1, out);
        }
    }

    fn html(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        out.push('>');
        if let Some(text) = &self.text {
            out.push_str(text);
        }
        for child in &self.children {
            child.html(out);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

// -- Leaf strategies --

/// Tag names starting with `x` never collide with keywords or void elements.
fn tag_name() -> impl Strategy<Value = String> {
    "x[a-z0-9]{0,6}"
}

/// Inline text without interpolation markers.
fn text() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9][a-zA-Z0-9 ,.?]{0,19}"
}

fn element(depth: u32) -> impl Strategy<Value = Element> {
    let leaf = (tag_name(), prop::option::of(text())).prop_map(|(name, text)| Element {
        name,
        text,
        children: Vec::new(),
    });
    if depth == 0 {
        return leaf.boxed();
    }
    let nested = (
        tag_name(),
        prop::option::of(text()),
        prop::collection::vec(element(depth - 1), 1..=3),
    )
        .prop_map(|(name, text, children)| Element {
            name,
            text,
            children,
        });
    prop_oneof![
        2 => leaf,
        1 => nested,
    ]
    .boxed()
}

fn document() -> impl Strategy<Value = Vec<Element>> {
    prop::collection::vec(element(3), 1..=4)
}

fn texts() -> impl Strategy<Value = Vec<Node>> {
    prop::collection::vec("[a-z]{1,4}".prop_map(|s| Node::from(Text::new(&s))), 0..=4)
}

fn mode() -> impl Strategy<Value = BlockMode> {
    prop_oneof![
        Just(BlockMode::Replace),
        Just(BlockMode::Append),
        Just(BlockMode::Prepend),
    ]
}

// -- Property tests --

proptest! {
    /// Every indent the lexer emits is closed by an outdent.
    #[test]
    fn indentation_balances(doc in document()) {
        let mut src = String::new();
        for el in &doc {
            el.source(0, &mut src);
        }
        let names = common::names(&src);
        let indents = names.iter().filter(|n| **n == "indent").count();
        let outdents = names.iter().filter(|n| **n == "outdent").count();
        prop_assert_eq!(indents, outdents);
        prop_assert_eq!(names.last().copied(), Some("eos"));
    }

    /// Rendering the printed source reproduces the element tree.
    #[test]
    fn rendering_matches_tree(doc in document()) {
        let mut src = String::new();
        let mut expected = String::from(common::DOCTYPE);
        for el in &doc {
            el.source(0, &mut src);
            el.html(&mut expected);
        }
        let out = render_str(&src, &Options::new()).map_err(|e| {
            TestCaseError::fail(std::format!("render error: {e}\n--- source ---\n{src}"))
        })?;
        prop_assert_eq!(out, expected);
    }

    /// Text around a tag interpolation is kept in place.
    #[test]
    fn tag_interpolation_reassembles(
        before in "[a-zA-Z0-9 ,.]{0,10}",
        inner in text(),
        after in "[a-zA-Z0-9 ,.]{0,10}",
    ) {
        let src = std::format!("p {before}#[em {inner}]{after}");
        let out = render_str(&src, &Options::new()).map_err(|e| {
            TestCaseError::fail(std::format!("render error: {e}\n--- source ---\n{src}"))
        })?;
        prop_assert_eq!(
            out,
            std::format!("{}<p>{before}<em>{inner}</em>{after}</p>", common::DOCTYPE)
        );
    }

    /// Replace yields the child, append and prepend concatenate.
    #[test]
    fn merge_laws(ancestor in texts(), child in texts(), mode in mode()) {
        let mut merged = ancestor.clone();
        merge_nodes(&mut merged, &child, mode);
        let expected: Vec<Node> = match mode {
            BlockMode::Replace => child.clone(),
            BlockMode::Append => ancestor.iter().chain(&child).cloned().collect(),
            BlockMode::Prepend => child.iter().chain(&ancestor).cloned().collect(),
        };
        prop_assert_eq!(merged, expected);
    }

    /// Merging never loses or invents nodes outside replace mode.
    #[test]
    fn merge_preserves_length(ancestor in texts(), child in texts()) {
        for mode in [BlockMode::Append, BlockMode::Prepend] {
            let mut merged = ancestor.clone();
            merge_nodes(&mut merged, &child, mode);
            prop_assert_eq!(merged.len(), ancestor.len() + child.len());
        }
    }
}
