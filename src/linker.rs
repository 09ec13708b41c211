//! Template inheritance: resolves `extends` chains, merges named blocks and
//! splices included trees in place.

use std::collections::HashSet;
use std::fmt;
use std::mem;

use tracing::{debug, trace};

use crate::ast::{
    Block, Extends, Include, InterpolatedTag, NamedBlock, Node, RawInclude, Tag, Text,
};
use crate::error;
use crate::token::{BlockMode, Span};

/// Classifies a linker error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkErrorKind {
    ExtendsNotFirst,
    UnexpectedNodesInExtendingRoot { found: &'static str },
    UnexpectedBlock { name: String },
    /// A file reference the loader never filled in.
    UnloadedFile { path: String },
}

impl LinkErrorKind {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ExtendsNotFirst => "EXTENDS_NOT_FIRST",
            Self::UnexpectedNodesInExtendingRoot { .. } => "UNEXPECTED_NODES_IN_EXTENDING_ROOT",
            Self::UnexpectedBlock { .. } => "UNEXPECTED_BLOCK",
            Self::UnloadedFile { .. } => "UNLOADED_FILE",
        }
    }
}

impl fmt::Display for LinkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExtendsNotFirst => write!(
                f,
                "Declaration of template inheritance (\"extends\") should be the first thing in the file. There can only be one extends statement per file."
            ),
            Self::UnexpectedNodesInExtendingRoot { found } => write!(
                f,
                "Only named blocks and mixins can appear at the top level of an extending template, found {found}"
            ),
            Self::UnexpectedBlock { name } => write!(f, "Unexpected block {name}"),
            Self::UnloadedFile { path } => {
                write!(f, "the file \"{path}\" has not been loaded")
            }
        }
    }
}

/// Error produced while linking.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", self.message())]
pub struct LinkError {
    pub kind: LinkErrorKind,
    pub span: Span,
    pub src: Option<String>,
}

impl LinkError {
    const fn new(kind: LinkErrorKind, span: Span) -> Self {
        Self {
            kind,
            span,
            src: None,
        }
    }

    #[must_use]
    pub fn code(&self) -> String {
        error::namespaced(self.kind.code())
    }

    #[must_use]
    pub fn msg(&self) -> String {
        self.kind.to_string()
    }

    #[must_use]
    pub fn message(&self) -> String {
        error::annotate(
            &self.msg(),
            &self.span,
            Some(self.span.column),
            self.src.as_deref(),
        )
    }
}

/// Combine a child's block content with an ancestor's according to `mode`.
pub fn merge_nodes(ancestor: &mut Vec<Node>, child: &[Node], mode: BlockMode) {
    match mode {
        BlockMode::Replace => *ancestor = child.to_vec(),
        BlockMode::Append => ancestor.extend_from_slice(child),
        BlockMode::Prepend => {
            let tail = mem::take(ancestor);
            ancestor.reserve(child.len() + tail.len());
            ancestor.extend_from_slice(child);
            ancestor.extend(tail);
        }
    }
}

/// Link a loaded tree into a single self-contained tree without any
/// `Extends`, `Include` or `NamedBlock` nodes.
///
/// # Errors
///
/// `LinkError` on misplaced `extends`, unexpected content or blocks in an
/// extending template, or file references the loader did not fill in.
pub fn link(tree: Block) -> Result<Block, LinkError> {
    let mut stats = Stats::default();
    let Linked { mut tree, .. } = link_tree(tree, &mut stats)?;
    tree.nodes = lower_named_blocks(mem::take(&mut tree.nodes));
    debug!(
        merged = stats.merged,
        includes = stats.includes,
        nodes = tree.nodes.len(),
        "linked tree"
    );
    Ok(tree)
}

#[derive(Default)]
struct Stats {
    merged: usize,
    includes: usize,
}

struct Linked {
    tree: Block,
    extends: bool,
}

/// A child block to apply to its ancestor.
struct Override {
    name: String,
    mode: BlockMode,
    nodes: Vec<Node>,
}

fn link_tree(mut tree: Block, stats: &mut Stats) -> Result<Linked, LinkError> {
    let has_extends = matches!(tree.nodes.first(), Some(Node::Extends(_)));
    check_extends_position(&tree.nodes, has_extends)?;

    let extends = if has_extends {
        match tree.nodes.remove(0) {
            Node::Extends(extends) => Some(extends),
            _ => None,
        }
    } else {
        None
    };

    tree.nodes = apply_includes(mem::take(&mut tree.nodes), stats)?;

    let Some(Extends { span, file }) = extends else {
        return Ok(Linked {
            tree,
            extends: false,
        });
    };

    let mut mixins = Vec::new();
    let mut expected = Vec::new();
    collect_root(mem::take(&mut tree.nodes), &mut mixins, &mut expected)?;

    let mut overrides = Vec::new();
    let mut active = Vec::new();
    for block in &expected {
        collect_overrides(block, &mut active, &mut overrides);
    }
    for mixin in &mixins {
        if let Some(children) = mixin.children() {
            collect_overrides_in(children, &mut active, &mut overrides);
        }
    }

    let ast = file.ast.ok_or_else(|| {
        LinkError::new(LinkErrorKind::UnloadedFile { path: file.path.clone() }, span)
    })?;
    trace!(path = %file.path, "linking ancestor");
    let Linked { tree: mut parent, .. } = link_tree(*ast, stats)?;

    // Only blocks the ancestor declares itself, not ones merged in below.
    let mut declared = HashSet::new();
    parent.walk(&mut |node| {
        if let Node::NamedBlock(block) = node {
            declared.insert(block.name.clone());
        }
    });
    if let Some(missing) = expected.iter().find(|b| !declared.contains(&b.name)) {
        return Err(LinkError::new(
            LinkErrorKind::UnexpectedBlock {
                name: missing.name.clone(),
            },
            missing.span.clone(),
        ));
    }

    for entry in &overrides {
        stats.merged += merge_into(&mut parent.nodes, entry);
    }

    mixins.append(&mut parent.nodes);
    parent.nodes = mixins;
    Ok(Linked {
        tree: parent,
        extends: true,
    })
}

fn check_extends_position(nodes: &[Node], has_extends: bool) -> Result<(), LinkError> {
    let mut misplaced = None;
    for (i, node) in nodes.iter().enumerate() {
        node.walk(&mut |n| {
            if let Node::Extends(extends) = n {
                let legit = has_extends && i == 0 && std::ptr::eq(n, node);
                if !legit && misplaced.is_none() {
                    misplaced = Some(extends.span.clone());
                }
            }
        });
    }
    match misplaced {
        Some(span) => Err(LinkError::new(LinkErrorKind::ExtendsNotFirst, span)),
        None => Ok(()),
    }
}

/// Split the top level of an extending template into mixin declarations and
/// named blocks.
fn collect_root(
    nodes: Vec<Node>,
    mixins: &mut Vec<Node>,
    blocks: &mut Vec<NamedBlock>,
) -> Result<(), LinkError> {
    for node in nodes {
        match node {
            Node::NamedBlock(block) => blocks.push(block),
            Node::Block(block) => collect_root(block.nodes, mixins, blocks)?,
            Node::Mixin(mixin) if !mixin.call => mixins.push(Node::Mixin(mixin)),
            Node::Comment(comment) if !comment.buffer => {}
            text if text.is_blank_text() => {}
            other => {
                return Err(LinkError::new(
                    LinkErrorKind::UnexpectedNodesInExtendingRoot {
                        found: other.type_name(),
                    },
                    other.span().clone(),
                ));
            }
        }
    }
    Ok(())
}

fn collect_overrides(block: &NamedBlock, active: &mut Vec<String>, out: &mut Vec<Override>) {
    if active.contains(&block.name) {
        return;
    }
    out.push(Override {
        name: block.name.clone(),
        mode: block.mode,
        nodes: block.nodes.clone(),
    });
    active.push(block.name.clone());
    collect_overrides_in(&block.nodes, active, out);
    active.pop();
}

fn collect_overrides_in(nodes: &[Node], active: &mut Vec<String>, out: &mut Vec<Override>) {
    for node in nodes {
        match node {
            Node::NamedBlock(block) => collect_overrides(block, active, out),
            other => {
                if let Some(children) = other.children() {
                    collect_overrides_in(children, active, out);
                }
            }
        }
    }
}

/// Apply `entry` to every replace-mode block of the same name.
fn merge_into(nodes: &mut [Node], entry: &Override) -> usize {
    let mut merged = 0;
    for node in nodes {
        if let Node::NamedBlock(target) = node {
            if target.name == entry.name && target.mode == BlockMode::Replace {
                merge_nodes(&mut target.nodes, &entry.nodes, entry.mode);
                trace!(block = %entry.name, mode = %entry.mode, "merged block");
                merged += 1;
                continue;
            }
        }
        if let Some(children) = node.children_mut() {
            merged += merge_into(children, entry);
        }
    }
    merged
}

fn unloaded(path: &str, span: Span) -> LinkError {
    LinkError::new(
        LinkErrorKind::UnloadedFile {
            path: path.to_string(),
        },
        span,
    )
}

fn apply_includes(nodes: Vec<Node>, stats: &mut Stats) -> Result<Vec<Node>, LinkError> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            Node::RawInclude(RawInclude {
                span,
                file,
                filters,
            }) if filters.is_empty() => {
                let contents = file
                    .contents
                    .ok_or_else(|| unloaded(&file.path, span.clone()))?;
                out.push(Node::Text(Text {
                    span,
                    val: contents.replace('\r', ""),
                    is_html: false,
                }));
            }
            Node::Include(Include { span, file, block }) => {
                let yielded = apply_includes(block.nodes, stats)?;
                let ast = file.ast.ok_or_else(|| unloaded(&file.path, span))?;
                let Linked {
                    tree: mut included,
                    extends,
                } = link_tree(*ast, stats)?;
                if extends {
                    included.nodes = lower_named_blocks(included.nodes);
                }
                apply_yield(&mut included.nodes, yielded);
                stats.includes += 1;
                out.extend(included.nodes);
            }
            mut other => {
                if let Some(children) = other.children_mut() {
                    *children = apply_includes(mem::take(children), stats)?;
                }
                out.push(other);
            }
        }
    }
    Ok(out)
}

/// Put an include's block where the included file yields, or at its
/// default location when it has no `yield`.
fn apply_yield(nodes: &mut Vec<Node>, yielded: Vec<Node>) {
    if yielded.is_empty() {
        return;
    }
    if replace_yields(nodes, &yielded) == 0 {
        append_at_default(nodes, yielded);
    }
}

fn replace_yields(nodes: &mut Vec<Node>, yielded: &[Node]) -> usize {
    let mut count = 0;
    let mut i = 0;
    while i < nodes.len() {
        if matches!(nodes[i], Node::YieldBlock(_)) {
            let tail = nodes.split_off(i + 1);
            nodes.pop();
            nodes.extend(yielded.iter().cloned());
            nodes.extend(tail);
            i += yielded.len();
            count += 1;
            continue;
        }
        if let Some(children) = nodes[i].children_mut() {
            count += replace_yields(children, yielded);
        }
        i += 1;
    }
    count
}

fn is_yield_container(node: &Node) -> bool {
    match node {
        Node::Tag(Tag { text_only: true, .. })
        | Node::InterpolatedTag(InterpolatedTag { text_only: true, .. })
        | Node::NamedBlock(_)
        | Node::Filter(_) => false,
        Node::Block(_) => true,
        other => other.children().is_some_and(|c| !c.is_empty()),
    }
}

fn append_at_default(nodes: &mut Vec<Node>, yielded: Vec<Node>) {
    if let Some(i) = nodes.iter().rposition(is_yield_container) {
        if let Some(children) = nodes[i].children_mut() {
            append_at_default(children, yielded);
            return;
        }
    }
    nodes.extend(yielded);
}

fn lower_named_blocks(nodes: Vec<Node>) -> Vec<Node> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            Node::NamedBlock(block) => out.extend(lower_named_blocks(block.nodes)),
            mut other => {
                if let Some(children) = other.children_mut() {
                    *children = lower_named_blocks(mem::take(children));
                }
                out.push(other);
            }
        }
    }
    out
}
