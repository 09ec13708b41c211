use std::path::PathBuf;

use serde::Serialize;

use crate::token::{AttrValue, BlockMode, Span};

/// Tag names treated as inline content.
pub const INLINE_TAGS: &[&str] = &[
    "a", "abbr", "acronym", "address", "audio", "b", "bdi", "bdo", "br", "cite", "code", "data",
    "dfn", "em", "i", "img", "kbd", "mark", "q", "rp", "rt", "ruby", "s", "samp", "small", "span",
    "strong", "sub", "sup", "time", "u", "var", "video", "wbr",
];

/// Ordered list of child nodes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Block {
    #[serde(flatten)]
    pub span: Span,
    pub nodes: Vec<Node>,
}

/// `block name`, `append name` or `prepend name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedBlock {
    #[serde(flatten)]
    pub span: Span,
    pub name: String,
    pub mode: BlockMode,
    pub nodes: Vec<Node>,
}

/// An element with a literal name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    #[serde(flatten)]
    pub span: Span,
    pub name: String,
    pub self_closing: bool,
    pub is_inline: bool,
    /// Body given with `tag.`
    pub text_only: bool,
    pub attrs: Vec<Attribute>,
    pub block: Block,
}

/// An element whose name comes from `#{variable}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpolatedTag {
    #[serde(flatten)]
    pub span: Span,
    pub expr: String,
    pub self_closing: bool,
    pub text_only: bool,
    pub attrs: Vec<Attribute>,
    pub block: Block,
}

/// A mixin declaration (`call == false`) or call (`call == true`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mixin {
    #[serde(flatten)]
    pub span: Span,
    pub name: String,
    /// Raw text between the parentheses, if any.
    pub args: Option<String>,
    /// Declared body, or the content supplied at the call site.
    pub block: Option<Block>,
    pub call: bool,
    pub attrs: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Text {
    #[serde(flatten)]
    pub span: Span,
    pub val: String,
    pub is_html: bool,
}

/// A variable reference from `#{name}` or `!{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Code {
    #[serde(flatten)]
    pub span: Span,
    pub val: String,
    pub buffer: bool,
    pub must_escape: bool,
    pub is_inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comment {
    #[serde(flatten)]
    pub span: Span,
    pub val: String,
    pub buffer: bool,
}

/// A comment followed by an indented text block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockComment {
    #[serde(flatten)]
    pub span: Span,
    pub val: String,
    pub buffer: bool,
    pub block: Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Doctype {
    #[serde(flatten)]
    pub span: Span,
    pub val: String,
}

/// `:name(attrs)` followed by a text body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Filter {
    #[serde(flatten)]
    pub span: Span,
    pub name: String,
    pub attrs: Vec<Attribute>,
    pub block: Block,
}

/// A filter applied to a raw include: `include:name path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncludeFilter {
    #[serde(flatten)]
    pub span: Span,
    pub name: String,
    pub attrs: Vec<Attribute>,
}

/// Path operand of `include`/`extends`, filled in by the loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReference {
    #[serde(flatten)]
    pub span: Span,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_path: Option<PathBuf>,
    /// Contents decoded as UTF-8.
    #[serde(rename = "str", skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    #[serde(skip)]
    pub raw: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ast: Option<Box<Block>>,
}

impl FileReference {
    #[must_use]
    pub fn new(path: impl Into<String>, span: Span) -> Self {
        Self {
            span,
            path: path.into(),
            full_path: None,
            contents: None,
            raw: None,
            ast: None,
        }
    }
}

/// Include of another template; its block feeds the target's `yield`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Include {
    #[serde(flatten)]
    pub span: Span,
    pub file: FileReference,
    pub block: Block,
}

/// Include of a non-template file, optionally through filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawInclude {
    #[serde(flatten)]
    pub span: Span,
    pub file: FileReference,
    pub filters: Vec<IncludeFilter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extends {
    #[serde(flatten)]
    pub span: Span,
    pub file: FileReference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    #[serde(flatten)]
    pub span: Span,
    pub name: String,
    pub val: AttrValue,
    pub must_escape: bool,
}

/// A document tree node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum Node {
    Block(Block),
    NamedBlock(NamedBlock),
    Tag(Tag),
    InterpolatedTag(InterpolatedTag),
    Mixin(Mixin),
    MixinBlock(Span),
    YieldBlock(Span),
    Text(Text),
    Code(Code),
    Comment(Comment),
    BlockComment(BlockComment),
    Doctype(Doctype),
    Filter(Filter),
    Include(Include),
    RawInclude(RawInclude),
    Extends(Extends),
}

impl Node {
    /// Variant name as it appears in serialized trees and error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Block(_) => "Block",
            Self::NamedBlock(_) => "NamedBlock",
            Self::Tag(_) => "Tag",
            Self::InterpolatedTag(_) => "InterpolatedTag",
            Self::Mixin(_) => "Mixin",
            Self::MixinBlock(_) => "MixinBlock",
            Self::YieldBlock(_) => "YieldBlock",
            Self::Text(_) => "Text",
            Self::Code(_) => "Code",
            Self::Comment(_) => "Comment",
            Self::BlockComment(_) => "BlockComment",
            Self::Doctype(_) => "Doctype",
            Self::Filter(_) => "Filter",
            Self::Include(_) => "Include",
            Self::RawInclude(_) => "RawInclude",
            Self::Extends(_) => "Extends",
        }
    }

    #[must_use]
    pub const fn span(&self) -> &Span {
        match self {
            Self::Block(n) => &n.span,
            Self::NamedBlock(n) => &n.span,
            Self::Tag(n) => &n.span,
            Self::InterpolatedTag(n) => &n.span,
            Self::Mixin(n) => &n.span,
            Self::MixinBlock(span) | Self::YieldBlock(span) => span,
            Self::Text(n) => &n.span,
            Self::Code(n) => &n.span,
            Self::Comment(n) => &n.span,
            Self::BlockComment(n) => &n.span,
            Self::Doctype(n) => &n.span,
            Self::Filter(n) => &n.span,
            Self::Include(n) => &n.span,
            Self::RawInclude(n) => &n.span,
            Self::Extends(n) => &n.span,
        }
    }

    /// The node's children, for nodes that have a body.
    #[must_use]
    pub fn children(&self) -> Option<&[Self]> {
        match self {
            Self::Block(Block { nodes, .. }) | Self::NamedBlock(NamedBlock { nodes, .. }) => {
                Some(nodes)
            }
            Self::Tag(Tag { block, .. })
            | Self::InterpolatedTag(InterpolatedTag { block, .. })
            | Self::BlockComment(BlockComment { block, .. })
            | Self::Filter(Filter { block, .. })
            | Self::Include(Include { block, .. })
            | Self::Mixin(Mixin {
                block: Some(block), ..
            }) => Some(&block.nodes),
            _ => None,
        }
    }

    /// Mutable access to the node's children.
    pub fn children_mut(&mut self) -> Option<&mut Vec<Self>> {
        match self {
            Self::Block(Block { nodes, .. }) | Self::NamedBlock(NamedBlock { nodes, .. }) => {
                Some(nodes)
            }
            Self::Tag(Tag { block, .. })
            | Self::InterpolatedTag(InterpolatedTag { block, .. })
            | Self::BlockComment(BlockComment { block, .. })
            | Self::Filter(Filter { block, .. })
            | Self::Include(Include { block, .. })
            | Self::Mixin(Mixin {
                block: Some(block), ..
            }) => Some(&mut block.nodes),
            _ => None,
        }
    }

    /// Visit this node and every descendant in document order.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Self)) {
        visit(self);
        if let Some(children) = self.children() {
            for child in children {
                child.walk(visit);
            }
        }
    }

    /// Whether this is whitespace-only text.
    #[must_use]
    pub fn is_blank_text(&self) -> bool {
        matches!(self, Self::Text(t) if t.val.trim().is_empty())
    }
}

impl Block {
    #[must_use]
    pub const fn empty(span: Span) -> Self {
        Self {
            span,
            nodes: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Visit every node in the block and its descendants.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Node)) {
        for node in &self.nodes {
            node.walk(visit);
        }
    }
}
