use std::fmt;

use serde::{Serialize, Serializer};

/// A 1-based line/column pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

/// Source location for error reporting.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub line: usize,
    pub column: usize,
}

impl Span {
    #[must_use]
    pub const fn new(file: Option<String>, line: usize, column: usize) -> Self {
        Self { file, line, column }
    }
}

/// How a named block combines with an ancestor's block of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockMode {
    #[default]
    Replace,
    Append,
    Prepend,
}

impl fmt::Display for BlockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replace => write!(f, "replace"),
            Self::Append => write!(f, "append"),
            Self::Prepend => write!(f, "prepend"),
        }
    }
}

/// Attribute value: a string, or `true` for a boolean attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    True,
    Str(String),
}

impl AttrValue {
    /// The string value, or `None` for a boolean attribute.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::True => None,
            Self::Str(s) => Some(s),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl Serialize for AttrValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::True => serializer.serialize_bool(true),
            Self::Str(s) => serializer.serialize_str(s),
        }
    }
}

/// Token kinds produced by the lexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TokenKind {
    Tag { val: String },
    Id { val: String },
    Class { val: String },
    Attribute { name: String, val: AttrValue },
    StartAttributes,
    EndAttributes,
    Text { val: String },
    TextHtml { val: String },
    /// `#{name}` or `!{name}` inside text.
    InterpolatedCode {
        val: String,
        buffer: bool,
        must_escape: bool,
    },
    /// `#{name}` in tag position.
    Interpolation { val: String },
    StartInterpolation,
    EndInterpolation,
    StartPipelessText,
    EndPipelessText,
    /// Indentation width of the new level.
    Indent { val: usize },
    Outdent,
    Newline,
    Block { val: String, mode: BlockMode },
    MixinBlock,
    Mixin { val: String, args: Option<String> },
    Call { val: String, args: Option<String> },
    Filter { val: String },
    Path { val: String },
    Include,
    Extends,
    Yield,
    Default,
    Doctype { val: String },
    Comment { val: String, buffer: bool },
    Dot,
    #[serde(rename = ":")]
    Colon,
    Slash,
    Eos,
}

impl TokenKind {
    /// The token type name as used in error messages and plugin keys.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Tag { .. } => "tag",
            Self::Id { .. } => "id",
            Self::Class { .. } => "class",
            Self::Attribute { .. } => "attribute",
            Self::StartAttributes => "start-attributes",
            Self::EndAttributes => "end-attributes",
            Self::Text { .. } => "text",
            Self::TextHtml { .. } => "text-html",
            Self::InterpolatedCode { .. } => "interpolated-code",
            Self::Interpolation { .. } => "interpolation",
            Self::StartInterpolation => "start-interpolation",
            Self::EndInterpolation => "end-interpolation",
            Self::StartPipelessText => "start-pipeless-text",
            Self::EndPipelessText => "end-pipeless-text",
            Self::Indent { .. } => "indent",
            Self::Outdent => "outdent",
            Self::Newline => "newline",
            Self::Block { .. } => "block",
            Self::MixinBlock => "mixin-block",
            Self::Mixin { .. } => "mixin",
            Self::Call { .. } => "call",
            Self::Filter { .. } => "filter",
            Self::Path { .. } => "path",
            Self::Include => "include",
            Self::Extends => "extends",
            Self::Yield => "yield",
            Self::Default => "default",
            Self::Doctype { .. } => "doctype",
            Self::Comment { .. } => "comment",
            Self::Dot => "dot",
            Self::Colon => ":",
            Self::Slash => "slash",
            Self::Eos => "eos",
        }
    }

    /// The primary string value carried by the token, if any.
    #[must_use]
    pub fn val(&self) -> Option<&str> {
        match self {
            Self::Tag { val }
            | Self::Id { val }
            | Self::Class { val }
            | Self::Text { val }
            | Self::TextHtml { val }
            | Self::InterpolatedCode { val, .. }
            | Self::Interpolation { val }
            | Self::Block { val, .. }
            | Self::Mixin { val, .. }
            | Self::Call { val, .. }
            | Self::Filter { val }
            | Self::Path { val }
            | Self::Doctype { val }
            | Self::Comment { val, .. } => Some(val),
            _ => None,
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single token with its kind and source range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    #[serde(flatten)]
    pub kind: TokenKind,
    /// Start of the token.
    pub span: Span,
    /// End of the token (exclusive column).
    pub end: Position,
}

impl Token {
    #[must_use]
    pub const fn new(kind: TokenKind, span: Span, end: Position) -> Self {
        Self { kind, span, end }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.kind.name()
    }
}
