use std::fmt;
use std::mem;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::brackets::{self, BracketError, BracketRange};
use crate::error;
use crate::token::{AttrValue, BlockMode, Position, Span, Token, TokenKind};

/// Classifies a lexer error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexErrorKind {
    /// Input that no matcher accepts.
    UnexpectedText { text: String },
    /// Tabs and spaces mixed in indentation.
    InvalidIndentation,
    /// Dedent to a width that was never pushed.
    InconsistentIndentation { outer: usize, inner: usize },
    /// Bracketed expression never closed.
    NoEndBracket { expected: char },
    /// `#[` interpolation never closed.
    UnclosedInterpolation,
    /// Closing bracket does not match the innermost open one.
    BracketMismatch { expected: char, found: char },
    /// Attribute name contains forbidden code points.
    InvalidAttributeName { invalid: String },
    /// `=` or a quoted empty string where an attribute name belongs.
    EmptyAttributeName,
    /// Quoted attribute value followed by something other than whitespace.
    MalformedAttribute { found: char },
    InvalidId { id: String },
    /// `None` when the name only lacks a letter or underscore.
    InvalidClassName { name: Option<String> },
    NoExtendsPath,
    MalformedExtends,
    NoIncludePath,
    MalformedInclude,
    DefaultWithExpression,
}

impl LexErrorKind {
    /// The reason part of the error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnexpectedText { .. } => "UNEXPECTED_TEXT",
            Self::InvalidIndentation => "INVALID_INDENTATION",
            Self::InconsistentIndentation { .. } => "INCONSISTENT_INDENTATION",
            Self::NoEndBracket { .. } | Self::UnclosedInterpolation => "NO_END_BRACKET",
            Self::BracketMismatch { .. } => "BRACKET_MISMATCH",
            Self::InvalidAttributeName { .. } => "INVALID_ATTRIBUTE_NAME",
            Self::EmptyAttributeName => "EMPTY_ATTRIBUTE_NAME",
            Self::MalformedAttribute { .. } => "MALFORMED_ATTRIBUTE",
            Self::InvalidId { .. } => "INVALID_ID",
            Self::InvalidClassName { .. } => "INVALID_CLASS_NAME",
            Self::NoExtendsPath => "NO_EXTENDS_PATH",
            Self::MalformedExtends => "MALFORMED_EXTENDS",
            Self::NoIncludePath => "NO_INCLUDE_PATH",
            Self::MalformedInclude => "MALFORMED_INCLUDE",
            Self::DefaultWithExpression => "DEFAULT_WITH_EXPRESSION",
        }
    }
}

impl fmt::Display for LexErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedText { text } => write!(f, "unexpected text \"{text}\""),
            Self::InvalidIndentation => write!(
                f,
                "Invalid indentation, you can use tabs or spaces but not both"
            ),
            Self::InconsistentIndentation { outer, inner } => write!(
                f,
                "Inconsistent indentation. Expecting either {outer} or {inner} spaces/tabs."
            ),
            Self::NoEndBracket { expected } => write!(
                f,
                "The end of the string reached with no closing bracket {expected} found."
            ),
            Self::UnclosedInterpolation => write!(
                f,
                "End of line was reached with no closing bracket for interpolation."
            ),
            Self::BracketMismatch { expected, found } => {
                write!(f, "Mismatched bracket: expected `{expected}` but found `{found}`")
            }
            Self::InvalidAttributeName { invalid } => write!(
                f,
                "Code points not allowed in HTML attribute names: {invalid}"
            ),
            Self::EmptyAttributeName => write!(f, "Attribute names must not be empty."),
            Self::MalformedAttribute { found } => {
                write!(f, "Invalid code point after attribute value: `{found}`")
            }
            Self::InvalidId { id } => write!(f, "\"{id}\" is not a valid ID."),
            Self::InvalidClassName { name: None } => write!(
                f,
                "Class names must contain at least one letter or underscore."
            ),
            Self::InvalidClassName { name: Some(name) } => write!(
                f,
                "\"{name}\" is not a valid class name.  Class names can only contain \
                 \"_\", \"-\", a-z and 0-9, and must contain at least one of \"_\", or a-z"
            ),
            Self::NoExtendsPath => write!(f, "missing path for extends"),
            Self::MalformedExtends => write!(f, "malformed extends"),
            Self::NoIncludePath => write!(f, "missing path for include"),
            Self::MalformedInclude => write!(f, "malformed include"),
            Self::DefaultWithExpression => write!(f, "default should not have an expression"),
        }
    }
}

/// Error produced during lexing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", self.message())]
pub struct LexError {
    pub kind: LexErrorKind,
    pub span: Span,
    /// Full source text, used for the annotated excerpt.
    pub src: Option<String>,
}

impl LexError {
    /// Namespaced code, e.g. `PUGNEUM:INVALID_INDENTATION`.
    #[must_use]
    pub fn code(&self) -> String {
        error::namespaced(self.kind.code())
    }

    /// The message without the location header or excerpt.
    #[must_use]
    pub fn msg(&self) -> String {
        self.kind.to_string()
    }

    /// The full message with location header and source excerpt.
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

/// A point in the matcher sequence where plugins may intercept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexStep {
    Blank,
    Eos,
    EndInterpolation,
    Yield,
    Doctype,
    Default,
    Extends,
    Append,
    Prepend,
    Block,
    MixinBlock,
    Include,
    Mixin,
    Call,
    Interpolation,
    Tag,
    Filter { in_include: bool },
    Id,
    Dot,
    ClassName,
    Attrs,
    Indent,
    Text,
    TextHtml,
    Comment,
    Slash,
    Colon,
    Path,
    PipelessText,
}

/// Built-in matchers in priority order; the first to accept wins.
const ADVANCE_ORDER: [LexStep; 27] = [
    LexStep::Blank,
    LexStep::Eos,
    LexStep::EndInterpolation,
    LexStep::Yield,
    LexStep::Doctype,
    LexStep::Default,
    LexStep::Extends,
    LexStep::Append,
    LexStep::Prepend,
    LexStep::Block,
    LexStep::MixinBlock,
    LexStep::Include,
    LexStep::Mixin,
    LexStep::Call,
    LexStep::Interpolation,
    LexStep::Tag,
    LexStep::Filter { in_include: false },
    LexStep::Id,
    LexStep::Dot,
    LexStep::ClassName,
    LexStep::Attrs,
    LexStep::Indent,
    LexStep::Text,
    LexStep::TextHtml,
    LexStep::Comment,
    LexStep::Slash,
    LexStep::Colon,
];

/// A lexer extension consulted before the built-in matcher of each step.
pub trait LexerPlugin {
    /// Return `Ok(true)` after consuming input to skip the built-in matcher.
    fn lex(&self, step: LexStep, lexer: &mut Lexer<'_>) -> Result<bool, LexError>;
}

/// Options for a lexer run.
#[derive(Clone, Copy)]
pub struct LexOptions<'a> {
    pub filename: Option<&'a str>,
    pub starting_line: usize,
    pub starting_column: usize,
    /// Lex the body of a `#[...]` interpolation: stop at the closing `]`.
    pub interpolated: bool,
    pub plugins: &'a [Box<dyn LexerPlugin>],
}

impl Default for LexOptions<'_> {
    fn default() -> Self {
        Self {
            filename: None,
            starting_line: 1,
            starting_column: 1,
            interpolated: false,
            plugins: &[],
        }
    }
}

impl<'a> LexOptions<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn filename(mut self, filename: &'a str) -> Self {
        self.filename = Some(filename);
        self
    }

    #[must_use]
    pub const fn starting_at(mut self, line: usize, column: usize) -> Self {
        self.starting_line = line;
        self.starting_column = column;
        self
    }

    #[must_use]
    pub const fn interpolated(mut self, interpolated: bool) -> Self {
        self.interpolated = interpolated;
        self
    }

    #[must_use]
    pub const fn plugins(mut self, plugins: &'a [Box<dyn LexerPlugin>]) -> Self {
        self.plugins = plugins;
        self
    }
}

/// Tokenize template source into a sequence of tokens ending in `eos`.
///
/// # Errors
///
/// Returns `LexError` on bad indentation, unterminated brackets or
/// interpolations, invalid identifiers, or text no matcher accepts.
pub fn lex(source: &str, options: &LexOptions<'_>) -> Result<Vec<Token>, LexError> {
    let tokens = Lexer::new(source, options).tokenize()?;
    debug!(
        tokens = tokens.len(),
        file = options.filename.unwrap_or("<anonymous>"),
        "lexed template"
    );
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndentStyle {
    Tabs,
    Spaces,
}

/// Something inside a run of text that interrupts it.
#[derive(Debug, Clone, Copy)]
enum Marker {
    /// `\#[`
    EscapedTag,
    /// `\#{` or `\!{`
    EscapedCode(char),
    /// `#[`
    Tag,
    /// `#{` or `!{`
    Code(char),
    /// `]` closing the current interpolation.
    End,
}

/// Indentation-sensitive tokenizer.
///
/// The cursor is a byte offset into the remaining input; positions are
/// tracked as 1-based line and column (in characters).
pub struct Lexer<'a> {
    input: String,
    pos: usize,
    original: Rc<str>,
    filename: Option<String>,
    interpolated: bool,
    line: usize,
    col: usize,
    plugins: &'a [Box<dyn LexerPlugin>],
    indent_stack: Vec<usize>,
    indent_style: Option<IndentStyle>,
    interpolation_allowed: bool,
    tokens: Vec<Token>,
    ended: bool,
}

impl<'a> Lexer<'a> {
    #[must_use]
    pub fn new(source: &str, options: &LexOptions<'a>) -> Self {
        let source = source.strip_prefix('\u{FEFF}').unwrap_or(source);
        let input = source.replace("\r\n", "\n").replace('\r', "\n");
        Self {
            original: Rc::from(input.as_str()),
            input,
            pos: 0,
            filename: options.filename.map(str::to_string),
            interpolated: options.interpolated,
            line: options.starting_line,
            col: options.starting_column,
            plugins: options.plugins,
            indent_stack: vec![0],
            indent_style: None,
            interpolation_allowed: true,
            tokens: Vec::new(),
            ended: false,
        }
    }

    /// A lexer over the body of a `#[` interpolation, positioned where it starts.
    fn nested(&self, input: &str) -> Self {
        Self {
            input: input.to_string(),
            pos: 0,
            original: Rc::clone(&self.original),
            filename: self.filename.clone(),
            interpolated: true,
            line: self.line,
            col: self.col,
            plugins: self.plugins,
            indent_stack: vec![0],
            indent_style: None,
            interpolation_allowed: true,
            tokens: Vec::new(),
            ended: false,
        }
    }

    /// Run to completion and return the tokens.
    ///
    /// # Errors
    ///
    /// Returns the first `LexError` encountered.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        self.run()?;
        Ok(self.tokens)
    }

    fn run(&mut self) -> Result<(), LexError> {
        while !self.ended {
            self.advance()?;
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<(), LexError> {
        for step in ADVANCE_ORDER {
            if self.call(step)? {
                return Ok(());
            }
        }
        Err(self.fail())
    }

    fn call(&mut self, step: LexStep) -> Result<bool, LexError> {
        let plugins = self.plugins;
        for plugin in plugins {
            if plugin.lex(step, self)? {
                return Ok(true);
            }
        }
        match step {
            LexStep::Blank => Ok(self.blank()),
            LexStep::Eos => self.eos(),
            LexStep::EndInterpolation => Ok(self.end_interpolation()),
            LexStep::Yield => Ok(self.keyword_line("yield", TokenKind::Yield)),
            LexStep::Doctype => Ok(self.doctype()),
            LexStep::Default => self.default(),
            LexStep::Extends => self.extends(),
            LexStep::Append => Ok(self.named_block("append", true, BlockMode::Append)),
            LexStep::Prepend => Ok(self.named_block("prepend", true, BlockMode::Prepend)),
            LexStep::Block => Ok(self.named_block("block", false, BlockMode::Replace)),
            LexStep::MixinBlock => Ok(self.keyword_line("block", TokenKind::MixinBlock)),
            LexStep::Include => self.include(),
            LexStep::Mixin => Ok(self.mixin()),
            LexStep::Call => self.call_mixin(),
            LexStep::Interpolation => self.interpolation(),
            LexStep::Tag => Ok(self.tag()),
            LexStep::Filter { in_include } => self.filter(in_include),
            LexStep::Id => self.id(),
            LexStep::Dot => self.dot(),
            LexStep::ClassName => self.class_name(),
            LexStep::Attrs => self.attrs(),
            LexStep::Indent => self.indent(),
            LexStep::Text => self.text(),
            LexStep::TextHtml => self.text_html(),
            LexStep::Comment => self.comment(),
            LexStep::Slash => Ok(self.slash()),
            LexStep::Colon => Ok(self.colon()),
            LexStep::Path => Ok(self.path()),
            LexStep::PipelessText => self.pipeless_text(None),
        }
    }

    // -- cursor primitives, also available to plugins --

    /// The unconsumed input.
    #[must_use]
    pub fn rest(&self) -> &str {
        &self.input[self.pos..]
    }

    /// Drop `len` bytes of input without touching the position.
    pub fn consume(&mut self, len: usize) {
        self.pos = (self.pos + len).min(self.input.len());
    }

    pub const fn increment_line(&mut self, increment: usize) {
        self.line += increment;
        if increment > 0 {
            self.col = 1;
        }
    }

    pub const fn increment_column(&mut self, increment: usize) {
        self.col += increment;
    }

    #[must_use]
    pub const fn line(&self) -> usize {
        self.line
    }

    #[must_use]
    pub const fn column(&self) -> usize {
        self.col
    }

    /// Emit a token for the next `len` bytes and consume them.
    pub fn emit(&mut self, kind: TokenKind, len: usize) {
        let tok = self.tok(kind);
        let width = char_width(&self.rest()[..len.min(self.rest().len())]);
        self.consume(len);
        self.increment_column(width);
        self.push_end(tok);
    }

    /// Build an error at the current position.
    #[must_use]
    pub fn error(&self, kind: LexErrorKind) -> LexError {
        LexError {
            kind,
            span: self.span_here(),
            src: Some(self.original.to_string()),
        }
    }

    fn span_here(&self) -> Span {
        Span::new(self.filename.clone(), self.line, self.col)
    }

    fn tok(&self, kind: TokenKind) -> Token {
        Token::new(
            kind,
            self.span_here(),
            Position {
                line: self.line,
                column: self.col,
            },
        )
    }

    fn push_end(&mut self, mut tok: Token) {
        tok.end = Position {
            line: self.line,
            column: self.col,
        };
        self.tokens.push(tok);
    }

    fn fail(&self) -> LexError {
        let text: String = self.rest().chars().take(5).collect();
        self.error(LexErrorKind::UnexpectedText { text })
    }

    /// Match a bracketed expression whose opening bracket is at byte
    /// `skip` of the remaining input.
    fn bracket_expression(&mut self, skip: usize, close: char) -> Result<BracketRange, LexError> {
        match brackets::parse_until(self.rest(), skip + 1, close) {
            Ok(range) => Ok(range),
            Err(err) => {
                let consumed = self.rest()[..err.index()].to_string();
                self.advance_over(&consumed);
                Err(match err {
                    BracketError::EndOfString { .. } => {
                        self.error(LexErrorKind::NoEndBracket { expected: close })
                    }
                    BracketError::Mismatched {
                        expected, found, ..
                    } => self.error(LexErrorKind::BracketMismatch { expected, found }),
                })
            }
        }
    }

    /// Move the position over `text`, following embedded newlines.
    fn advance_over(&mut self, text: &str) {
        for ch in text.chars() {
            if ch == '\n' {
                self.increment_line(1);
            } else {
                self.increment_column(1);
            }
        }
    }

    /// Shared tail of keywords that must end the line (or precede `:`).
    /// On success the matched text and trailing blanks are consumed and
    /// the finished token is returned for the caller to push.
    fn scan_end_of_line(&mut self, len: usize, kind: TokenKind) -> Option<Token> {
        let rest = self.rest();
        let matched = &rest[..len];
        let after = &rest[len..];
        let leading = matched.len() - matched.trim_start_matches(' ').len();
        let width = char_width(matched);
        let consumed = if after.starts_with(':') {
            len
        } else {
            let trimmed = after.trim_start_matches([' ', '\t']);
            if !(trimmed.is_empty() || trimmed.starts_with('\n')) {
                return None;
            }
            len + (after.len() - trimmed.len())
        };
        self.increment_column(leading);
        self.consume(consumed);
        let mut tok = self.tok(kind);
        self.increment_column(width - leading);
        tok.end = Position {
            line: self.line,
            column: self.col,
        };
        Some(tok)
    }

    fn keyword_line(&mut self, keyword: &str, kind: TokenKind) -> bool {
        if !self.rest().starts_with(keyword) {
            return false;
        }
        match self.scan_end_of_line(keyword.len(), kind) {
            Some(tok) => {
                self.tokens.push(tok);
                true
            }
            None => false,
        }
    }

    // -- matchers --

    fn blank(&mut self) -> bool {
        let Some(after) = self.rest().strip_prefix('\n') else {
            return false;
        };
        let blanks = after.len() - after.trim_start_matches([' ', '\t']).len();
        if !after[blanks..].starts_with('\n') {
            return false;
        }
        self.consume(1 + blanks);
        self.increment_line(1);
        true
    }

    fn eos(&mut self) -> Result<bool, LexError> {
        if !self.rest().is_empty() {
            return Ok(false);
        }
        if self.interpolated {
            return Err(self.error(LexErrorKind::UnclosedInterpolation));
        }
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            let tok = self.tok(TokenKind::Outdent);
            self.push_end(tok);
        }
        let tok = self.tok(TokenKind::Eos);
        self.push_end(tok);
        self.ended = true;
        Ok(true)
    }

    fn end_interpolation(&mut self) -> bool {
        if self.interpolated && self.rest().starts_with(']') {
            self.consume(1);
            self.ended = true;
            return true;
        }
        false
    }

    fn doctype(&mut self) -> bool {
        let rest = self.rest();
        let Some(after) = rest.strip_prefix("doctype") else {
            return false;
        };
        if !matches!(after.chars().next(), None | Some(' ' | '\n')) {
            return false;
        }
        let line = rest.split('\n').next().unwrap_or_default();
        let val = line["doctype".len()..].trim().to_string();
        let len = line.len();
        self.emit(TokenKind::Doctype { val }, len);
        true
    }

    fn default(&mut self) -> Result<bool, LexError> {
        if self.keyword_line("default", TokenKind::Default) {
            return Ok(true);
        }
        if at_word_boundary(self.rest(), "default") {
            return Err(self.error(LexErrorKind::DefaultWithExpression));
        }
        Ok(false)
    }

    fn extends(&mut self) -> Result<bool, LexError> {
        let rest = self.rest();
        for keyword in ["extends", "extend"] {
            if rest.starts_with(keyword)
                && matches!(rest[keyword.len()..].chars().next(), None | Some(' ' | '\n'))
            {
                self.emit(TokenKind::Extends, keyword.len());
                if !self.call(LexStep::Path)? {
                    return Err(self.error(LexErrorKind::NoExtendsPath));
                }
                return Ok(true);
            }
        }
        if at_word_boundary(rest, "extends") || at_word_boundary(rest, "extend") {
            return Err(self.error(LexErrorKind::MalformedExtends));
        }
        Ok(false)
    }

    /// `block name`, `[block ]append name`, `[block ]prepend name`.
    fn named_block(&mut self, keyword: &str, block_prefix: bool, mode: BlockMode) -> bool {
        let rest = self.rest();
        let mut head = 0;
        if block_prefix {
            if let Some(n) = keyword_spaces(rest, "block") {
                if keyword_spaces(&rest[n..], keyword).is_some() {
                    head = n;
                }
            }
        }
        let Some(n) = keyword_spaces(&rest[head..], keyword) else {
            return false;
        };
        head += n;
        let line_end = rest[head..].find('\n').map_or(rest.len(), |i| head + i);
        let line = &rest[head..line_end];
        let (name, consumed) = match line.find("//") {
            Some(i) => (line[..i].trim(), head + i),
            None => (line.trim(), line_end),
        };
        if name.is_empty() {
            return false;
        }
        let name = name.to_string();
        let matched = &rest[..consumed];
        let significant = matched.trim_end_matches([' ', '\t', '\n']);
        let width = char_width(significant);
        let trailing = char_width(&matched[significant.len()..]);

        let tok = self.tok(TokenKind::Block { val: name, mode });
        self.increment_column(width);
        self.push_end(tok);
        self.consume(consumed);
        self.increment_column(trailing);
        true
    }

    fn include(&mut self) -> Result<bool, LexError> {
        let rest = self.rest();
        if rest.starts_with("include")
            && matches!(rest[7..].chars().next(), None | Some(':' | ' ' | '\n'))
        {
            self.emit(TokenKind::Include, "include".len());
            while self.call(LexStep::Filter { in_include: true })? {}
            if !self.call(LexStep::Path)? {
                if self.rest().starts_with([' ', '\n']) || self.rest().is_empty() {
                    return Err(self.error(LexErrorKind::NoIncludePath));
                }
                return Err(self.fail());
            }
            return Ok(true);
        }
        if at_word_boundary(rest, "include") {
            return Err(self.error(LexErrorKind::MalformedInclude));
        }
        Ok(false)
    }

    fn path(&mut self) -> bool {
        let rest = self.rest();
        let Some(after) = rest.strip_prefix(' ') else {
            return false;
        };
        let line = after.split('\n').next().unwrap_or_default();
        if line.is_empty() {
            return false;
        }
        let val = line.trim().to_string();
        let Some(tok) = self.scan_end_of_line(1 + line.len(), TokenKind::Path { val }) else {
            return false;
        };
        let has_path = tok.kind.val().is_some_and(|v| !v.is_empty());
        if has_path {
            self.tokens.push(tok);
        }
        has_path
    }

    fn mixin(&mut self) -> bool {
        let rest = self.rest();
        let Some(head) = keyword_spaces(rest, "mixin") else {
            return false;
        };
        let name_len = word_dash_len(&rest[head..]);
        if name_len == 0 {
            return false;
        }
        let name = rest[head..head + name_len].to_string();
        let mut len = head + name_len;
        let line = rest[len..].split('\n').next().unwrap_or_default();
        let spaces = line.len() - line.trim_start_matches(' ').len();
        let mut args = None;
        if line[spaces..].starts_with('(') {
            if let Some(close) = line.rfind(')') {
                if close > spaces {
                    args = Some(line[spaces + 1..close].to_string());
                    len += close + 1;
                }
            }
        }
        len += rest[len..].len() - rest[len..].trim_start_matches(' ').len();
        self.emit(TokenKind::Mixin { val: name, args }, len);
        true
    }

    fn call_mixin(&mut self) -> Result<bool, LexError> {
        let rest = self.rest();
        let Some(after) = rest.strip_prefix('+') else {
            return Ok(false);
        };
        let blanks = after.len() - after.trim_start_matches([' ', '\t']).len();
        let name_len = word_dash_len(&after[blanks..]);
        if name_len == 0 {
            return Ok(false);
        }
        let name = after[blanks..blanks + name_len].to_string();
        let start = self.span_here();
        let increment = 1 + blanks + name_len;
        self.consume(increment);
        self.increment_column(increment);

        let mut args = None;
        let spaces = self.rest().len() - self.rest().trim_start_matches(' ').len();
        if self.rest()[spaces..].starts_with('(') {
            let range = self.bracket_expression(spaces, ')')?;
            if !looks_like_attributes(&range.src) {
                self.increment_column(spaces + 1);
                self.consume(range.end + 1);
                self.advance_over(&range.src);
                self.increment_column(1);
                args = Some(range.src);
            }
        }
        let tok = Token::new(TokenKind::Call { val: name, args }, start, Position {
            line: self.line,
            column: self.col,
        });
        self.push_end(tok);
        Ok(true)
    }

    /// `#{name}` in tag position.
    fn interpolation(&mut self) -> Result<bool, LexError> {
        if !self.rest().starts_with("#{") {
            return Ok(false);
        }
        let range = self.bracket_expression(1, '}')?;
        self.consume(range.end + 1);
        let tok = self.tok(TokenKind::Interpolation {
            val: range.src.clone(),
        });
        self.increment_column(2);
        self.advance_over(&range.src);
        self.increment_column(1);
        self.push_end(tok);
        Ok(true)
    }

    fn tag(&mut self) -> bool {
        let rest = self.rest();
        if !rest.chars().next().is_some_and(is_word) {
            return false;
        }
        let run = rest
            .find(|c: char| !(is_word(c) || c == '-' || c == ':'))
            .unwrap_or(rest.len());
        let name = rest[..run].trim_end_matches(['-', ':']).to_string();
        let len = name.len();
        self.emit(TokenKind::Tag { val: name }, len);
        true
    }

    fn filter(&mut self, in_include: bool) -> Result<bool, LexError> {
        let Some(after) = self.rest().strip_prefix(':') else {
            return Ok(false);
        };
        let name_len = word_dash_len(after);
        let (val, len) = if name_len > 0 {
            (after[..name_len].to_string(), 1 + name_len)
        } else if let Some(quote) = after.chars().next().filter(|c| *c == '\'' || *c == '"') {
            let line = after[1..].split('\n').next().unwrap_or_default();
            match line.rfind(quote) {
                Some(close) if close > 0 => (line[..close].to_string(), close + 3),
                _ => return Ok(false),
            }
        } else {
            return Ok(false);
        };
        self.emit(TokenKind::Filter { val }, len);
        self.call(LexStep::Attrs)?;
        if !in_include {
            self.interpolation_allowed = false;
            self.call(LexStep::PipelessText)?;
        }
        Ok(true)
    }

    fn id(&mut self) -> Result<bool, LexError> {
        let Some(after) = self.rest().strip_prefix('#') else {
            return Ok(false);
        };
        let len = word_dash_len(after);
        if len > 0 {
            let val = after[..len].to_string();
            self.emit(TokenKind::Id { val }, 1 + len);
            return Ok(true);
        }
        let id = bad_selector(after);
        Err(self.error(LexErrorKind::InvalidId { id }))
    }

    fn dot(&mut self) -> Result<bool, LexError> {
        if !self.rest().starts_with('.') {
            return Ok(false);
        }
        let Some(tok) = self.scan_end_of_line(1, TokenKind::Dot) else {
            return Ok(false);
        };
        self.tokens.push(tok);
        self.call(LexStep::PipelessText)?;
        Ok(true)
    }

    fn class_name(&mut self) -> Result<bool, LexError> {
        let Some(after) = self.rest().strip_prefix('.') else {
            return Ok(false);
        };
        let run = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(after.len());
        let name = &after[..run];
        if name.chars().any(|c| c.is_ascii_alphabetic() || c == '_') {
            let val = name.to_string();
            self.emit(TokenKind::Class { val }, 1 + run);
            return Ok(true);
        }
        if run > 0 {
            return Err(self.error(LexErrorKind::InvalidClassName { name: None }));
        }
        let name = bad_selector(after);
        Err(self.error(LexErrorKind::InvalidClassName { name: Some(name) }))
    }

    fn attrs(&mut self) -> Result<bool, LexError> {
        if !self.rest().starts_with('(') {
            return Ok(false);
        }
        let tok = self.tok(TokenKind::StartAttributes);
        let range = self.bracket_expression(0, ')')?;
        self.increment_column(1);
        self.push_end(tok);
        self.consume(range.end + 1);

        let mut remaining = range.src;
        while !remaining.is_empty() {
            remaining = self.attribute(&remaining)?;
        }

        let tok = self.tok(TokenKind::EndAttributes);
        self.increment_column(1);
        self.push_end(tok);
        Ok(true)
    }

    fn skip_whitespace(&mut self, chars: &[char], mut i: usize) -> usize {
        while i < chars.len() && is_attr_space(chars[i]) {
            if chars[i] == '\n' {
                self.increment_line(1);
            } else {
                self.increment_column(1);
            }
            i += 1;
        }
        i
    }

    /// Lex one `key[=value]` pair and return what is left of `src`.
    fn attribute(&mut self, src: &str) -> Result<String, LexError> {
        let chars: Vec<char> = src.chars().collect();
        let mut i = self.skip_whitespace(&chars, 0);
        if i == chars.len() {
            return Ok(String::new());
        }
        let start = self.span_here();

        let mut quote = None;
        if chars[i] == '\'' || chars[i] == '"' {
            quote = Some(chars[i]);
            self.increment_column(1);
            i += 1;
        }
        let mut key = String::new();
        while i < chars.len() {
            let ch = chars[i];
            if let Some(q) = quote {
                if ch == q {
                    self.increment_column(1);
                    i += 1;
                    break;
                }
            } else if is_attr_space(ch) || ch == '=' {
                break;
            }
            key.push(ch);
            if ch == '\n' {
                self.increment_line(1);
            } else {
                self.increment_column(1);
            }
            i += 1;
        }

        if key.is_empty() {
            return Err(self.error(LexErrorKind::EmptyAttributeName));
        }
        let invalid: String = key.chars().filter(|c| !is_attr_name_char(*c)).collect();
        if !invalid.is_empty() {
            return Err(self.error(LexErrorKind::InvalidAttributeName { invalid }));
        }

        i = self.skip_whitespace(&chars, i);

        let val = if chars.get(i) == Some(&'=') {
            self.increment_column(1);
            i = self.skip_whitespace(&chars, i + 1);
            quote = None;
            if i < chars.len() && (chars[i] == '\'' || chars[i] == '"') {
                quote = Some(chars[i]);
                self.increment_column(1);
                i += 1;
            }
            let mut value = String::new();
            while i < chars.len() {
                let ch = chars[i];
                if let Some(q) = quote {
                    if ch == q {
                        self.increment_column(1);
                        i += 1;
                        break;
                    }
                    if ch == '\\' && i + 1 < chars.len() {
                        value.push(match chars[i + 1] {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                        self.increment_column(2);
                        i += 2;
                        continue;
                    }
                } else if is_attr_space(ch) {
                    break;
                }
                value.push(ch);
                if ch == '\n' {
                    self.increment_line(1);
                } else {
                    self.increment_column(1);
                }
                i += 1;
            }
            AttrValue::Str(value)
        } else {
            AttrValue::True
        };

        let tok = Token::new(TokenKind::Attribute { name: key, val }, start, Position {
            line: self.line,
            column: self.col,
        });
        self.push_end(tok);

        if quote.is_some() {
            if let Some(&found) = chars.get(i) {
                if !is_attr_space(found) {
                    return Err(self.error(LexErrorKind::MalformedAttribute { found }));
                }
            }
        }

        i = self.skip_whitespace(&chars, i);
        Ok(chars[i..].iter().collect())
    }

    /// Width of the indentation that follows the leading newline, fixing
    /// the indentation style on first use.
    fn scan_indentation(&mut self) -> Option<usize> {
        let after = self.rest().strip_prefix('\n')?;
        let tabs = after.len() - after.trim_start_matches('\t').len();
        let spaces = after.len() - after.trim_start_matches(' ').len();
        Some(match self.indent_style {
            Some(IndentStyle::Tabs) => tabs,
            Some(IndentStyle::Spaces) => spaces,
            None if tabs > 0 => {
                self.indent_style = Some(IndentStyle::Tabs);
                tabs
            }
            None => {
                if spaces > 0 {
                    self.indent_style = Some(IndentStyle::Spaces);
                }
                spaces
            }
        })
    }

    fn line_indent(&self, line: &str) -> usize {
        let unit = match self.indent_style {
            Some(IndentStyle::Tabs) => '\t',
            _ => ' ',
        };
        line.len() - line.trim_start_matches(unit).len()
    }

    fn top(&self) -> usize {
        self.indent_stack.last().copied().unwrap_or(0)
    }

    fn indent(&mut self) -> Result<bool, LexError> {
        let Some(indents) = self.scan_indentation() else {
            return Ok(false);
        };
        self.increment_line(1);
        self.consume(indents + 1);

        if self.rest().starts_with([' ', '\t']) {
            return Err(self.error(LexErrorKind::InvalidIndentation));
        }
        if self.rest().starts_with('\n') {
            self.interpolation_allowed = true;
            return Ok(true);
        }

        if indents < self.top() {
            let mut outdents = 0;
            while self.top() > indents {
                let outer = self.indent_stack[self.indent_stack.len() - 2];
                if outer < indents {
                    return Err(self.error(LexErrorKind::InconsistentIndentation {
                        outer,
                        inner: self.top(),
                    }));
                }
                outdents += 1;
                self.indent_stack.pop();
            }
            trace!(outdents, width = indents, "outdent");
            for _ in 0..outdents {
                self.col = 1;
                let tok = self.tok(TokenKind::Outdent);
                self.col = self.top() + 1;
                self.push_end(tok);
            }
        } else if indents > 0 && indents != self.top() {
            trace!(width = indents, "indent");
            let tok = self.tok(TokenKind::Indent { val: indents });
            self.col = 1 + indents;
            self.push_end(tok);
            self.indent_stack.push(indents);
        } else {
            let tok = self.tok(TokenKind::Newline);
            self.col = 1 + self.top().min(indents);
            self.push_end(tok);
        }

        self.interpolation_allowed = true;
        Ok(true)
    }

    /// Consume the lines indented deeper than the current level verbatim.
    fn pipeless_text(&mut self, indents: Option<usize>) -> Result<bool, LexError> {
        while self.call(LexStep::Blank)? {}

        let scanned = self.scan_indentation();
        let Some(indents) = indents.or(scanned) else {
            return Ok(false);
        };
        let top = self.top();
        if indents <= top {
            return Ok(false);
        }

        let rest = self.rest();
        let mut lines: Vec<String> = Vec::new();
        let mut indented: Vec<bool> = Vec::new();
        let mut ptr = 0;
        loop {
            let body = ptr + 1;
            let line_end = rest[body..].find('\n').map_or(rest.len(), |i| body + i);
            let line = &rest[body..line_end];
            let line_indents = self.line_indent(line);
            let deep_enough = line_indents >= indents;
            indented.push(deep_enough);
            let matched = deep_enough || line.trim().is_empty();
            if matched {
                ptr = line_end;
                lines.push(line.chars().skip(indents).collect());
            } else if line_indents > top {
                // shallower than the first line but still nested: retry
                return self.pipeless_text(Some(line_indents));
            }
            if !(matched && ptr < rest.len()) {
                break;
            }
        }

        let start = self.tok(TokenKind::StartPipelessText);
        self.push_end(start);
        self.consume(ptr);
        if self.rest().is_empty() {
            while lines.last().is_some_and(String::is_empty) {
                lines.pop();
            }
        }
        for (i, line) in lines.iter().enumerate() {
            self.increment_line(1);
            let newline = (i != 0).then(|| self.tok(TokenKind::Newline));
            if indented[i] {
                self.increment_column(indents);
            }
            if let Some(tok) = newline {
                self.push_end(tok);
            }
            self.add_text(false, line)?;
        }
        let end = self.tok(TokenKind::EndPipelessText);
        self.push_end(end);
        Ok(true)
    }

    fn text(&mut self) -> Result<bool, LexError> {
        let rest = self.rest();
        let line = rest.split('\n').next().unwrap_or_default();
        let (skip, val) = if let Some(after) = line.strip_prefix('|') {
            match after.strip_prefix(' ') {
                Some(body) if !body.is_empty() => (2, body),
                _ => (1, after),
            }
        } else if let Some(after) = line.strip_prefix(' ') {
            if after.is_empty() { (0, line) } else { (1, after) }
        } else {
            return Ok(false);
        };
        let val = val.to_string();
        self.consume(skip + val.len());
        self.increment_column(skip);
        self.add_text(false, &val)?;
        Ok(true)
    }

    fn text_html(&mut self) -> Result<bool, LexError> {
        if !self.rest().starts_with('<') {
            return Ok(false);
        }
        let val = self.rest().split('\n').next().unwrap_or_default().to_string();
        self.consume(val.len());
        self.add_text(true, &val)?;
        Ok(true)
    }

    fn comment(&mut self) -> Result<bool, LexError> {
        let Some(after) = self.rest().strip_prefix("//") else {
            return Ok(false);
        };
        let buffer = !after.starts_with('-');
        let line = after.split('\n').next().unwrap_or_default();
        let val = if buffer { line } else { &line[1..] }.to_string();
        let len = 2 + line.len();
        self.interpolation_allowed = buffer;
        self.emit(TokenKind::Comment { val, buffer }, len);
        self.call(LexStep::PipelessText)?;
        Ok(true)
    }

    fn slash(&mut self) -> bool {
        if !self.rest().starts_with('/') {
            return false;
        }
        self.emit(TokenKind::Slash, 1);
        true
    }

    fn colon(&mut self) -> bool {
        let Some(after) = self.rest().strip_prefix(':') else {
            return false;
        };
        let spaces = after.len() - after.trim_start_matches(' ').len();
        if spaces == 0 {
            return false;
        }
        self.emit(TokenKind::Colon, 1 + spaces);
        true
    }

    // -- text and interpolation --

    fn find_marker(&self, value: &str) -> Option<(usize, Marker)> {
        for (i, ch) in value.char_indices() {
            let at = &value[i..];
            if ch == ']' && self.interpolated {
                return Some((i, Marker::End));
            }
            if !self.interpolation_allowed {
                continue;
            }
            if at.starts_with("\\#[") {
                return Some((i, Marker::EscapedTag));
            }
            if at.starts_with("\\#{") || at.starts_with("\\!{") {
                return Some((i, Marker::EscapedCode(at[1..].chars().next().unwrap_or('#'))));
            }
            if at.starts_with("#[") {
                return Some((i, Marker::Tag));
            }
            if at.starts_with("#{") || at.starts_with("!{") {
                return Some((i, Marker::Code(ch)));
            }
        }
        None
    }

    /// Emit text, splitting out `#[...]` tag interpolations (lexed by a
    /// nested lexer), `#{...}`/`!{...}` code interpolations, and the `]`
    /// that closes the interpolation being lexed.
    fn add_text(&mut self, html: bool, value: &str) -> Result<(), LexError> {
        let mut value = value.to_string();
        let mut start = 0;
        // Escaped markers are folded into the next text token.
        let mut prefix = String::new();
        let mut escaped = 0;
        loop {
            let rest = &value[start..];
            match self.find_marker(rest) {
                Some((i, Marker::EscapedTag)) => {
                    prefix.push_str(&rest[..i]);
                    prefix.push_str("#[");
                    escaped += 1;
                    start += i + 3;
                }
                Some((i, Marker::EscapedCode(sigil))) => {
                    prefix.push_str(&rest[..i]);
                    prefix.push(sigil);
                    prefix.push('{');
                    escaped += 1;
                    start += i + 3;
                }
                Some((i, Marker::Tag)) => {
                    prefix.push_str(&rest[..i]);
                    self.push_text(html, mem::take(&mut prefix), escaped);
                    escaped = 0;

                    let tok = self.tok(TokenKind::StartInterpolation);
                    self.increment_column(2);
                    self.push_end(tok);

                    let mut child = self.nested(&rest[i + 2..]);
                    child.run()?;
                    self.col = child.col;
                    self.tokens.append(&mut child.tokens);

                    let tok = self.tok(TokenKind::EndInterpolation);
                    self.increment_column(1);
                    self.push_end(tok);

                    let tail = child.rest();
                    if value.ends_with(tail) {
                        start = value.len() - tail.len();
                    } else {
                        value = tail.to_string();
                        start = 0;
                    }
                }
                Some((i, Marker::Code(sigil))) => {
                    prefix.push_str(&rest[..i]);
                    self.push_text(html, mem::take(&mut prefix), escaped);
                    escaped = 0;
                    let range = match brackets::parse_until(rest, i + 2, '}') {
                        Ok(range) => range,
                        Err(BracketError::EndOfString { .. }) => {
                            let kind = LexErrorKind::NoEndBracket { expected: '}' };
                            return Err(self.error(kind));
                        }
                        Err(BracketError::Mismatched {
                            expected, found, ..
                        }) => {
                            let kind = LexErrorKind::BracketMismatch { expected, found };
                            return Err(self.error(kind));
                        }
                    };
                    start += range.end + 1;

                    let tok = self.tok(TokenKind::InterpolatedCode {
                        val: range.src.clone(),
                        buffer: true,
                        must_escape: sigil == '#',
                    });
                    self.increment_column(2);
                    self.advance_over(&range.src);
                    self.increment_column(1);
                    self.push_end(tok);
                }
                Some((i, Marker::End)) => {
                    prefix.push_str(&rest[..i]);
                    if !prefix.is_empty() {
                        self.push_text(html, prefix, escaped);
                    }
                    self.ended = true;
                    self.input = format!("{}{}", &rest[i + 1..], self.rest());
                    self.pos = 0;
                    return Ok(());
                }
                None => {
                    prefix.push_str(rest);
                    self.push_text(html, prefix, escaped);
                    return Ok(());
                }
            }
        }
    }

    fn push_text(&mut self, html: bool, val: String, escaped: usize) {
        let width = char_width(&val) + escaped;
        let kind = if html {
            TokenKind::TextHtml { val }
        } else {
            TokenKind::Text { val }
        };
        let tok = self.tok(kind);
        self.increment_column(width);
        self.push_end(tok);
    }
}

fn char_width(s: &str) -> usize {
    s.chars().count()
}

const fn is_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

const fn is_attr_space(c: char) -> bool {
    matches!(c, ' ' | '\n' | '\t')
}

/// Byte length of the leading `[-\w]+` run.
fn word_dash_len(s: &str) -> usize {
    s.find(|c: char| !(is_word(c) || c == '-'))
        .unwrap_or(s.len())
}

/// `keyword` followed by at least one space; returns the length through the spaces.
fn keyword_spaces(s: &str, keyword: &str) -> Option<usize> {
    let after = s.strip_prefix(keyword)?;
    let spaces = after.len() - after.trim_start_matches(' ').len();
    (spaces > 0).then_some(keyword.len() + spaces)
}

/// `keyword` followed by a non-word character or the end of input.
fn at_word_boundary(s: &str, keyword: &str) -> bool {
    s.strip_prefix(keyword)
        .is_some_and(|after| !after.chars().next().is_some_and(is_word))
}

/// The offending selector text for id/class errors: one character plus
/// everything up to the next separator.
fn bad_selector(after: &str) -> String {
    let mut chars = after.chars();
    let mut out: String = chars.next().map(String::from).unwrap_or_default();
    out.extend(chars.take_while(|c| !matches!(c, ' ' | '\t' | '(' | '#' | '.' | ':')));
    out
}

/// Whether mixin call brackets hold attributes (`key=`) rather than arguments.
fn looks_like_attributes(src: &str) -> bool {
    let trimmed = src.trim_start();
    let name = word_dash_len(trimmed);
    name > 0 && trimmed[name..].trim_start_matches(' ').starts_with('=')
}

/// Code points allowed in HTML attribute names.
const fn is_attr_name_char(c: char) -> bool {
    let code = c as u32;
    let control = code <= 0x1F || (code >= 0x7F && code <= 0x9F);
    let punctuation = matches!(c, ' ' | '\'' | '"' | '>' | '/' | '=');
    let noncharacter = (code >= 0xFDD0 && code <= 0xFDEF) || (code & 0xFFFE) == 0xFFFE;
    !(control || punctuation || noncharacter)
}
