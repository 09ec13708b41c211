use std::collections::HashMap;
use std::fmt;

use tracing::{debug, warn};

use crate::ast::{
    Attribute, Block, BlockComment, Code, Comment, Doctype, Extends, FileReference, Filter,
    INLINE_TAGS, Include, IncludeFilter, InterpolatedTag, Mixin, NamedBlock, Node, RawInclude, Tag,
    Text,
};
use crate::error;
use crate::token::{AttrValue, BlockMode, Position, Span, Token, TokenKind};

/// Classifies a parser error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// `expect` saw the wrong token.
    Expected {
        expected: &'static str,
        found: &'static str,
    },
    /// No expression starts with this token.
    UnexpectedToken { found: &'static str },
    /// Token after a tag's attributes that cannot follow it.
    UnexpectedInTag {
        found: &'static str,
        self_closing_allowed: bool,
    },
    /// Token inside a pipeless text block that is not text.
    UnexpectedInTextBlock { found: &'static str },
    DuplicateId,
    DuplicateAttribute { name: String },
    MixinWithoutBody { name: String },
    BlockOutsideMixin,
    RawIncludeBlock,
}

impl ParseErrorKind {
    /// The reason part of the error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Expected { .. }
            | Self::UnexpectedToken { .. }
            | Self::UnexpectedInTag { .. }
            | Self::UnexpectedInTextBlock { .. } => "INVALID_TOKEN",
            Self::DuplicateId => "DUPLICATE_ID",
            Self::DuplicateAttribute { .. } => "DUPLICATE_ATTRIBUTE",
            Self::MixinWithoutBody { .. } => "MIXIN_WITHOUT_BODY",
            Self::BlockOutsideMixin => "BLOCK_OUTSIDE_MIXIN",
            Self::RawIncludeBlock => "RAW_INCLUDE_BLOCK",
        }
    }
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expected { expected, found } => {
                write!(f, "expected \"{expected}\", but got \"{found}\"")
            }
            Self::UnexpectedToken { found } => write!(f, "unexpected token \"{found}\""),
            Self::UnexpectedInTag {
                found,
                self_closing_allowed,
            } => write!(
                f,
                "Unexpected token `{found}` expected `text`, `interpolated-code`, `:`{} \
                 `newline` or `eos`",
                if *self_closing_allowed { ", `slash`," } else { "," }
            ),
            Self::UnexpectedInTextBlock { found } => write!(f, "Unexpected token type: {found}"),
            Self::DuplicateId => write!(f, "Duplicate attribute \"id\" is not allowed."),
            Self::DuplicateAttribute { name } => {
                write!(f, "Duplicate attribute \"{name}\" is not allowed.")
            }
            Self::MixinWithoutBody { name } => write!(f, "Mixin {name} declared without body"),
            Self::BlockOutsideMixin => write!(
                f,
                "Anonymous blocks are not allowed unless they are part of a mixin."
            ),
            Self::RawIncludeBlock => write!(f, "Raw inclusion cannot contain a block"),
        }
    }
}

/// Error produced during parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", self.message())]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub span: Span,
    pub src: Option<String>,
}

impl ParseError {
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

/// Where in the grammar a parser hook is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseContext {
    /// A token that starts no built-in expression.
    Expression,
    /// A token ending a run of inline text.
    Text,
    /// A token after a tag's id, class and attribute groups.
    TagAttribute,
    /// A token where a tag's inline content would go.
    Tag,
    /// A non-text token inside a pipeless text block.
    TextBlock,
}

impl fmt::Display for ParseContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expression => write!(f, "expressionTokens"),
            Self::Text => write!(f, "textTokens"),
            Self::TagAttribute => write!(f, "tagAttributeTokens"),
            Self::Tag => write!(f, "tagTokens"),
            Self::TextBlock => write!(f, "textBlockTokens"),
        }
    }
}

/// The partial tag being assembled by `tag()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagParts {
    pub span: Span,
    pub attrs: Vec<Attribute>,
    pub block: Block,
    pub self_closing: bool,
    pub text_only: bool,
    /// Attribute names seen so far, for duplicate detection.
    pub attribute_names: Vec<String>,
}

impl TagParts {
    fn new(span: Span) -> Self {
        Self {
            block: Block::empty(span.clone()),
            span,
            attrs: Vec::new(),
            self_closing: false,
            text_only: false,
            attribute_names: Vec::new(),
        }
    }
}

/// What a hook may touch, per context.
pub enum HookTarget<'t> {
    Expression,
    Text(&'t mut Vec<Node>),
    TagAttribute(&'t mut TagParts),
    Tag(&'t mut TagParts),
    TextBlock(&'t mut Block),
}

/// Result of consulting a hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    /// Not handled; the parser falls back to its own behavior.
    Declined,
    /// Tokens consumed, nothing to insert.
    Handled,
    /// Tokens consumed, insert this node.
    Node(Node),
}

/// A parser extension for one context and token type.
pub trait ParserHook {
    fn handle(
        &self,
        parser: &mut Parser<'_>,
        target: HookTarget<'_>,
    ) -> Result<HookOutcome, ParseError>;
}

/// Registering two hooks for the same context and token type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Multiple plugin handlers found for context \"{context}\", token type \"{token}\"")]
pub struct DuplicateHook {
    pub context: ParseContext,
    pub token: String,
}

/// Registry of parser hooks, at most one per context and token type.
#[derive(Default)]
pub struct ParserPlugins {
    hooks: HashMap<(ParseContext, String), Box<dyn ParserHook>>,
}

impl ParserPlugins {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook` for `token` in `context`.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateHook` if that pair already has a hook.
    pub fn register(
        &mut self,
        context: ParseContext,
        token: &str,
        hook: impl ParserHook + 'static,
    ) -> Result<(), DuplicateHook> {
        let key = (context, token.to_string());
        if self.hooks.contains_key(&key) {
            return Err(DuplicateHook {
                context,
                token: token.to_string(),
            });
        }
        self.hooks.insert(key, Box::new(hook));
        Ok(())
    }

    fn get(&self, context: ParseContext, token: &str) -> Option<&dyn ParserHook> {
        self.hooks
            .get(&(context, token.to_string()))
            .map(AsRef::as_ref)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

/// Options for a parser run.
#[derive(Clone, Copy, Default)]
pub struct ParseOptions<'a> {
    pub filename: Option<&'a str>,
    /// Source text, for error excerpts.
    pub src: Option<&'a str>,
    pub plugins: Option<&'a ParserPlugins>,
}

impl<'a> ParseOptions<'a> {
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
    pub const fn src(mut self, src: &'a str) -> Self {
        self.src = Some(src);
        self
    }

    #[must_use]
    pub const fn plugins(mut self, plugins: &'a ParserPlugins) -> Self {
        self.plugins = Some(plugins);
        self
    }
}

/// Parse a token stream into a document tree rooted at a `Block`.
///
/// # Errors
///
/// Returns `ParseError` on unexpected tokens, duplicate attributes,
/// bodiless mixins, `block` outside a mixin, or a block under a raw include.
pub fn parse(tokens: &[Token], options: &ParseOptions<'_>) -> Result<Block, ParseError> {
    let block = Parser::new(tokens, options).parse()?;
    debug!(
        nodes = block.nodes.len(),
        file = options.filename.unwrap_or("<anonymous>"),
        "parsed template"
    );
    Ok(block)
}

/// Recursive-descent parser over a token slice with one-token pushback.
pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    deferred: Vec<Token>,
    eos: Token,
    filename: Option<String>,
    src: Option<&'a str>,
    plugins: Option<&'a ParserPlugins>,
    in_mixin: usize,
}

impl<'a> Parser<'a> {
    #[must_use]
    pub fn new(tokens: &'a [Token], options: &ParseOptions<'a>) -> Self {
        let eos = tokens.last().map_or_else(
            || {
                Token::new(TokenKind::Eos, Span::new(None, 1, 1), Position {
                    line: 1,
                    column: 1,
                })
            },
            |last| Token::new(TokenKind::Eos, last.span.clone(), last.end),
        );
        Self {
            tokens,
            pos: 0,
            deferred: Vec::new(),
            eos,
            filename: options.filename.map(str::to_string),
            src: options.src,
            plugins: options.plugins,
            in_mixin: 0,
        }
    }

    fn parse(mut self) -> Result<Block, ParseError> {
        let mut block = Block::empty(Span::new(self.filename.clone(), 0, 0));
        while self.peek_name() != "eos" {
            match self.peek_name() {
                "newline" => {
                    self.advance();
                }
                "text-html" => {
                    let nodes = self.parse_text_html()?;
                    block.nodes.extend(nodes);
                }
                _ => {
                    let expr = self.parse_expr()?;
                    splice(&mut block.nodes, expr);
                }
            }
        }
        Ok(block)
    }

    // -- token stream, also available to hooks --

    /// The next token without consuming it.
    #[must_use]
    pub fn peek(&self) -> &Token {
        self.deferred
            .last()
            .or_else(|| self.tokens.get(self.pos))
            .unwrap_or(&self.eos)
    }

    fn peek_name(&self) -> &'static str {
        self.peek().name()
    }

    /// Consume and return the next token; past the end this is `eos`.
    pub fn advance(&mut self) -> Token {
        if let Some(tok) = self.deferred.pop() {
            return tok;
        }
        match self.tokens.get(self.pos) {
            Some(tok) => {
                self.pos += 1;
                tok.clone()
            }
            None => self.eos.clone(),
        }
    }

    /// Push a token back so the next `peek`/`advance` sees it.
    pub fn defer(&mut self, tok: Token) {
        self.deferred.push(tok);
    }

    /// Consume a token of type `name` or fail.
    ///
    /// # Errors
    ///
    /// `INVALID_TOKEN` if the next token has another type.
    pub fn expect(&mut self, name: &'static str) -> Result<Token, ParseError> {
        if self.peek_name() == name {
            return Ok(self.advance());
        }
        Err(self.error(
            ParseErrorKind::Expected {
                expected: name,
                found: self.peek_name(),
            },
            &self.peek().span,
        ))
    }

    fn accept(&mut self, name: &str) -> Option<Token> {
        (self.peek_name() == name).then(|| self.advance())
    }

    /// Build an error located at `span`.
    #[must_use]
    pub fn error(&self, kind: ParseErrorKind, span: &Span) -> ParseError {
        ParseError {
            kind,
            span: self.span_of(span),
            src: self.src.map(str::to_string),
        }
    }

    fn span_of(&self, span: &Span) -> Span {
        Span::new(
            self.filename.clone().or_else(|| span.file.clone()),
            span.line,
            span.column,
        )
    }

    fn run_hook(
        &mut self,
        context: ParseContext,
        target: HookTarget<'_>,
    ) -> Result<HookOutcome, ParseError> {
        let Some(plugins) = self.plugins else {
            return Ok(HookOutcome::Declined);
        };
        match plugins.get(context, self.peek_name()) {
            Some(hook) => hook.handle(self, target),
            None => Ok(HookOutcome::Declined),
        }
    }

    // -- grammar --

    /// Parse one expression at the current token.
    ///
    /// # Errors
    ///
    /// Any `ParseError` from the expression's grammar.
    pub fn parse_expr(&mut self) -> Result<Node, ParseError> {
        match self.peek_name() {
            "tag" => self.parse_tag(),
            "mixin" => self.parse_mixin(),
            "block" => self.parse_block(),
            "mixin-block" => self.parse_mixin_block(),
            "extends" => self.parse_extends(),
            "include" => self.parse_include(),
            "doctype" => self.parse_doctype(),
            "filter" => self.parse_filter().map(Node::Filter),
            "comment" => self.parse_comment(),
            "text" | "interpolated-code" | "start-interpolation" => self.parse_text(true),
            "text-html" => {
                let span = self.span_of(&self.peek().span);
                let nodes = self.parse_text_html()?;
                Ok(Node::Block(Block { span, nodes }))
            }
            "dot" => {
                let tok = self.advance();
                let block = self.parse_text_block()?;
                Ok(Node::Block(
                    block.unwrap_or_else(|| Block::empty(self.span_of(&tok.span))),
                ))
            }
            "call" => self.parse_call(),
            "interpolation" => self.parse_interpolation(),
            "yield" => {
                let tok = self.advance();
                Ok(Node::YieldBlock(self.span_of(&tok.span)))
            }
            "id" | "class" => {
                let next = self.peek();
                let div = Token::new(
                    TokenKind::Tag { val: "div".into() },
                    next.span.clone(),
                    next.end,
                );
                self.defer(div);
                self.parse_expr()
            }
            found => match self.run_hook(ParseContext::Expression, HookTarget::Expression)? {
                HookOutcome::Node(node) => Ok(node),
                HookOutcome::Handled => {
                    Ok(Node::Block(Block::empty(self.span_of(&self.peek().span))))
                }
                HookOutcome::Declined => Err(self.error(
                    ParseErrorKind::UnexpectedToken { found },
                    &self.peek().span,
                )),
            },
        }
    }

    fn text_node(&self, tok: &Token, val: String) -> Node {
        Node::Text(Text {
            span: self.span_of(&tok.span),
            val,
            is_html: false,
        })
    }

    fn code_node(&self, tok: Token) -> Node {
        let span = self.span_of(&tok.span);
        let (val, buffer, must_escape) = match tok.kind {
            TokenKind::InterpolatedCode {
                val,
                buffer,
                must_escape,
            } => (val, buffer, must_escape),
            other => (other.val().unwrap_or_default().to_string(), true, true),
        };
        Node::Code(Code {
            span,
            val,
            buffer,
            must_escape,
            is_inline: true,
        })
    }

    /// Inline text, code and tag interpolations; one node or a `Block`.
    fn parse_text(&mut self, block_mode: bool) -> Result<Node, ParseError> {
        let span = self.span_of(&self.peek().span);
        let mut tags = Vec::new();
        loop {
            match self.peek_name() {
                "text" => {
                    let tok = self.advance();
                    let val = tok.kind.val().unwrap_or_default().to_string();
                    tags.push(self.text_node(&tok, val));
                }
                "interpolated-code" => {
                    let tok = self.advance();
                    tags.push(self.code_node(tok));
                }
                "newline" => {
                    if !block_mode {
                        break;
                    }
                    let tok = self.advance();
                    if matches!(self.peek_name(), "text" | "interpolated-code") {
                        tags.push(self.text_node(&tok, "\n".into()));
                    }
                }
                "start-interpolation" => {
                    self.advance();
                    let expr = self.parse_expr()?;
                    tags.push(expr);
                    self.expect("end-interpolation")?;
                }
                _ => match self.run_hook(ParseContext::Text, HookTarget::Text(&mut tags))? {
                    HookOutcome::Declined => break,
                    HookOutcome::Handled => {}
                    HookOutcome::Node(node) => tags.push(node),
                },
            }
        }
        if tags.len() == 1 {
            if let Some(node) = tags.pop() {
                return Ok(node);
            }
        }
        Ok(Node::Block(Block { span, nodes: tags }))
    }

    /// A run of `<html>` lines, merged into one `Text` per run.
    fn parse_text_html(&mut self) -> Result<Vec<Node>, ParseError> {
        let mut nodes: Vec<Node> = Vec::new();
        let mut current: Option<usize> = None;
        loop {
            match self.peek_name() {
                "text-html" => {
                    let tok = self.advance();
                    let val = tok.kind.val().unwrap_or_default();
                    match current.and_then(|i| nodes.get_mut(i)) {
                        Some(Node::Text(open)) => {
                            open.val.push('\n');
                            open.val.push_str(val);
                        }
                        _ => {
                            nodes.push(Node::Text(Text {
                                span: self.span_of(&tok.span),
                                val: val.to_string(),
                                is_html: true,
                            }));
                            current = Some(nodes.len() - 1);
                        }
                    }
                }
                "indent" => {
                    let block = self.block()?;
                    for node in block.nodes {
                        match node {
                            Node::Text(text) if text.is_html => {
                                match current.and_then(|i| nodes.get_mut(i)) {
                                    Some(Node::Text(open)) => {
                                        open.val.push('\n');
                                        open.val.push_str(&text.val);
                                    }
                                    _ => {
                                        nodes.push(Node::Text(text));
                                        current = Some(nodes.len() - 1);
                                    }
                                }
                            }
                            other => {
                                current = None;
                                nodes.push(other);
                            }
                        }
                    }
                }
                "newline" => {
                    self.advance();
                }
                _ => break,
            }
        }
        Ok(nodes)
    }

    fn parse_comment(&mut self) -> Result<Node, ParseError> {
        let tok = self.expect("comment")?;
        let span = self.span_of(&tok.span);
        let (val, buffer) = match tok.kind {
            TokenKind::Comment { val, buffer } => (val, buffer),
            _ => (String::new(), true),
        };
        Ok(match self.parse_text_block()? {
            Some(block) => Node::BlockComment(BlockComment {
                span,
                val,
                buffer,
                block,
            }),
            None => Node::Comment(Comment { span, val, buffer }),
        })
    }

    fn parse_doctype(&mut self) -> Result<Node, ParseError> {
        let tok = self.expect("doctype")?;
        Ok(Node::Doctype(Doctype {
            span: self.span_of(&tok.span),
            val: tok.kind.val().unwrap_or_default().to_string(),
        }))
    }

    fn parse_include_filter(&mut self) -> Result<IncludeFilter, ParseError> {
        let tok = self.expect("filter")?;
        let attrs = if self.peek_name() == "start-attributes" {
            self.attrs(None)?
        } else {
            Vec::new()
        };
        Ok(IncludeFilter {
            span: self.span_of(&tok.span),
            name: tok.kind.val().unwrap_or_default().to_string(),
            attrs,
        })
    }

    fn parse_filter(&mut self) -> Result<Filter, ParseError> {
        let tok = self.expect("filter")?;
        let span = self.span_of(&tok.span);
        let attrs = if self.peek_name() == "start-attributes" {
            self.attrs(None)?
        } else {
            Vec::new()
        };

        let block = match self.peek_name() {
            "text" => {
                let text = self.advance();
                let val = text.kind.val().unwrap_or_default().to_string();
                Block {
                    span: self.span_of(&text.span),
                    nodes: vec![self.text_node(&text, val)],
                }
            }
            "filter" => Block {
                span: span.clone(),
                nodes: vec![Node::Filter(self.parse_filter()?)],
            },
            _ => self
                .parse_text_block()?
                .unwrap_or_else(|| Block::empty(span.clone())),
        };

        Ok(Filter {
            span,
            name: tok.kind.val().unwrap_or_default().to_string(),
            attrs,
            block,
        })
    }

    fn parse_extends(&mut self) -> Result<Node, ParseError> {
        let tok = self.expect("extends")?;
        let path = self.expect("path")?;
        Ok(Node::Extends(Extends {
            span: self.span_of(&tok.span),
            file: FileReference::new(
                path.kind.val().unwrap_or_default().trim(),
                self.span_of(&path.span),
            ),
        }))
    }

    fn parse_block(&mut self) -> Result<Node, ParseError> {
        let tok = self.expect("block")?;
        let nodes = if self.peek_name() == "indent" {
            self.block()?.nodes
        } else {
            Vec::new()
        };
        let (name, mode) = match tok.kind {
            TokenKind::Block { val, mode } => (val.trim().to_string(), mode),
            _ => (String::new(), BlockMode::Replace),
        };
        Ok(Node::NamedBlock(NamedBlock {
            span: self.span_of(&tok.span),
            name,
            mode,
            nodes,
        }))
    }

    fn parse_mixin_block(&mut self) -> Result<Node, ParseError> {
        let tok = self.expect("mixin-block")?;
        if self.in_mixin == 0 {
            return Err(self.error(ParseErrorKind::BlockOutsideMixin, &tok.span));
        }
        Ok(Node::MixinBlock(self.span_of(&tok.span)))
    }

    fn parse_include(&mut self) -> Result<Node, ParseError> {
        let tok = self.expect("include")?;
        let span = self.span_of(&tok.span);
        let mut filters = Vec::new();
        while self.peek_name() == "filter" {
            filters.push(self.parse_include_filter()?);
        }
        let path = self.expect("path")?;
        let file = FileReference::new(
            path.kind.val().unwrap_or_default().trim(),
            self.span_of(&path.span),
        );

        if file.path.ends_with(".pg") && filters.is_empty() {
            let block = if self.peek_name() == "indent" {
                self.block()?
            } else {
                Block::empty(span.clone())
            };
            return Ok(Node::Include(Include { span, file, block }));
        }
        if self.peek_name() == "indent" {
            return Err(self.error(ParseErrorKind::RawIncludeBlock, &self.peek().span));
        }
        Ok(Node::RawInclude(RawInclude {
            span,
            file,
            filters,
        }))
    }

    fn parse_call(&mut self) -> Result<Node, ParseError> {
        let tok = self.expect("call")?;
        let span = self.span_of(&tok.span);
        let (name, args) = match tok.kind {
            TokenKind::Call { val, args } => (val, args),
            _ => (String::new(), None),
        };
        let mut parts = TagParts::new(span.clone());
        self.tag(&mut parts, false)?;
        Ok(Node::Mixin(Mixin {
            span,
            name,
            args,
            block: (!parts.block.is_empty()).then_some(parts.block),
            call: true,
            attrs: parts.attrs,
        }))
    }

    fn parse_mixin(&mut self) -> Result<Node, ParseError> {
        let tok = self.expect("mixin")?;
        let (name, args) = match tok.kind {
            TokenKind::Mixin { val, args } => (val, args),
            _ => (String::new(), None),
        };
        if self.peek_name() != "indent" {
            return Err(self.error(ParseErrorKind::MixinWithoutBody { name }, &tok.span));
        }
        self.in_mixin += 1;
        let block = self.block();
        self.in_mixin -= 1;
        Ok(Node::Mixin(Mixin {
            span: self.span_of(&tok.span),
            name,
            args,
            block: Some(block?),
            call: false,
            attrs: Vec::new(),
        }))
    }

    /// `start-pipeless-text (text | newline | interpolation)* end-pipeless-text`
    ///
    /// # Errors
    ///
    /// `INVALID_TOKEN` on anything else inside the block.
    pub fn parse_text_block(&mut self) -> Result<Option<Block>, ParseError> {
        let Some(tok) = self.accept("start-pipeless-text") else {
            return Ok(None);
        };
        let mut block = Block::empty(self.span_of(&tok.span));
        while self.peek_name() != "end-pipeless-text" {
            match self.peek_name() {
                "text" => {
                    let tok = self.advance();
                    let val = tok.kind.val().unwrap_or_default().to_string();
                    block.nodes.push(self.text_node(&tok, val));
                }
                "newline" => {
                    let tok = self.advance();
                    block.nodes.push(self.text_node(&tok, "\n".into()));
                }
                "start-interpolation" => {
                    self.advance();
                    let expr = self.parse_expr()?;
                    block.nodes.push(expr);
                    self.expect("end-interpolation")?;
                }
                "interpolated-code" => {
                    let tok = self.advance();
                    block.nodes.push(self.code_node(tok));
                }
                "eos" => {
                    self.expect("end-pipeless-text")?;
                }
                found => match self.run_hook(ParseContext::TextBlock, HookTarget::TextBlock(&mut block))? {
                    HookOutcome::Declined => {
                        return Err(self.error(
                            ParseErrorKind::UnexpectedInTextBlock { found },
                            &self.peek().span,
                        ));
                    }
                    HookOutcome::Handled => {}
                    HookOutcome::Node(node) => block.nodes.push(node),
                },
            }
        }
        self.advance();
        Ok(Some(block))
    }

    /// `indent expr* outdent`
    ///
    /// # Errors
    ///
    /// Any `ParseError` from the nested expressions.
    pub fn block(&mut self) -> Result<Block, ParseError> {
        let tok = self.expect("indent")?;
        let mut block = Block::empty(self.span_of(&tok.span));
        while self.peek_name() != "outdent" {
            match self.peek_name() {
                "newline" => {
                    self.advance();
                }
                "text-html" => {
                    let nodes = self.parse_text_html()?;
                    block.nodes.extend(nodes);
                }
                _ => {
                    let expr = self.parse_expr()?;
                    splice(&mut block.nodes, expr);
                }
            }
        }
        self.expect("outdent")?;
        Ok(block)
    }

    fn parse_interpolation(&mut self) -> Result<Node, ParseError> {
        let tok = self.advance();
        let span = self.span_of(&tok.span);
        let mut parts = TagParts::new(span.clone());
        self.tag(&mut parts, true)?;
        Ok(Node::InterpolatedTag(InterpolatedTag {
            span,
            expr: tok.kind.val().unwrap_or_default().to_string(),
            self_closing: parts.self_closing,
            text_only: parts.text_only,
            attrs: parts.attrs,
            block: parts.block,
        }))
    }

    fn parse_tag(&mut self) -> Result<Node, ParseError> {
        let tok = self.advance();
        let span = self.span_of(&tok.span);
        let name = tok.kind.val().unwrap_or_default().to_string();
        let mut parts = TagParts::new(span.clone());
        self.tag(&mut parts, true)?;
        Ok(Node::Tag(Tag {
            span,
            is_inline: INLINE_TAGS.contains(&name.as_str()),
            name,
            self_closing: parts.self_closing,
            text_only: parts.text_only,
            attrs: parts.attrs,
            block: parts.block,
        }))
    }

    /// `(attrs | class | id)* '.'? (text | code | ':' expr | '/')? newline* block?`
    fn tag(&mut self, parts: &mut TagParts, self_closing_allowed: bool) -> Result<(), ParseError> {
        let mut seen_attrs = false;
        loop {
            match self.peek_name() {
                "id" | "class" => {
                    let tok = self.advance();
                    let name = tok.name();
                    if name == "id" {
                        if parts.attribute_names.iter().any(|n| n == "id") {
                            return Err(self.error(ParseErrorKind::DuplicateId, &tok.span));
                        }
                        parts.attribute_names.push("id".into());
                    }
                    parts.attrs.push(Attribute {
                        span: self.span_of(&tok.span),
                        name: name.to_string(),
                        val: AttrValue::Str(tok.kind.val().unwrap_or_default().to_string()),
                        must_escape: false,
                    });
                }
                "start-attributes" => {
                    if seen_attrs {
                        warn!(
                            file = self.filename.as_deref().unwrap_or("<anonymous>"),
                            line = self.peek().span.line,
                            "You should not have pugneum tags with multiple attributes."
                        );
                    }
                    seen_attrs = true;
                    let attrs = self.attrs(Some(&mut parts.attribute_names))?;
                    parts.attrs.extend(attrs);
                }
                _ => match self.run_hook(ParseContext::TagAttribute, HookTarget::TagAttribute(&mut *parts))? {
                    HookOutcome::Declined => break,
                    HookOutcome::Handled => {}
                    HookOutcome::Node(node) => parts.block.nodes.push(node),
                },
            }
        }

        if self.accept("dot").is_some() {
            parts.text_only = true;
        }

        match self.peek_name() {
            "text" | "interpolated-code" => {
                let text = self.parse_text(false)?;
                splice(&mut parts.block.nodes, text);
            }
            ":" => {
                self.advance();
                let expr = self.parse_expr()?;
                parts.block = match expr {
                    Node::Block(block) => block,
                    other => Block {
                        span: parts.span.clone(),
                        nodes: vec![other],
                    },
                };
            }
            "newline" | "indent" | "outdent" | "eos" | "start-pipeless-text"
            | "end-interpolation" => {}
            "slash" if self_closing_allowed => {
                self.advance();
                parts.self_closing = true;
            }
            found => match self.run_hook(ParseContext::Tag, HookTarget::Tag(&mut *parts))? {
                HookOutcome::Declined => {
                    return Err(self.error(
                        ParseErrorKind::UnexpectedInTag {
                            found,
                            self_closing_allowed,
                        },
                        &self.peek().span,
                    ));
                }
                HookOutcome::Handled => {}
                HookOutcome::Node(node) => parts.block.nodes.push(node),
            },
        }

        while self.accept("newline").is_some() {}

        if parts.text_only {
            parts.block = self
                .parse_text_block()?
                .unwrap_or_else(|| Block::empty(parts.span.clone()));
        } else if self.peek_name() == "indent" {
            let block = self.block()?;
            parts.block.nodes.extend(block.nodes);
        }
        Ok(())
    }

    /// `start-attributes attribute* end-attributes`
    fn attrs(&mut self, mut names: Option<&mut Vec<String>>) -> Result<Vec<Attribute>, ParseError> {
        self.expect("start-attributes")?;
        let mut attrs = Vec::new();
        loop {
            let tok = self.advance();
            if tok.name() != "attribute" {
                self.defer(tok);
                break;
            }
            let span = self.span_of(&tok.span);
            if let TokenKind::Attribute { name, val } = tok.kind {
                if name != "class" {
                    if let Some(names) = names.as_mut() {
                        if names.contains(&name) {
                            return Err(ParseError {
                                kind: ParseErrorKind::DuplicateAttribute { name },
                                span,
                                src: self.src.map(str::to_string),
                            });
                        }
                        names.push(name.clone());
                    }
                }
                attrs.push(Attribute {
                    span,
                    name,
                    val,
                    must_escape: true,
                });
            }
        }
        self.expect("end-attributes")?;
        Ok(attrs)
    }
}

/// Push `node`, flattening a `Block` into its nodes.
fn splice(nodes: &mut Vec<Node>, node: Node) {
    match node {
        Node::Block(block) => nodes.extend(block.nodes),
        other => nodes.push(other),
    }
}
