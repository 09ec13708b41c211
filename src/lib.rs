//! Compiler for pugneum, an indentation-sensitive markup language that
//! produces static HTML.
//!
//! Source text goes through a fixed pipeline: [`lex`] → [`parse`] →
//! [`Loader::load`] → [`link`] → [`apply_filters`] → [`render`]. Each stage
//! can be used on its own, or all at once through [`render_str`] and
//! [`render_file`].
//!
//! # Quick start
//!
//! ```
//! use pugneum::{Options, render_str};
//!
//! let html = render_str("ul\n  li#first.item one\n  li two\n", &Options::new()).unwrap();
//! assert_eq!(
//!     html,
//!     r#"<!DOCTYPE html><ul><li id="first" class="item">one</li><li>two</li></ul>"#
//! );
//! ```
//!
//! ## Filters
//!
//! ```
//! use pugneum::{FilterSet, Options, render_str};
//!
//! let filters = FilterSet::new().text("shout", |text, _| text.to_uppercase());
//! let options = Options::new().filters(filters);
//! let html = render_str("p\n  :shout\n    hello\n", &options).unwrap();
//! assert_eq!(html, "<!DOCTYPE html><p>HELLO</p>");
//! ```

// Allow noisy pedantic lints that don't add value for
// a library crate.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod ast;
pub mod brackets;
pub mod builder;
pub mod error;
pub mod filters;
pub mod lexer;
pub mod linker;
pub mod loader;
pub mod options;
pub mod parser;
pub mod render;
pub mod token;

use std::collections::HashMap;
use std::path::Path;

use ast::{Extends, FileReference, Include};

pub use ast::{Block, Node};
pub use filters::{Filter, FilterError, FilterErrorKind, FilterOptions, FilterSet, apply_filters};
pub use lexer::{LexError, LexErrorKind, LexOptions, lex};
pub use linker::{LinkError, LinkErrorKind, link};
pub use loader::{LoadError, LoadErrorKind, Loader, load};
pub use options::Options;
pub use parser::{ParseError, ParseErrorKind, ParseOptions, parse};
pub use render::{RenderError, RenderErrorKind, RenderOptions, render};
pub use token::{AttrValue, BlockMode, Span, Token, TokenKind};

/// Unified error type covering every pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A lexer error.
    #[error("{0}")]
    Lex(#[from] LexError),
    /// A parser error.
    #[error("{0}")]
    Parse(#[from] ParseError),
    /// An include could not be resolved or read.
    #[error("{0}")]
    Load(#[from] LoadError),
    /// A linker error.
    #[error("{0}")]
    Link(#[from] LinkError),
    /// A filter error.
    #[error("{0}")]
    Filter(#[from] FilterError),
    /// A render error.
    #[error("{0}")]
    Render(#[from] RenderError),
}

impl Error {
    /// Namespaced code, e.g. `PUGNEUM:UNEXPECTED_TEXT`.
    #[must_use]
    pub fn code(&self) -> String {
        match self {
            Self::Lex(e) => e.code(),
            Self::Parse(e) => e.code(),
            Self::Load(e) => e.code(),
            Self::Link(e) => e.code(),
            Self::Filter(e) => e.code(),
            Self::Render(e) => e.code(),
        }
    }

    /// The message without the location header or excerpt.
    #[must_use]
    pub fn msg(&self) -> String {
        match self {
            Self::Lex(e) => e.msg(),
            Self::Parse(e) => e.msg(),
            Self::Load(e) => e.msg(),
            Self::Link(e) => e.msg(),
            Self::Filter(e) => e.msg(),
            Self::Render(e) => e.msg(),
        }
    }

    #[must_use]
    pub const fn span(&self) -> &Span {
        match self {
            Self::Lex(e) => &e.span,
            Self::Parse(e) => &e.span,
            Self::Load(e) => &e.span,
            Self::Link(e) => &e.span,
            Self::Filter(e) => &e.span,
            Self::Render(e) => &e.span,
        }
    }
}

/// Template sources by file name, kept after loading so that errors from
/// the later stages can show an excerpt of the file they point into.
#[derive(Default)]
struct Sources {
    files: HashMap<Option<String>, String>,
}

impl Sources {
    fn new(filename: Option<&str>, source: &str, tree: &Block) -> Self {
        let mut sources = Self::default();
        sources
            .files
            .insert(filename.map(str::to_string), source.to_string());
        sources.collect(&tree.nodes);
        sources
    }

    fn collect(&mut self, nodes: &[Node]) {
        for node in nodes {
            if let Node::Include(Include { file, .. }) | Node::Extends(Extends { file, .. }) = node
            {
                self.add_file(file);
            }
            if let Some(children) = node.children() {
                self.collect(children);
            }
        }
    }

    fn add_file(&mut self, file: &FileReference) {
        let (Some(path), Some(contents), Some(ast)) = (&file.full_path, &file.contents, &file.ast)
        else {
            return;
        };
        let name = Some(path.to_string_lossy().into_owned());
        if self.files.contains_key(&name) {
            return;
        }
        self.files.insert(name, contents.clone());
        self.collect(&ast.nodes);
    }

    /// Fill in the source of the file `err` points into, unless it has one.
    fn attach(&self, err: impl Into<Error>) -> Error {
        let mut err = err.into();
        let Some(source) = self.files.get(&err.span().file) else {
            return err;
        };
        let src = match &mut err {
            Error::Lex(e) => &mut e.src,
            Error::Parse(e) => &mut e.src,
            Error::Load(e) => &mut e.src,
            Error::Link(e) => &mut e.src,
            Error::Filter(e) => &mut e.src,
            Error::Render(e) => &mut e.src,
        };
        if src.is_none() {
            *src = Some(source.clone());
        }
        err
    }
}

fn compile_with_sources(
    source: &str,
    filename: Option<&str>,
    options: &Options,
) -> Result<(Block, Sources), Error> {
    let mut lex_options = LexOptions::new();
    let mut parse_options = ParseOptions::new().src(source);
    if let Some(filename) = filename {
        lex_options = lex_options.filename(filename);
        parse_options = parse_options.filename(filename);
    }
    let tokens = lex(source, &lex_options)?;
    let tree = parse(&tokens, &parse_options)?;
    let tree = options.loader().load(tree, filename, Some(source))?;
    let sources = Sources::new(filename, source, &tree);
    let tree = link(tree).map_err(|e| sources.attach(e))?;
    Ok((tree, sources))
}

fn render_source(
    source: &str,
    filename: Option<&str>,
    options: &Options,
) -> Result<String, Error> {
    let (tree, sources) = compile_with_sources(source, filename, options)?;
    let tree = apply_filters(tree, &options.filters).map_err(|e| sources.attach(e))?;
    render(&tree, &options.render_options()).map_err(|e| sources.attach(e))
}

/// Lex, parse, load and link `source` into a tree ready for filtering.
pub fn compile(source: &str, filename: Option<&str>, options: &Options) -> Result<Block, Error> {
    compile_with_sources(source, filename, options).map(|(tree, _)| tree)
}

/// Render a template source string to HTML.
pub fn render_str(source: &str, options: &Options) -> Result<String, Error> {
    render_source(source, options.filename.as_deref(), options)
}

/// Read and render a template file; its path becomes the filename used
/// for relative includes and error locations.
pub fn render_file(path: impl AsRef<Path>, options: &Options) -> Result<String, Error> {
    let path = path.as_ref();
    let filename = path.to_string_lossy().into_owned();
    let source = std::fs::read_to_string(path).map_err(|e| LoadError {
        kind: LoadErrorKind::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        },
        span: Span::new(Some(filename.clone()), 0, 0),
        src: None,
    })?;
    render_source(&source, Some(&filename), options)
}
