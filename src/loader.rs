//! Resolves and reads the files named by `include` and `extends`, and
//! parses template includes into nested trees.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::Error;
use crate::ast::{Block, Extends, FileReference, Include, Node, RawInclude};
use crate::error;
use crate::lexer::{LexOptions, LexerPlugin, lex};
use crate::parser::{ParseOptions, ParserPlugins, parse};
use crate::token::Span;

/// Default bound on nested template includes.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Classifies a loader error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadErrorKind {
    /// A relative path was used but the including file is unknown.
    MissingFilename,
    /// An absolute path was used but no base directory is configured.
    MissingBasedir,
    /// The file could not be read.
    Io { path: PathBuf, message: String },
    /// Includes nested deeper than the configured limit.
    DepthLimit { limit: usize },
}

impl LoadErrorKind {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingFilename => "MISSING_FILENAME",
            Self::MissingBasedir => "MISSING_BASEDIR",
            Self::Io { .. } => "READ_FAILED",
            Self::DepthLimit { .. } => "INCLUDE_DEPTH_EXCEEDED",
        }
    }
}

impl fmt::Display for LoadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFilename => write!(
                f,
                "the \"filename\" option is required to use includes and extends with \"relative\" paths"
            ),
            Self::MissingBasedir => write!(
                f,
                "the \"basedir\" option is required to use includes and extends with \"absolute\" paths"
            ),
            Self::Io { path, message } => {
                write!(f, "could not read {}: {message}", path.display())
            }
            Self::DepthLimit { limit } => {
                write!(f, "includes nested more than {limit} levels deep")
            }
        }
    }
}

/// Error produced while loading included files.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", self.message())]
pub struct LoadError {
    pub kind: LoadErrorKind,
    /// Location of the `include`/`extends` that triggered the load.
    pub span: Span,
    pub src: Option<String>,
}

impl LoadError {
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

type ResolveFn<'a> = dyn Fn(&str, Option<&str>) -> Result<PathBuf, LoadErrorKind> + 'a;
type ReadFn<'a> = dyn Fn(&Path) -> io::Result<Vec<u8>> + 'a;

/// Resolve `path` the default way: a leading `/` is relative to `basedir`,
/// anything else to the directory of the including file `from`.
///
/// # Errors
///
/// `MissingBasedir` or `MissingFilename` when the needed anchor is absent.
pub fn resolve_path(
    path: &str,
    from: Option<&str>,
    basedir: Option<&Path>,
) -> Result<PathBuf, LoadErrorKind> {
    let path = path.trim();
    if let Some(absolute) = path.strip_prefix('/') {
        let base = basedir.ok_or(LoadErrorKind::MissingBasedir)?;
        return Ok(base.join(absolute));
    }
    let from = from.ok_or(LoadErrorKind::MissingFilename)?;
    let dir = Path::new(from.trim()).parent().unwrap_or_else(|| Path::new(""));
    Ok(dir.join(path))
}

/// Loads every file referenced from a tree.
pub struct Loader<'a> {
    basedir: Option<PathBuf>,
    resolver: Option<Box<ResolveFn<'a>>>,
    reader: Option<Box<ReadFn<'a>>>,
    max_depth: usize,
    lexer_plugins: &'a [Box<dyn LexerPlugin>],
    parser_plugins: Option<&'a ParserPlugins>,
}

impl Default for Loader<'_> {
    fn default() -> Self {
        Self {
            basedir: None,
            resolver: None,
            reader: None,
            max_depth: DEFAULT_MAX_DEPTH,
            lexer_plugins: &[],
            parser_plugins: None,
        }
    }
}

impl<'a> Loader<'a> {
    /// A loader on the file system with no base directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory that absolute (`/`-prefixed) paths are resolved against.
    #[must_use]
    pub fn basedir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.basedir = Some(dir.into());
        self
    }

    /// Replace path resolution. The closure receives the path as written
    /// and the including file, if known.
    #[must_use]
    pub fn resolver(
        mut self,
        resolve: impl Fn(&str, Option<&str>) -> Result<PathBuf, LoadErrorKind> + 'a,
    ) -> Self {
        self.resolver = Some(Box::new(resolve));
        self
    }

    /// Replace file reading.
    #[must_use]
    pub fn reader(mut self, read: impl Fn(&Path) -> io::Result<Vec<u8>> + 'a) -> Self {
        self.reader = Some(Box::new(read));
        self
    }

    #[must_use]
    pub const fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    #[must_use]
    pub const fn lexer_plugins(mut self, plugins: &'a [Box<dyn LexerPlugin>]) -> Self {
        self.lexer_plugins = plugins;
        self
    }

    #[must_use]
    pub const fn parser_plugins(mut self, plugins: &'a ParserPlugins) -> Self {
        self.parser_plugins = Some(plugins);
        self
    }

    fn resolve(&self, path: &str, from: Option<&str>) -> Result<PathBuf, LoadErrorKind> {
        match &self.resolver {
            Some(resolve) => resolve(path, from),
            None => resolve_path(path, from, self.basedir.as_deref()),
        }
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        match &self.reader {
            Some(read) => read(path),
            None => std::fs::read(path),
        }
    }

    /// Load every `include`/`extends` in `tree`, which was parsed from
    /// `filename` with source `src`.
    ///
    /// # Errors
    ///
    /// `LoadError` on resolution or read failures and on runaway nesting;
    /// lex and parse errors of included files propagate unchanged.
    pub fn load(
        &self,
        mut tree: Block,
        filename: Option<&str>,
        src: Option<&str>,
    ) -> Result<Block, Error> {
        let mut loaded = 0;
        self.load_nodes(&mut tree.nodes, filename, src, 0, &mut loaded)?;
        debug!(files = loaded, file = filename.unwrap_or("<anonymous>"), "loaded includes");
        Ok(tree)
    }

    fn load_nodes(
        &self,
        nodes: &mut [Node],
        from: Option<&str>,
        src: Option<&str>,
        depth: usize,
        loaded: &mut usize,
    ) -> Result<(), Error> {
        for node in nodes {
            match node {
                Node::Include(Include { span, file, .. }) | Node::Extends(Extends { span, file }) => {
                    self.load_file(file, span, true, from, src, depth, loaded)?;
                }
                Node::RawInclude(RawInclude { span, file, .. }) => {
                    self.load_file(file, span, false, from, src, depth, loaded)?;
                }
                _ => {}
            }
            if let Some(children) = node.children_mut() {
                self.load_nodes(children, from, src, depth, loaded)?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn load_file(
        &self,
        file: &mut FileReference,
        span: &Span,
        template: bool,
        from: Option<&str>,
        src: Option<&str>,
        depth: usize,
        loaded: &mut usize,
    ) -> Result<(), Error> {
        if file.contents.is_some() {
            return Ok(());
        }
        let fail = |kind| LoadError {
            kind,
            span: span.clone(),
            src: src.map(str::to_string),
        };

        let full_path = self.resolve(&file.path, from).map_err(fail)?;
        let raw = self.read(&full_path).map_err(|e| {
            fail(LoadErrorKind::Io {
                path: full_path.clone(),
                message: e.to_string(),
            })
        })?;
        let text = String::from_utf8_lossy(&raw).into_owned();
        *loaded += 1;
        trace!(path = %full_path.display(), bytes = raw.len(), "read include");

        if template {
            if depth >= self.max_depth {
                return Err(fail(LoadErrorKind::DepthLimit {
                    limit: self.max_depth,
                })
                .into());
            }
            let name = full_path.to_string_lossy().into_owned();
            let tokens = lex(
                &text,
                &LexOptions::new()
                    .filename(&name)
                    .plugins(self.lexer_plugins),
            )?;
            let mut options = ParseOptions::new().filename(&name).src(&text);
            if let Some(plugins) = self.parser_plugins {
                options = options.plugins(plugins);
            }
            let mut ast = parse(&tokens, &options)?;
            self.load_nodes(&mut ast.nodes, Some(&name), Some(&text), depth + 1, loaded)?;
            file.ast = Some(Box::new(ast));
        }

        file.full_path = Some(full_path);
        file.contents = Some(text);
        file.raw = Some(raw);
        Ok(())
    }
}

/// Load `tree` with `loader`; see [`Loader::load`].
///
/// # Errors
///
/// As for [`Loader::load`].
pub fn load(
    tree: Block,
    filename: Option<&str>,
    src: Option<&str>,
    loader: &Loader<'_>,
) -> Result<Block, Error> {
    loader.load(tree, filename, src)
}
