//! Filters: named text transformers applied to `:name` blocks and to
//! `include:name` files.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use tracing::{debug, trace};

use crate::ast::{self, Attribute, Block, IncludeFilter, Node, RawInclude, Text};
use crate::error;
use crate::token::{AttrValue, Span};

/// Options passed to a filter: the template's attributes merged over the
/// configured defaults, plus `filename`.
pub type FilterOptions = BTreeMap<String, AttrValue>;

/// Error type returned by filter implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A text transformer.
pub trait Filter {
    fn filter(&self, text: &str, options: &FilterOptions) -> Result<String, BoxError>;

    /// Whether `include:name` should hand this filter the file's bytes.
    fn is_raw(&self) -> bool {
        false
    }

    fn filter_raw(&self, raw: &[u8], options: &FilterOptions) -> Result<String, BoxError> {
        self.filter(&String::from_utf8_lossy(raw), options)
    }
}

struct TextFn<F>(F);

impl<F> Filter for TextFn<F>
where
    F: Fn(&str, &FilterOptions) -> String,
{
    fn filter(&self, text: &str, options: &FilterOptions) -> Result<String, BoxError> {
        Ok((self.0)(text, options))
    }
}

struct RawFn<F>(F);

impl<F> Filter for RawFn<F>
where
    F: Fn(&[u8], &FilterOptions) -> String,
{
    fn filter(&self, text: &str, options: &FilterOptions) -> Result<String, BoxError> {
        Ok((self.0)(text.as_bytes(), options))
    }

    fn is_raw(&self) -> bool {
        true
    }

    fn filter_raw(&self, raw: &[u8], options: &FilterOptions) -> Result<String, BoxError> {
        Ok((self.0)(raw, options))
    }
}

/// Classifies a filter error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterErrorKind {
    UnknownFilter { name: String },
    AliasChain {
        name: String,
        alias: String,
        target: String,
    },
    UnloadedFile { path: String },
    /// The filter itself reported an error.
    Failed { name: String, message: String },
}

impl FilterErrorKind {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnknownFilter { .. } => "UNKNOWN_FILTER",
            Self::AliasChain { .. } => "FILTER_ALIAS_CHAIN",
            Self::UnloadedFile { .. } => "UNLOADED_FILE",
            Self::Failed { .. } => "FILTER_FAILED",
        }
    }
}

impl fmt::Display for FilterErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownFilter { name } => write!(f, "Unknown filter '{name}'"),
            Self::AliasChain {
                name,
                alias,
                target,
            } => write!(
                f,
                "The filter \"{name}\" is an alias for \"{alias}\", which is an alias for \"{target}\". pugneum does not support chains of filter aliases."
            ),
            Self::UnloadedFile { path } => {
                write!(f, "the file \"{path}\" has not been loaded")
            }
            Self::Failed { name, message } => write!(f, "filter '{name}' failed: {message}"),
        }
    }
}

/// Error produced while applying filters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", self.message())]
pub struct FilterError {
    pub kind: FilterErrorKind,
    pub span: Span,
    pub src: Option<String>,
}

impl FilterError {
    const fn new(kind: FilterErrorKind, span: Span) -> Self {
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

/// Registered filters, aliases and per-filter default options.
#[derive(Default)]
pub struct FilterSet {
    filters: HashMap<String, Box<dyn Filter>>,
    aliases: HashMap<String, String>,
    defaults: HashMap<String, FilterOptions>,
}

impl fmt::Debug for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.filters.keys().collect();
        names.sort();
        f.debug_struct("FilterSet")
            .field("filters", &names)
            .field("aliases", &self.aliases)
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl FilterSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter implementation.
    #[must_use]
    pub fn filter(mut self, name: &str, filter: impl Filter + 'static) -> Self {
        self.filters.insert(name.to_string(), Box::new(filter));
        self
    }

    /// Register a plain text filter.
    #[must_use]
    pub fn text(self, name: &str, f: impl Fn(&str, &FilterOptions) -> String + 'static) -> Self {
        self.filter(name, TextFn(f))
    }

    /// Register a filter that receives included files as bytes.
    #[must_use]
    pub fn raw(self, name: &str, f: impl Fn(&[u8], &FilterOptions) -> String + 'static) -> Self {
        self.filter(name, RawFn(f))
    }

    /// Make `name` refer to the filter `target`.
    #[must_use]
    pub fn alias(mut self, name: &str, target: &str) -> Self {
        self.aliases.insert(name.to_string(), target.to_string());
        self
    }

    /// Default option for a filter; attributes in the template win.
    #[must_use]
    pub fn option(mut self, filter: &str, key: &str, val: impl Into<AttrValue>) -> Self {
        self.defaults
            .entry(filter.to_string())
            .or_default()
            .insert(key.to_string(), val.into());
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Follow at most one alias.
    fn resolve_name<'n>(&'n self, name: &'n str, span: &Span) -> Result<&'n str, FilterError> {
        let Some(alias) = self.aliases.get(name) else {
            return Ok(name);
        };
        if let Some(target) = self.aliases.get(alias) {
            return Err(FilterError::new(
                FilterErrorKind::AliasChain {
                    name: name.to_string(),
                    alias: alias.clone(),
                    target: target.clone(),
                },
                span.clone(),
            ));
        }
        Ok(alias)
    }

    fn lookup<'a>(
        &'a self,
        name: &'a str,
        span: &Span,
    ) -> Result<(&'a str, &'a dyn Filter), FilterError> {
        let resolved = self.resolve_name(name, span)?;
        self.filters
            .get(resolved)
            .map(|f| (resolved, f.as_ref()))
            .ok_or_else(|| {
                FilterError::new(
                    FilterErrorKind::UnknownFilter {
                        name: name.to_string(),
                    },
                    span.clone(),
                )
            })
    }

    /// Template attributes, then defaults registered for the name as
    /// written, then defaults of the filter it aliases.
    fn options(
        &self,
        name: &str,
        resolved: &str,
        attrs: &[Attribute],
        filename: Option<&str>,
    ) -> FilterOptions {
        let mut options: FilterOptions = attrs
            .iter()
            .map(|a| (a.name.clone(), a.val.clone()))
            .collect();
        let layers = if name == resolved {
            [Some(name), None]
        } else {
            [Some(name), Some(resolved)]
        };
        for defaults in layers.into_iter().flatten().filter_map(|n| self.defaults.get(n)) {
            for (key, val) in defaults {
                options.entry(key.clone()).or_insert_with(|| val.clone());
            }
        }
        if let Some(filename) = filename {
            options.insert("filename".to_string(), AttrValue::Str(filename.to_string()));
        }
        options
    }

    fn run_text(
        &self,
        name: &str,
        attrs: &[Attribute],
        text: &str,
        filename: Option<&str>,
        span: &Span,
    ) -> Result<String, FilterError> {
        let (resolved, filter) = self.lookup(name, span)?;
        let options = self.options(name, resolved, attrs, filename);
        trace!(filter = name, resolved, "applying filter");
        filter
            .filter(text, &options)
            .map_err(|e| failed(name, &e, span))
    }
}

fn failed(name: &str, err: &BoxError, span: &Span) -> FilterError {
    FilterError::new(
        FilterErrorKind::Failed {
            name: name.to_string(),
            message: err.to_string(),
        },
        span.clone(),
    )
}

/// Replace every `Filter` node and filtered `RawInclude` in `tree` with the
/// filtered text.
///
/// # Errors
///
/// `FilterError` for unknown filters, alias chains, raw includes the loader
/// did not fill in, and failures reported by the filters themselves.
pub fn apply_filters(mut tree: Block, filters: &FilterSet) -> Result<Block, FilterError> {
    let mut applied = 0;
    apply_nodes(&mut tree.nodes, filters, &mut applied)?;
    debug!(applied, "applied filters");
    Ok(tree)
}

fn apply_nodes(
    nodes: &mut [Node],
    filters: &FilterSet,
    applied: &mut usize,
) -> Result<(), FilterError> {
    for node in nodes {
        let replacement = match &mut *node {
            Node::Filter(filter) => {
                apply_nodes(&mut filter.block.nodes, filters, applied)?;
                *applied += 1;
                Some(filter_block(filter, filters)?)
            }
            Node::RawInclude(include) if !include.filters.is_empty() => {
                *applied += include.filters.len();
                Some(filter_file(include, filters)?)
            }
            other => {
                if let Some(children) = other.children_mut() {
                    apply_nodes(children, filters, applied)?;
                }
                None
            }
        };
        if let Some(text) = replacement {
            *node = Node::Text(text);
        }
    }
    Ok(())
}

fn body_text(block: &Block) -> String {
    block
        .nodes
        .iter()
        .filter_map(|n| match n {
            Node::Text(t) => Some(t.val.as_str()),
            _ => None,
        })
        .collect()
}

fn filter_block(filter: &ast::Filter, filters: &FilterSet) -> Result<Text, FilterError> {
    let text = body_text(&filter.block);
    let val = filters.run_text(
        &filter.name,
        &filter.attrs,
        &text,
        filter.span.file.as_deref(),
        &filter.span,
    )?;
    Ok(Text {
        span: filter.span.clone(),
        val,
        is_html: false,
    })
}

/// The last filter reads the file; the others wrap its output in reverse order.
fn filter_file(include: &RawInclude, filters: &FilterSet) -> Result<Text, FilterError> {
    let file = &include.file;
    let unloaded = || {
        FilterError::new(
            FilterErrorKind::UnloadedFile {
                path: file.path.clone(),
            },
            include.span.clone(),
        )
    };
    let filename = file.full_path.as_ref().map(|p| p.to_string_lossy().into_owned());

    let Some((first, rest)) = include.filters.split_last() else {
        return Err(unloaded());
    };
    let IncludeFilter { span, name, attrs } = first;
    let (resolved, filter) = filters.lookup(name, span)?;
    let options = filters.options(name, resolved, attrs, filename.as_deref());
    let mut val = if filter.is_raw() {
        let raw = file.raw.as_deref().ok_or_else(unloaded)?;
        filter.filter_raw(raw, &options)
    } else {
        let contents = file.contents.as_deref().ok_or_else(unloaded)?;
        filter.filter(contents, &options)
    }
    .map_err(|e| failed(name, &e, span))?;

    for IncludeFilter { span, name, attrs } in rest.iter().rev() {
        val = filters.run_text(name, attrs, &val, filename.as_deref(), span)?;
    }
    Ok(Text {
        span: include.span.clone(),
        val,
        is_html: false,
    })
}
