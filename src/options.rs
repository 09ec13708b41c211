//! Configuration for the whole pipeline.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::filters::FilterSet;
use crate::loader::{DEFAULT_MAX_DEPTH, Loader};
use crate::render::{DEFAULT_MAX_MIXIN_DEPTH, RenderOptions};

/// Options for [`render_str`](crate::render_str) and
/// [`render_file`](crate::render_file).
#[derive(Debug)]
pub struct Options {
    /// Name of the template being rendered; relative includes resolve
    /// against its directory.
    pub filename: Option<String>,
    /// Directory that `/`-prefixed include paths resolve against.
    pub basedir: Option<PathBuf>,
    pub filters: FilterSet,
    pub globals: BTreeMap<String, String>,
    pub max_include_depth: usize,
    pub max_mixin_depth: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            filename: None,
            basedir: None,
            filters: FilterSet::new(),
            globals: BTreeMap::new(),
            max_include_depth: DEFAULT_MAX_DEPTH,
            max_mixin_depth: DEFAULT_MAX_MIXIN_DEPTH,
        }
    }
}

impl Options {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    #[must_use]
    pub fn basedir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.basedir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn filters(mut self, filters: FilterSet) -> Self {
        self.filters = filters;
        self
    }

    /// Bind a variable visible to the whole template.
    #[must_use]
    pub fn global(mut self, name: &str, val: &str) -> Self {
        self.globals.insert(name.to_string(), val.to_string());
        self
    }

    #[must_use]
    pub const fn max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }

    #[must_use]
    pub const fn max_mixin_depth(mut self, depth: usize) -> Self {
        self.max_mixin_depth = depth;
        self
    }

    pub(crate) fn loader(&self) -> Loader<'_> {
        let loader = Loader::new().max_depth(self.max_include_depth);
        match &self.basedir {
            Some(dir) => loader.basedir(dir.clone()),
            None => loader,
        }
    }

    pub(crate) fn render_options(&self) -> RenderOptions {
        RenderOptions {
            globals: self.globals.clone(),
            max_mixin_depth: self.max_mixin_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = Options::new();
        assert_eq!(options.max_include_depth, 64);
        assert_eq!(options.max_mixin_depth, 256);
        assert!(options.filters.is_empty());
    }

    #[test]
    fn render_options_carry_globals() {
        let options = Options::new().global("a", "1").max_mixin_depth(3);
        let render = options.render_options();
        assert_eq!(render.globals.get("a").map(String::as_str), Some("1"));
        assert_eq!(render.max_mixin_depth, 3);
    }
}
