#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use pugneum::{
    Block, Error, FilterSet, LexOptions, Loader, ParseOptions, RenderOptions, Token, apply_filters,
    lex, link, parse, render,
};

pub const DOCTYPE: &str = "<!DOCTYPE html>";

pub fn tokens(src: &str) -> Vec<Token> {
    lex(src, &LexOptions::new()).unwrap_or_else(|e| panic!("tokenize failed:\n{e}"))
}

pub fn names(src: &str) -> Vec<&'static str> {
    tokens(src).iter().map(Token::name).collect()
}

pub fn tree(src: &str) -> Block {
    let tokens = tokens(src);
    parse(&tokens, &ParseOptions::new().src(src)).unwrap_or_else(|e| panic!("parse failed:\n{e}"))
}

/// Strip the document prefix every render starts with.
pub fn body(html: &str) -> &str {
    html.strip_prefix(DOCTYPE)
        .unwrap_or_else(|| panic!("missing doctype prefix: {html}"))
}

/// In-memory file system for include and extends tests.
pub struct Files {
    files: HashMap<PathBuf, Vec<u8>>,
}

impl Files {
    pub fn new(files: &[(&str, &str)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(path, src)| (PathBuf::from(path), src.as_bytes().to_vec()))
                .collect(),
        }
    }

    pub fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    pub fn source(&self, path: &str) -> String {
        String::from_utf8(self.read(Path::new(path)).expect("entry file")).expect("utf-8")
    }

    /// Run the whole pipeline on `entry`.
    pub fn render(&self, entry: &str, filters: &FilterSet) -> Result<String, Error> {
        let tree = self.link(entry)?;
        let tree = apply_filters(tree, filters)?;
        Ok(render(&tree, &RenderOptions::new())?)
    }

    /// Lex, parse, load and link `entry`.
    pub fn link(&self, entry: &str) -> Result<Block, Error> {
        let source = self.source(entry);
        let tokens = lex(&source, &LexOptions::new().filename(entry))?;
        let tree = parse(&tokens, &ParseOptions::new().filename(entry).src(&source))?;
        let loader = Loader::new()
            .basedir("root")
            .reader(|path| self.read(path));
        let tree = loader.load(tree, Some(entry), Some(&source))?;
        Ok(link(tree)?)
    }
}
