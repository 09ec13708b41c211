//! HTML renderer that walks a linked and filtered tree.
//!
//! Mixins are evaluated with chained variable frames: each call binds its
//! parameters in a new frame whose parent is the frame it was called from.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use tracing::{debug, trace};

use crate::ast::{Attribute, Block, BlockComment, Code, Comment, Mixin, Node};
use crate::error;
use crate::token::{AttrValue, Span};

/// Elements rendered without a closing tag.
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Default bound on nested mixin calls.
pub const DEFAULT_MAX_MIXIN_DEPTH: usize = 256;

const DOCTYPE: &str = "<!DOCTYPE html>";

/// Classifies a render error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderErrorKind {
    UndefinedMixin { name: String },
    ArgumentCountMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    UndefinedVariable { name: String },
    /// `block` inside a mixin body rendered outside any call.
    CallStackUnderflow,
    VoidElementWithContent { name: String },
    /// A node earlier stages should have removed.
    UnsupportedNode { node_type: &'static str },
    RecursionLimit { limit: usize },
    InvalidArgument { arg: String },
    InvalidParameter { param: String },
}

impl RenderErrorKind {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UndefinedMixin { .. } => "UNDEFINED_MIXIN",
            Self::ArgumentCountMismatch { .. } => "MIXIN_ARGUMENT_COUNT_MISMATCH",
            Self::UndefinedVariable { .. } => "UNDEFINED_VARIABLE",
            Self::CallStackUnderflow => "CALL_STACK_UNDERFLOW",
            Self::VoidElementWithContent { .. } => "VOID_ELEMENT_WITH_CONTENT",
            Self::UnsupportedNode { .. } => "UNSUPPORTED_NODE",
            Self::RecursionLimit { .. } => "MIXIN_RECURSION_LIMIT",
            Self::InvalidArgument { .. } => "INVALID_MIXIN_ARGUMENT",
            Self::InvalidParameter { .. } => "INVALID_MIXIN_PARAMETER",
        }
    }
}

impl fmt::Display for RenderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndefinedMixin { name } => write!(f, "Mixin {name} is not defined"),
            Self::ArgumentCountMismatch {
                name,
                expected,
                found,
            } => write!(
                f,
                "Mixin {name} takes {expected} argument(s) but was called with {found}"
            ),
            Self::UndefinedVariable { name } => write!(f, "Variable {name} is not defined"),
            Self::CallStackUnderflow => {
                write!(f, "Mixin block rendered outside of a mixin call")
            }
            Self::VoidElementWithContent { name } => write!(
                f,
                "{name} is a self closing element: <{name}> but contains nested content"
            ),
            Self::UnsupportedNode { node_type } => {
                write!(
                    f,
                    "{node_type} nodes are not supported by the renderer"
                )?;
                match *node_type {
                    "Filter" => write!(f, "; apply filters first"),
                    "Extends" | "Include" | "RawInclude" | "NamedBlock" => {
                        write!(f, "; link the tree first")
                    }
                    _ => Ok(()),
                }
            }
            Self::RecursionLimit { limit } => {
                write!(f, "Mixin calls nested more than {limit} levels deep")
            }
            Self::InvalidArgument { arg } => write!(
                f,
                "Invalid mixin argument `{arg}`: expected a quoted string, a number or a variable"
            ),
            Self::InvalidParameter { param } => {
                write!(f, "Invalid mixin parameter `{param}`: expected a name")
            }
        }
    }
}

/// Error produced while rendering.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", self.message())]
pub struct RenderError {
    pub kind: RenderErrorKind,
    pub span: Span,
    pub src: Option<String>,
}

impl RenderError {
    fn new(kind: RenderErrorKind, span: &Span) -> Self {
        Self {
            kind,
            span: span.clone(),
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

/// Renderer configuration.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Variables visible everywhere, including inside mixins.
    pub globals: BTreeMap<String, String>,
    pub max_mixin_depth: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            globals: BTreeMap::new(),
            max_mixin_depth: DEFAULT_MAX_MIXIN_DEPTH,
        }
    }
}

impl RenderOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a global variable.
    #[must_use]
    pub fn global(mut self, name: &str, val: &str) -> Self {
        self.globals.insert(name.to_string(), val.to_string());
        self
    }

    #[must_use]
    pub const fn max_mixin_depth(mut self, depth: usize) -> Self {
        self.max_mixin_depth = depth;
        self
    }
}

/// Escape text for use in HTML content and attribute values.
#[must_use]
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render a tree to an HTML document.
///
/// The tree must already be linked and filtered.
///
/// # Errors
///
/// `RenderError` on undefined mixins or variables, malformed mixin
/// arguments, misused `block`, content in void elements, runaway recursion
/// and nodes that earlier stages should have removed.
pub fn render(tree: &Block, options: &RenderOptions) -> Result<String, RenderError> {
    let mut renderer = Renderer::new(options);
    renderer.out.push_str(DOCTYPE);
    renderer.visit_block(tree)?;
    debug!(
        bytes = renderer.out.len(),
        mixins = renderer.mixins.len(),
        "rendered document"
    );
    Ok(renderer.out)
}

/// Variable bindings of one scope.
struct Frame {
    vars: HashMap<String, String>,
    parent: Option<usize>,
}

/// An active mixin invocation.
struct Call<'t> {
    /// Scope the call was made from; the caller's block renders in it.
    caller: usize,
    block: Option<&'t Block>,
}

struct MixinDef<'t> {
    params: Vec<&'t str>,
    body: Option<&'t Block>,
}

struct Renderer<'t> {
    out: String,
    mixins: HashMap<&'t str, MixinDef<'t>>,
    frames: Vec<Frame>,
    calls: Vec<Call<'t>>,
    scope: usize,
    max_depth: usize,
}

impl<'t> Renderer<'t> {
    fn new(options: &RenderOptions) -> Self {
        let globals = Frame {
            vars: options
                .globals
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            parent: None,
        };
        Self {
            out: String::new(),
            mixins: HashMap::new(),
            frames: vec![globals],
            calls: Vec::new(),
            scope: 0,
            max_depth: options.max_mixin_depth,
        }
    }

    fn visit_block(&mut self, block: &'t Block) -> Result<(), RenderError> {
        for node in &block.nodes {
            self.visit(node)?;
        }
        Ok(())
    }

    fn visit(&mut self, node: &'t Node) -> Result<(), RenderError> {
        match node {
            Node::Block(block) => self.visit_block(block),
            Node::Tag(tag) => {
                self.element(&tag.name, &tag.span, tag.self_closing, &tag.attrs, &tag.block)
            }
            Node::InterpolatedTag(tag) => {
                let name = self.lookup(&tag.expr, &tag.span)?.to_string();
                self.element(&name, &tag.span, tag.self_closing, &tag.attrs, &tag.block)
            }
            Node::Mixin(mixin) if mixin.call => self.call_mixin(mixin),
            Node::Mixin(mixin) => self.declare_mixin(mixin),
            Node::MixinBlock(span) => self.mixin_block(span),
            Node::Text(text) => {
                self.out.push_str(&text.val);
                Ok(())
            }
            Node::Code(code) => self.code(code),
            Node::Comment(Comment { val, buffer, .. }) => {
                if *buffer {
                    self.out.push_str("<!--");
                    self.out.push_str(val);
                    self.out.push_str("-->");
                }
                Ok(())
            }
            Node::BlockComment(BlockComment {
                val, buffer, block, ..
            }) => {
                if !*buffer {
                    return Ok(());
                }
                self.out.push_str("<!--");
                self.out.push_str(val);
                self.visit_block(block)?;
                self.out.push_str("-->");
                Ok(())
            }
            Node::YieldBlock(_) | Node::Doctype(_) => Ok(()),
            Node::NamedBlock(_)
            | Node::Filter(_)
            | Node::Include(_)
            | Node::RawInclude(_)
            | Node::Extends(_) => Err(RenderError::new(
                RenderErrorKind::UnsupportedNode {
                    node_type: node.type_name(),
                },
                node.span(),
            )),
        }
    }

    fn element(
        &mut self,
        name: &str,
        span: &Span,
        self_closing: bool,
        attrs: &[Attribute],
        block: &'t Block,
    ) -> Result<(), RenderError> {
        self.out.push('<');
        self.out.push_str(name);
        self.attributes(attrs);
        self.out.push('>');

        if self_closing || VOID_ELEMENTS.contains(&name) {
            if block.nodes.iter().any(|n| !n.is_blank_text()) {
                return Err(RenderError::new(
                    RenderErrorKind::VoidElementWithContent {
                        name: name.to_string(),
                    },
                    span,
                ));
            }
            return Ok(());
        }

        self.visit_block(block)?;
        self.out.push_str("</");
        self.out.push_str(name);
        self.out.push('>');
        Ok(())
    }

    /// Classes merge into one attribute at the position of the first.
    fn attributes(&mut self, attrs: &[Attribute]) {
        let classes: Vec<String> = attrs
            .iter()
            .filter(|a| a.name == "class")
            .filter_map(|a| a.val.as_str().map(|v| attr_text(v, a.must_escape)))
            .collect();
        let mut classes_done = false;

        for attr in attrs {
            if attr.name == "class" && !classes.is_empty() {
                if !classes_done {
                    self.out.push_str(" class=\"");
                    self.out.push_str(&classes.join(" "));
                    self.out.push('"');
                    classes_done = true;
                }
                continue;
            }
            self.out.push(' ');
            self.out.push_str(&attr.name);
            if let AttrValue::Str(val) = &attr.val {
                self.out.push_str("=\"");
                self.out.push_str(&attr_text(val, attr.must_escape));
                self.out.push('"');
            }
        }
    }

    fn code(&mut self, code: &Code) -> Result<(), RenderError> {
        if !code.buffer {
            return Ok(());
        }
        let val = self.lookup(&code.val, &code.span)?;
        let val = if code.must_escape {
            escape_html(val)
        } else {
            val.to_string()
        };
        self.out.push_str(&val);
        Ok(())
    }

    fn lookup(&self, name: &str, span: &Span) -> Result<&str, RenderError> {
        let mut scope = Some(self.scope);
        while let Some(index) = scope {
            let frame = &self.frames[index];
            if let Some(val) = frame.vars.get(name) {
                return Ok(val);
            }
            scope = frame.parent;
        }
        Err(RenderError::new(
            RenderErrorKind::UndefinedVariable {
                name: name.to_string(),
            },
            span,
        ))
    }

    fn declare_mixin(&mut self, mixin: &'t Mixin) -> Result<(), RenderError> {
        let mut params = Vec::new();
        for param in split_list(mixin.args.as_deref().unwrap_or_default()) {
            if !is_name(param) {
                return Err(RenderError::new(
                    RenderErrorKind::InvalidParameter {
                        param: param.to_string(),
                    },
                    &mixin.span,
                ));
            }
            params.push(param);
        }
        trace!(mixin = %mixin.name, params = params.len(), "declared mixin");
        self.mixins.insert(
            &mixin.name,
            MixinDef {
                params,
                body: mixin.block.as_ref(),
            },
        );
        Ok(())
    }

    fn call_mixin(&mut self, call: &'t Mixin) -> Result<(), RenderError> {
        let Some(def) = self.mixins.get(call.name.as_str()) else {
            return Err(RenderError::new(
                RenderErrorKind::UndefinedMixin {
                    name: call.name.clone(),
                },
                &call.span,
            ));
        };
        let (params, body) = (def.params.clone(), def.body);

        let mut vars = HashMap::with_capacity(params.len());
        let args = split_list(call.args.as_deref().unwrap_or_default());
        if args.len() != params.len() {
            return Err(RenderError::new(
                RenderErrorKind::ArgumentCountMismatch {
                    name: call.name.clone(),
                    expected: params.len(),
                    found: args.len(),
                },
                &call.span,
            ));
        }
        for (param, arg) in params.iter().zip(args) {
            vars.insert((*param).to_string(), self.argument(arg, &call.span)?);
        }

        if self.calls.len() >= self.max_depth {
            return Err(RenderError::new(
                RenderErrorKind::RecursionLimit {
                    limit: self.max_depth,
                },
                &call.span,
            ));
        }

        let frame = self.frames.len();
        self.frames.push(Frame {
            vars,
            parent: Some(self.scope),
        });
        self.calls.push(Call {
            caller: self.scope,
            block: call.block.as_ref(),
        });
        let caller = self.scope;
        self.scope = frame;
        trace!(mixin = %call.name, depth = self.calls.len(), "calling mixin");

        let result = body.map_or(Ok(()), |body| self.visit_block(body));

        self.scope = caller;
        self.calls.pop();
        self.frames.truncate(frame);
        result
    }

    fn mixin_block(&mut self, span: &Span) -> Result<(), RenderError> {
        let Some(call) = self.calls.pop() else {
            return Err(RenderError::new(RenderErrorKind::CallStackUnderflow, span));
        };
        let scope = self.scope;
        self.scope = call.caller;
        let result = call.block.map_or(Ok(()), |block| self.visit_block(block));
        self.scope = scope;
        self.calls.push(call);
        result
    }

    /// Evaluate one call argument in the calling scope.
    fn argument(&self, arg: &str, span: &Span) -> Result<String, RenderError> {
        if let Some(literal) = string_literal(arg) {
            return Ok(literal);
        }
        if is_number(arg) {
            return Ok(arg.to_string());
        }
        if is_name(arg) {
            return self.lookup(arg, span).map(str::to_string);
        }
        Err(RenderError::new(
            RenderErrorKind::InvalidArgument {
                arg: arg.to_string(),
            },
            span,
        ))
    }
}

fn attr_text(val: &str, must_escape: bool) -> String {
    if must_escape {
        escape_html(val)
    } else {
        val.to_string()
    }
}

/// Split on commas outside quotes. An all-blank list is empty.
fn split_list(list: &str) -> Vec<&str> {
    if list.trim().is_empty() {
        return Vec::new();
    }
    let mut items = Vec::new();
    let mut quote = None;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in list.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (None, '\'' | '"') => quote = Some(c),
            (None, ',') => {
                items.push(list[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(list[start..].trim());
    items
}

fn string_literal(arg: &str) -> Option<String> {
    let quote = arg.chars().next().filter(|c| matches!(c, '\'' | '"'))?;
    let body = arg.get(1..)?.strip_suffix(quote)?;
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c == quote {
            return None;
        }
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            other => out.push(other),
        }
    }
    Some(out)
}

fn is_number(arg: &str) -> bool {
    let digits = arg.strip_prefix('-').unwrap_or(arg);
    !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.parse::<f64>().is_ok()
}

fn is_name(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '$' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{InterpolatedTag, Tag, Text};

    fn html(tree: &Block) -> String {
        render(tree, &RenderOptions::new()).expect("should render")
    }

    fn body(out: &str) -> &str {
        out.strip_prefix(DOCTYPE).expect("doctype prefix")
    }

    #[test]
    fn tags_and_attributes() {
        let tree = Block::new().node(
            Tag::new("a")
                .attr("href", "/?a=1&b=2")
                .class("x")
                .flag("download")
                .class("y")
                .text("go"),
        );
        assert_eq!(
            body(&html(&tree)),
            r#"<a href="/?a=1&amp;b=2" class="x y" download>go</a>"#
        );
    }

    #[test]
    fn void_elements() {
        let tree = Block::new()
            .node(Tag::new("br"))
            .node(Tag::new("img").attr("src", "a.png").text("  "));
        assert_eq!(body(&html(&tree)), r#"<br><img src="a.png">"#);

        for name in VOID_ELEMENTS {
            let tree = Block::new().node(Tag::new(name).text("x"));
            let err = render(&tree, &RenderOptions::new()).unwrap_err();
            assert_eq!(err.code(), "PUGNEUM:VOID_ELEMENT_WITH_CONTENT");
        }

        let tree = Block::new().node(Tag::new("foo").self_closing().child(Tag::new("b")));
        let err = render(&tree, &RenderOptions::new()).unwrap_err();
        assert_eq!(
            err.kind,
            RenderErrorKind::VoidElementWithContent { name: "foo".into() }
        );
    }

    #[test]
    fn comments() {
        let tree = Block::new()
            .node(Comment::new(" shown ", true))
            .node(Comment::new(" hidden ", false));
        assert_eq!(body(&html(&tree)), "<!-- shown -->");
    }

    #[test]
    fn variables() {
        let tree = Block::new()
            .node(Code::variable("who"))
            .node(Code::variable("who").unescaped())
            .node(InterpolatedTag::new("tag").child(Text::new("x")));
        let options = RenderOptions::new().global("who", "<b>").global("tag", "em");
        let out = render(&tree, &options).expect("should render");
        assert_eq!(body(&out), "&lt;b&gt;<b><em>x</em>");

        let err = render(&Block::new().node(Code::variable("nope")), &RenderOptions::new())
            .unwrap_err();
        assert_eq!(err.code(), "PUGNEUM:UNDEFINED_VARIABLE");
    }

    #[test]
    fn mixin_scopes_do_not_leak() {
        let tree = Block::new()
            .node(Mixin::declare("m", Some("x")).child(Code::variable("x")))
            .node(Mixin::call("m", Some("\"A\"")))
            .node(Mixin::call("m", Some("'B'")));
        assert_eq!(body(&html(&tree)), "AB");
    }

    #[test]
    fn mixin_arguments_from_caller_scope() {
        let tree = Block::new()
            .node(Mixin::declare("inner", Some("y")).child(Code::variable("y")))
            .node(
                Mixin::declare("outer", Some("x"))
                    .child(Mixin::call("inner", Some("x")))
                    .child(Code::variable("g")),
            )
            .node(Mixin::call("outer", Some("42")));
        let out = render(&tree, &RenderOptions::new().global("g", "!")).expect("should render");
        assert_eq!(body(&out), "42!");
    }

    #[test]
    fn mixin_block_renders_in_caller_scope() {
        let tree = Block::new()
            .node(
                Mixin::declare("wrap", Some("x"))
                    .child(Tag::new("div").child(Node::MixinBlock(Span::default()))),
            )
            .node(Mixin::call("wrap", Some("'inner'")).child(Code::variable("x")));
        let out = render(&tree, &RenderOptions::new().global("x", "outer")).expect("render");
        assert_eq!(body(&out), "<div>outer</div>");
    }

    #[test]
    fn mixin_errors() {
        let err = render(
            &Block::new().node(Mixin::call("m", None)),
            &RenderOptions::new(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "PUGNEUM:UNDEFINED_MIXIN");

        let tree = Block::new()
            .node(Mixin::declare("m", Some("a, b")))
            .node(Mixin::call("m", Some("1")));
        let err = render(&tree, &RenderOptions::new()).unwrap_err();
        assert_eq!(
            err.kind,
            RenderErrorKind::ArgumentCountMismatch {
                name: "m".into(),
                expected: 2,
                found: 1,
            }
        );

        let tree = Block::new()
            .node(Mixin::declare("m", Some("a")))
            .node(Mixin::call("m", Some("1 + 2")));
        let err = render(&tree, &RenderOptions::new()).unwrap_err();
        assert_eq!(err.code(), "PUGNEUM:INVALID_MIXIN_ARGUMENT");

        let tree = Block::new().node(Mixin::declare("m", Some("...rest")));
        let err = render(&tree, &RenderOptions::new()).unwrap_err();
        assert_eq!(err.code(), "PUGNEUM:INVALID_MIXIN_PARAMETER");
    }

    #[test]
    fn call_stack_underflow() {
        let tree = Block::new().node(Node::MixinBlock(Span::new(None, 4, 3)));
        let err = render(&tree, &RenderOptions::new()).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::CallStackUnderflow);
        assert_eq!(err.span.line, 4);
    }

    #[test]
    fn recursion_is_bounded() {
        let tree = Block::new()
            .node(Mixin::declare("loop", None).child(Mixin::call("loop", None)))
            .node(Mixin::call("loop", None));
        let err = render(&tree, &RenderOptions::new().max_mixin_depth(8)).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::RecursionLimit { limit: 8 });
    }

    #[test]
    fn unlinked_nodes_rejected() {
        let tree = Block::new().node(crate::ast::Filter::new("md", "x"));
        let err = render(&tree, &RenderOptions::new()).unwrap_err();
        assert_eq!(err.code(), "PUGNEUM:UNSUPPORTED_NODE");
        assert!(err.msg().contains("apply filters first"));
    }

    #[test]
    fn argument_lists() {
        assert_eq!(split_list(" 'a,b' , 2,x "), ["'a,b'", "2", "x"]);
        assert!(split_list("  ").is_empty());
        assert_eq!(string_literal(r#""it\"s""#).as_deref(), Some("it\"s"));
        assert_eq!(string_literal("'a'b'"), None);
        assert!(is_number("-1.5"));
        assert!(!is_number("1e"));
    }
}
