use crate::ast::{
    Attribute, Block, Code, Comment, Filter, INLINE_TAGS, InterpolatedTag, Mixin, NamedBlock,
    Node, Tag, Text,
};
use crate::token::{AttrValue, BlockMode, Span};

impl Block {
    /// Create an empty block with no source position.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node.
    #[must_use]
    pub fn node(mut self, node: impl Into<Node>) -> Self {
        self.nodes.push(node.into());
        self
    }

    /// Append a text node.
    #[must_use]
    pub fn text(self, val: &str) -> Self {
        self.node(Text::new(val))
    }
}

impl NamedBlock {
    /// Create an empty named block.
    #[must_use]
    pub fn new(name: &str, mode: BlockMode) -> Self {
        Self {
            span: Span::default(),
            name: name.to_string(),
            mode,
            nodes: Vec::new(),
        }
    }

    #[must_use]
    pub fn node(mut self, node: impl Into<Node>) -> Self {
        self.nodes.push(node.into());
        self
    }

    #[must_use]
    pub fn text(self, val: &str) -> Self {
        self.node(Text::new(val))
    }
}

impl Tag {
    /// Create a tag with no attributes or children.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            span: Span::default(),
            name: name.to_string(),
            self_closing: false,
            is_inline: INLINE_TAGS.contains(&name),
            text_only: false,
            attrs: Vec::new(),
            block: Block::new(),
        }
    }

    /// Add an attribute whose value is escaped on output.
    #[must_use]
    pub fn attr(mut self, name: &str, val: impl Into<AttrValue>) -> Self {
        self.attrs.push(Attribute::new(name, val));
        self
    }

    /// Add a boolean attribute.
    #[must_use]
    pub fn flag(mut self, name: &str) -> Self {
        self.attrs.push(Attribute::new(name, AttrValue::True));
        self
    }

    /// Add a class.
    #[must_use]
    pub fn class(mut self, name: &str) -> Self {
        let mut attr = Attribute::new("class", name);
        attr.must_escape = false;
        self.attrs.push(attr);
        self
    }

    /// Mark as self-closing (`tag/`).
    #[must_use]
    pub const fn self_closing(mut self) -> Self {
        self.self_closing = true;
        self
    }

    /// Append a child node.
    #[must_use]
    pub fn child(mut self, node: impl Into<Node>) -> Self {
        self.block.nodes.push(node.into());
        self
    }

    /// Append a text child.
    #[must_use]
    pub fn text(self, val: &str) -> Self {
        self.child(Text::new(val))
    }
}

impl InterpolatedTag {
    /// A tag named by the variable `expr`.
    #[must_use]
    pub fn new(expr: &str) -> Self {
        Self {
            span: Span::default(),
            expr: expr.to_string(),
            self_closing: false,
            text_only: false,
            attrs: Vec::new(),
            block: Block::new(),
        }
    }

    #[must_use]
    pub fn child(mut self, node: impl Into<Node>) -> Self {
        self.block.nodes.push(node.into());
        self
    }
}

impl Attribute {
    #[must_use]
    pub fn new(name: &str, val: impl Into<AttrValue>) -> Self {
        Self {
            span: Span::default(),
            name: name.to_string(),
            val: val.into(),
            must_escape: true,
        }
    }
}

impl Text {
    #[must_use]
    pub fn new(val: &str) -> Self {
        Self {
            span: Span::default(),
            val: val.to_string(),
            is_html: false,
        }
    }
}

impl Code {
    /// An escaped reference to `name`.
    #[must_use]
    pub fn variable(name: &str) -> Self {
        Self {
            span: Span::default(),
            val: name.to_string(),
            buffer: true,
            must_escape: true,
            is_inline: true,
        }
    }

    /// Render the value without escaping.
    #[must_use]
    pub const fn unescaped(mut self) -> Self {
        self.must_escape = false;
        self
    }
}

impl Comment {
    #[must_use]
    pub fn new(val: &str, buffer: bool) -> Self {
        Self {
            span: Span::default(),
            val: val.to_string(),
            buffer,
        }
    }
}

impl Filter {
    /// A filter over a single text body.
    #[must_use]
    pub fn new(name: &str, body: &str) -> Self {
        Self {
            span: Span::default(),
            name: name.to_string(),
            attrs: Vec::new(),
            block: Block::new().text(body),
        }
    }

    #[must_use]
    pub fn attr(mut self, name: &str, val: impl Into<AttrValue>) -> Self {
        self.attrs.push(Attribute::new(name, val));
        self
    }
}

impl Mixin {
    /// A declaration `mixin name(params)` with an empty body.
    #[must_use]
    pub fn declare(name: &str, params: Option<&str>) -> Self {
        Self {
            span: Span::default(),
            name: name.to_string(),
            args: params.map(str::to_string),
            block: Some(Block::new()),
            call: false,
            attrs: Vec::new(),
        }
    }

    /// A call `+name(args)` with no caller block.
    #[must_use]
    pub fn call(name: &str, args: Option<&str>) -> Self {
        Self {
            span: Span::default(),
            name: name.to_string(),
            args: args.map(str::to_string),
            block: None,
            call: true,
            attrs: Vec::new(),
        }
    }

    /// Append to the body (declaration) or caller block (call).
    #[must_use]
    pub fn child(mut self, node: impl Into<Node>) -> Self {
        self.block.get_or_insert_with(Block::new).nodes.push(node.into());
        self
    }
}

impl From<Block> for Node {
    fn from(n: Block) -> Self {
        Self::Block(n)
    }
}

impl From<NamedBlock> for Node {
    fn from(n: NamedBlock) -> Self {
        Self::NamedBlock(n)
    }
}

impl From<Tag> for Node {
    fn from(n: Tag) -> Self {
        Self::Tag(n)
    }
}

impl From<InterpolatedTag> for Node {
    fn from(n: InterpolatedTag) -> Self {
        Self::InterpolatedTag(n)
    }
}

impl From<Mixin> for Node {
    fn from(n: Mixin) -> Self {
        Self::Mixin(n)
    }
}

impl From<Text> for Node {
    fn from(n: Text) -> Self {
        Self::Text(n)
    }
}

impl From<Code> for Node {
    fn from(n: Code) -> Self {
        Self::Code(n)
    }
}

impl From<Comment> for Node {
    fn from(n: Comment) -> Self {
        Self::Comment(n)
    }
}

impl From<Filter> for Node {
    fn from(n: Filter) -> Self {
        Self::Filter(n)
    }
}
