//! Abstract Syntax Tree for HBX.
//!
//! Contains document-level nodes (text, elements, helpers, markers) and the
//! small expression language used inside mustaches (paths, literals,
//! sub-expressions, named arguments).
//!
//! Every node owns its children; nothing is shared or reference-counted.
//! Elements are numbered in pre-order so that a scoped style block can point
//! at its owner without a back-reference.

use hbx_lexer::SourcePosition;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Document-level AST
// ---------------------------------------------------------------------------

/// A complete HBX document.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Document {
    pub children: Vec<Node>,
}

impl Document {
    /// All nodes in pre-order, children in source order.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.children.iter().rev().collect(),
        }
    }
}

/// Pre-order stable identity of an `Element`, counted from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeId(pub usize);

/// A node in the document tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Node {
    /// A literal character run.
    Text(TextNode),

    /// An HTML `<!-- -->` or mustache `{{! }}` comment.
    Comment(Comment),

    /// `{{path}}` or `{{{path}}}`.
    Interpolation(Interpolation),

    /// An HTML element with attributes and children.
    Element(Element),

    /// `{{helper args}}` or `{{#helper args}}…{{/helper}}`.
    Helper(HelperCall),

    /// `<?target payload?>`
    ProcessingInstruction(ProcessingInstruction),

    /// `{{$path}}`
    CssModuleRef(CssModuleRef),

    /// `<style scoped>…</style>`
    ScopedCss(ScopedCssBlock),

    /// `{{> name}}`
    RenderProp(RenderPropBinding),
}

impl Node {
    pub fn position(&self) -> SourcePosition {
        match self {
            Node::Text(n) => n.position,
            Node::Comment(n) => n.position,
            Node::Interpolation(n) => n.position,
            Node::Element(n) => n.position,
            Node::Helper(n) => n.position,
            Node::ProcessingInstruction(n) => n.position,
            Node::CssModuleRef(n) => n.position,
            Node::ScopedCss(n) => n.position,
            Node::RenderProp(n) => n.position,
        }
    }

    /// Direct child nodes in source order. Branch children of a block helper
    /// are flattened branch by branch.
    pub fn child_nodes(&self) -> Vec<&Node> {
        match self {
            Node::Element(el) => el.children.iter().collect(),
            Node::Helper(helper) => helper
                .branches
                .iter()
                .flat_map(|branch| branch.children.iter())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Pre-order iterator over a document's nodes.
pub struct Descendants<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.child_nodes().into_iter().rev());
        Some(node)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextNode {
    pub text: String,
    pub position: SourcePosition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommentKind {
    /// `<!-- … -->`
    Html,
    /// `{{! … }}` / `{{!-- … --}}`
    Mustache,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comment {
    pub text: String,
    pub kind: CommentKind,
    pub position: SourcePosition,
}

/// `~` marks on a mustache: `{{~` strips whitespace before it, `~}}` after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WhitespaceControl {
    pub before: bool,
    pub after: bool,
}

/// A variable access. `escaped` is false for `{{{triple-stash}}}`.
///
/// Relative paths keep their `.` / `..` heads as segments: `{{../title}}`
/// is `["..", "title"]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Interpolation {
    pub path: Vec<String>,
    pub escaped: bool,
    pub strip: WhitespaceControl,
    pub position: SourcePosition,
}

/// An HTML element.
///
/// `self_closing` records an explicit `/>`; void elements such as `<br>`
/// have no children either way.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Element {
    pub id: NodeId,
    pub tag: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
    pub self_closing: bool,
    pub position: SourcePosition,
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.name == name)
    }
}

/// An attribute on an element. Insertion order is preserved and duplicates
/// are kept.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attribute {
    pub name: String,
    pub value: AttributeValue,
    pub position: SourcePosition,
}

/// The value of an attribute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AttributeValue {
    /// `class="a"`, `size=10`, or a bare `disabled` (empty).
    Literal(String),
    /// `class={{name}}`
    Interpolation(Interpolation),
    /// `class={{helper arg}}`
    Helper(HelperCall),
    /// `class={{$title}}`
    CssModule(CssModuleRef),
    /// A quoted value with at least one dynamic part: `class="{{x}}-fixed"`.
    Concat(Vec<AttrFragment>),
}

/// One piece of a concatenated attribute value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AttrFragment {
    Text(String),
    Interpolation(Interpolation),
    Helper(HelperCall),
    CssModule(CssModuleRef),
}

/// A helper invocation.
///
/// Inline calls (`{{t "key"}}`) have no branches. Block calls always have a
/// primary branch first, followed by `{{else …}}` branches in source order.
/// `inverted` marks a `{{^name}}…{{/name}}` section.
///
/// `strip` belongs to the opening mustache, `close_strip` to `{{/name}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HelperCall {
    pub name: String,
    pub args: Vec<Expression>,
    pub branches: Vec<Branch>,
    pub escaped: bool,
    pub inverted: bool,
    pub strip: WhitespaceControl,
    pub close_strip: WhitespaceControl,
    pub position: SourcePosition,
}

impl HelperCall {
    pub fn is_block(&self) -> bool {
        !self.branches.is_empty()
    }
}

/// One branch of a block helper.
///
/// The primary branch has no keyword. `{{else}}` yields `keyword: "else"`;
/// `{{else if cond}}` additionally carries `chain: "if"` and `args: [cond]`.
/// `block_params` are the names from `as |a b|` on the mustache that opened
/// the branch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Branch {
    pub keyword: Option<String>,
    pub chain: Option<String>,
    pub args: Vec<Expression>,
    pub block_params: Vec<String>,
    pub children: Vec<Node>,
    pub strip: WhitespaceControl,
    pub position: SourcePosition,
}

impl Branch {
    pub fn is_primary(&self) -> bool {
        self.keyword.is_none()
    }
}

/// `<?target payload?>`, payload kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingInstruction {
    pub target: String,
    pub payload: String,
    pub position: SourcePosition,
}

/// A CSS-module class lookup. Resolution is left to the consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CssModuleRef {
    pub path: Vec<String>,
    pub strip: WhitespaceControl,
    pub position: SourcePosition,
}

/// Raw style-sheet text scoped to its enclosing element.
///
/// `owner` is `None` when the block sits at document level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopedCssBlock {
    pub css: String,
    pub attributes: Vec<Attribute>,
    pub owner: Option<NodeId>,
    pub position: SourcePosition,
}

/// A slot that receives child content from the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderPropBinding {
    pub name: String,
    pub strip: WhitespaceControl,
    pub position: SourcePosition,
}

// ---------------------------------------------------------------------------
// Expression-level AST
// ---------------------------------------------------------------------------

/// A helper argument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expression {
    /// `user.name`, `items.[0]`, `@index`, `../title`
    Path(Vec<String>),

    /// `"hello"`, `'world'`
    String(String),

    /// `42`, `-1.5`
    Number(f64),

    /// `true`, `false`
    Boolean(bool),

    /// `null`, `undefined`
    Null,

    /// `(helper args)`
    SubExpression { name: String, args: Vec<Expression> },

    /// `key=value`
    Named { name: String, value: Box<Expression> },
}
