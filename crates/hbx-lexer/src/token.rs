use serde::Serialize;

/// A point in source text: byte offset plus 1-based line and column.
///
/// Columns count characters, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SourcePosition {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl SourcePosition {
    pub fn new(offset: usize, line: usize, column: usize) -> Self {
        Self {
            offset,
            line,
            column,
        }
    }
}

impl Default for SourcePosition {
    fn default() -> Self {
        Self::new(0, 1, 1)
    }
}

/// The byte range a token covers, with the line and column of its first character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, line: usize, column: usize) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }

    /// Position of the first character of the span.
    pub fn position(&self) -> SourcePosition {
        SourcePosition::new(self.start, self.line, self.column)
    }
}

/// Token classification for HBX source.
///
/// Data-carrying variants embed their value directly (no separate `value` field on Token).
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Markup
    Text(String),
    TagOpenStart(String), // <name
    TagEnd,               // >
    TagSelfCloseEnd,      // />
    TagClose(String),     // </name>
    HtmlComment(String),  // <!-- ... -->

    // Attributes
    AttrName(String),
    AttrEquals,
    AttrValueLiteral(String),
    AttrValueQuoteStart(char),
    AttrValueQuoteEnd(char),

    // Processing instructions
    PiOpen(String), // <?target
    PiClose,        // ?>

    // Mustache delimiters
    InterpOpen { raw: bool },  // {{ or {{{
    InterpClose { raw: bool }, // }} or }}}
    HelperOpen,                // {{#
    HelperClose,               // {{/
    InverseOpen,               // {{^name
    BranchKeyword(String),     // {{else
    MustacheComment(String),   // {{! ... }}
    Strip,                     // ~ after an opener or before a closer

    // Markers
    CssModuleMarker,  // {{$
    RenderPropMarker, // {{>
    ScopedCssMarker,  // `scoped` on <style>

    // Expressions (inside mustaches)
    Ident(String),
    StringLit(String),
    Number(f64),
    Boolean(bool),
    Null,
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Equals,
    Slash,
    Pipe,

    // End of input
    Eof,
}

impl TokenKind {
    /// Human-readable description used in diagnostics.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Text(_) => "text".into(),
            TokenKind::TagOpenStart(name) => format!("`<{name}`"),
            TokenKind::TagEnd => "`>`".into(),
            TokenKind::TagSelfCloseEnd => "`/>`".into(),
            TokenKind::TagClose(name) => format!("`</{name}>`"),
            TokenKind::HtmlComment(_) => "an HTML comment".into(),
            TokenKind::AttrName(name) => format!("attribute `{name}`"),
            TokenKind::AttrEquals | TokenKind::Equals => "`=`".into(),
            TokenKind::AttrValueLiteral(_) => "an attribute value".into(),
            TokenKind::AttrValueQuoteStart(q) | TokenKind::AttrValueQuoteEnd(q) => {
                format!("`{q}`")
            }
            TokenKind::PiOpen(target) => format!("`<?{target}`"),
            TokenKind::PiClose => "`?>`".into(),
            TokenKind::InterpOpen { raw: true } => "`{{{`".into(),
            TokenKind::InterpOpen { raw: false } => "`{{`".into(),
            TokenKind::InterpClose { raw: true } => "`}}}`".into(),
            TokenKind::InterpClose { raw: false } => "`}}`".into(),
            TokenKind::HelperOpen => "`{{#`".into(),
            TokenKind::HelperClose => "`{{/`".into(),
            TokenKind::InverseOpen => "`{{^`".into(),
            TokenKind::BranchKeyword(keyword) => format!("`{{{{{keyword}`"),
            TokenKind::MustacheComment(_) => "a mustache comment".into(),
            TokenKind::Strip => "`~`".into(),
            TokenKind::CssModuleMarker => "a CSS module reference".into(),
            TokenKind::RenderPropMarker => "a render-prop binding".into(),
            TokenKind::ScopedCssMarker => "the scoped style marker".into(),
            TokenKind::Ident(name) => format!("`{name}`"),
            TokenKind::StringLit(s) => format!("string {s:?}"),
            TokenKind::Number(n) => format!("number {n}"),
            TokenKind::Boolean(b) => format!("`{b}`"),
            TokenKind::Null => "`null`".into(),
            TokenKind::Dot => "`.`".into(),
            TokenKind::LBracket => "`[`".into(),
            TokenKind::RBracket => "`]`".into(),
            TokenKind::LParen => "`(`".into(),
            TokenKind::RParen => "`)`".into(),
            TokenKind::Slash => "`/`".into(),
            TokenKind::Pipe => "`|`".into(),
            TokenKind::Eof => "end of input".into(),
        }
    }
}

/// A token produced by the HBX scanner.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// HTML5 void elements (self-closing, no children).
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Check if a tag name is an HTML5 void element.
pub fn is_void_element(tag: &str) -> bool {
    VOID_ELEMENTS
        .iter()
        .any(|void| void.eq_ignore_ascii_case(tag))
}
