//! HBX Parser
//!
//! Builds a position-annotated `Document` from HBX template source.
//! The scanner from `hbx-lexer` is pulled lazily, so the first problem in
//! source order is the one reported; there is no recovery and no partial tree.
//!
//! ```
//! use hbx_parser::ast::Node;
//!
//! let doc = hbx_parser::parse("<p>{{name}}</p>").unwrap();
//! assert!(matches!(&doc.children[0], Node::Element(el) if el.tag == "p"));
//! ```

pub mod ast;
mod expr_parser;
pub mod parser;

pub use ast::{Document, Expression, Node};
pub use hbx_lexer::{SourcePosition, Syntax};
pub use parser::Parser;

use hbx_lexer::{LexErrorKind, LexerError, Scanner};

/// Parse source with the default syntax.
pub fn parse(source: &str) -> Result<Document, ParseError> {
    Parser::<Scanner>::parse(source)
}

/// Parse source with custom markers and keywords.
pub fn parse_with(source: &str, syntax: &Syntax) -> Result<Document, ParseError> {
    Parser::<Scanner>::parse_with(source, syntax)
}

/// The class of a parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The scanner could not classify the input (unterminated delimiter,
    /// unexpected character).
    Lex,
    /// Mismatched or missing close, misplaced branch keyword, unknown chain.
    Structural,
    /// Malformed attribute syntax.
    Attribute,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Lex => f.write_str("Lexical"),
            ErrorKind::Structural => f.write_str("Structural"),
            ErrorKind::Attribute => f.write_str("Attribute"),
        }
    }
}

/// Parser error with position information.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error at line {}, column {}: {message}", position.line, position.column)]
pub struct ParseError {
    pub kind: ErrorKind,
    pub message: String,
    pub position: SourcePosition,
}

impl From<LexerError> for ParseError {
    fn from(e: LexerError) -> Self {
        let kind = match e.kind {
            LexErrorKind::Malformed => ErrorKind::Lex,
            LexErrorKind::Attribute => ErrorKind::Attribute,
        };
        ParseError {
            kind,
            message: e.message,
            position: e.position,
        }
    }
}
