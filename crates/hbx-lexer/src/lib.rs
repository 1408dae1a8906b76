//! HBX Lexer
//!
//! Tokenizes `.hbs` template source into a stream of tokens.
//! Handles literal markup, HTML tags and attributes, processing instructions,
//! mustache interpolation and helper delimiters, and the CSS-module,
//! scoped-style and render-prop markers.
//!
//! # Example
//!
//! ```
//! use hbx_lexer::Scanner;
//!
//! let tokens = Scanner::tokenize("").unwrap();
//! assert_eq!(tokens.len(), 1); // Just EOF
//! ```

pub mod scanner;
pub mod syntax;
pub mod token;

pub use scanner::Scanner;
pub use syntax::Syntax;
pub use token::{is_void_element, SourcePosition, Span, Token, TokenKind};

/// What went wrong while scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexErrorKind {
    /// A delimiter was opened but never closed, or a character cannot start
    /// any token in the current mode.
    Malformed,
    /// Attribute syntax is broken: a missing value after `=`, or an
    /// unterminated quoted value.
    Attribute,
}

/// Lexer error with position information.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Lexer error at line {}, column {}: {message}", position.line, position.column)]
pub struct LexerError {
    pub kind: LexErrorKind,
    pub message: String,
    pub position: SourcePosition,
}
