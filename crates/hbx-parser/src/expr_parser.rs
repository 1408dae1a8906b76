//! Expression parser for HBX mustaches.
//!
//! Parses the inside of `{{…}}`: dotted, slashed, relative and bracketed
//! paths, literals, `key=value` named arguments, `(helper args)`
//! sub-expressions and `as |a b|` block params.
//! Works directly on the document parser's token stream; there is no
//! separate expression lexer.

use crate::ast::{Expression, WhitespaceControl};
use crate::parser::Parser;
use crate::{ErrorKind, ParseError};
use hbx_lexer::{LexerError, Token, TokenKind};

impl<I> Parser<I>
where
    I: Iterator<Item = Result<Token, LexerError>>,
{
    /// Parse `a.b.c`, `items.0`, `../title` or `map["key"][1]` into its
    /// segments.
    pub(crate) fn parse_path(&mut self) -> Result<Vec<String>, ParseError> {
        let token = self.advance()?;
        let TokenKind::Ident(head) = token.kind else {
            return Err(self.unexpected(&token, "a path"));
        };

        let mut segments = vec![head];
        loop {
            match self.peek_kind()? {
                TokenKind::Dot | TokenKind::Slash => {
                    self.advance()?;
                    // `items.[0]` is the same as `items[0]`
                    if self.peek_kind()? == TokenKind::LBracket {
                        continue;
                    }
                    let token = self.advance()?;
                    let TokenKind::Ident(segment) = token.kind else {
                        return Err(self.unexpected(&token, "a path segment"));
                    };

                    // `..` may only follow other `..` segments; `.` only heads a path
                    let parent_chain = segment == ".." && segments.iter().all(|s| s == "..");
                    if (segment == "." || segment == "..") && !parent_chain {
                        return Err(self.error(
                            ErrorKind::Structural,
                            format!("`{segment}` can only appear at the start of a path"),
                            token.span.position(),
                        ));
                    }
                    segments.push(segment);
                }
                TokenKind::LBracket => {
                    self.advance()?;
                    let token = self.advance()?;
                    let segment = match token.kind {
                        TokenKind::Ident(segment) | TokenKind::StringLit(segment) => segment,
                        _ => return Err(self.unexpected(&token, "a segment inside `[…]`")),
                    };

                    let close = self.advance()?;
                    if close.kind != TokenKind::RBracket {
                        return Err(self.unexpected(&close, "`]`"));
                    }
                    segments.push(segment);
                }
                _ => return Ok(segments),
            }
        }
    }

    /// A helper name, with dotted segments joined back together.
    pub(crate) fn parse_helper_name(&mut self) -> Result<String, ParseError> {
        Ok(helper_name(&self.parse_path()?))
    }

    /// Parse arguments up to the closing braces or `as |…|`.
    pub(crate) fn parse_arguments(&mut self) -> Result<Vec<Expression>, ParseError> {
        let mut args = Vec::new();
        while !self.at_mustache_close()? && !self.at_block_params()? {
            args.push(self.parse_argument()?);
        }
        Ok(args)
    }

    fn parse_argument(&mut self) -> Result<Expression, ParseError> {
        if let TokenKind::Ident(name) = self.peek_kind()? {
            if self.peek_nth_kind(1)? == TokenKind::Equals {
                self.advance()?; // name
                self.advance()?; // =
                let value = self.parse_value()?;
                return Ok(Expression::Named {
                    name,
                    value: Box::new(value),
                });
            }
        }

        self.parse_value()
    }

    fn parse_value(&mut self) -> Result<Expression, ParseError> {
        let expr = match self.peek_kind()? {
            TokenKind::Ident(_) => return Ok(Expression::Path(self.parse_path()?)),
            TokenKind::LParen => return self.parse_subexpression(),
            TokenKind::StringLit(s) => Expression::String(s),
            TokenKind::Number(n) => Expression::Number(n),
            TokenKind::Boolean(b) => Expression::Boolean(b),
            TokenKind::Null => Expression::Null,
            _ => {
                let token = self.advance()?;
                return Err(self.unexpected(&token, "an argument"));
            }
        };

        self.advance()?;
        Ok(expr)
    }

    /// `(name args…)`
    fn parse_subexpression(&mut self) -> Result<Expression, ParseError> {
        self.advance()?; // (
        let name = self.parse_helper_name()?;

        let mut args = Vec::new();
        while self.peek_kind()? != TokenKind::RParen {
            args.push(self.parse_argument()?);
        }
        self.advance()?; // )

        Ok(Expression::SubExpression { name, args })
    }

    pub(crate) fn at_block_params(&mut self) -> Result<bool, ParseError> {
        Ok(self.peek_kind()? == TokenKind::Ident("as".to_string())
            && self.peek_nth_kind(1)? == TokenKind::Pipe)
    }

    /// `as |item index|`, or nothing.
    pub(crate) fn parse_block_params(&mut self) -> Result<Vec<String>, ParseError> {
        let mut params = Vec::new();
        if !self.at_block_params()? {
            return Ok(params);
        }
        self.advance()?; // as
        self.advance()?; // |

        loop {
            let token = self.advance()?;
            match token.kind {
                TokenKind::Ident(name) if !name.starts_with('.') => params.push(name),
                TokenKind::Pipe if !params.is_empty() => return Ok(params),
                _ => return Err(self.unexpected(&token, "a block parameter name or `|`")),
            }
        }
    }

    /// Consume a `~` if one is next.
    pub(crate) fn eat_strip(&mut self) -> Result<bool, ParseError> {
        if self.peek_kind()? != TokenKind::Strip {
            return Ok(false);
        }
        self.advance()?;
        Ok(true)
    }

    pub(crate) fn at_mustache_close(&mut self) -> Result<bool, ParseError> {
        Ok(matches!(
            self.peek_kind()?,
            TokenKind::InterpClose { .. } | TokenKind::Strip
        ))
    }

    /// Consume `}}` (or `~}}`) and finish the mustache's whitespace control.
    pub(crate) fn expect_mustache_close(
        &mut self,
        before: bool,
    ) -> Result<WhitespaceControl, ParseError> {
        let after = self.eat_strip()?;
        let token = self.advance()?;
        match token.kind {
            TokenKind::InterpClose { .. } => Ok(WhitespaceControl { before, after }),
            _ => Err(self.unexpected(&token, "`}}`")),
        }
    }
}

/// Spell a path the way a helper name is written: relative heads with `/`,
/// the rest joined by `.`.
pub(crate) fn helper_name(segments: &[String]) -> String {
    let relative = segments
        .iter()
        .take_while(|s| *s == ".." || *s == ".")
        .count();
    let (heads, rest) = segments.split_at(relative);

    let mut name: String = heads.iter().map(|head| format!("{head}/")).collect();
    name.push_str(&rest.join("."));
    name
}
