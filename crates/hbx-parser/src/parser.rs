//! Document parser for HBX.
//!
//! Parses a stream of source-level tokens (from `hbx-lexer`) into a `Document` AST.
//! Handles element and block-helper nesting, `{{else}}` branch attachment,
//! attribute values, and the marker-driven leaf nodes, and delegates mustache
//! paths and arguments to `expr_parser`.
//!
//! Uses recursive descent with an explicit stack of open constructs. Every
//! `parse_children` call stops at the first token that could close something;
//! the frame that owns the top of the stack decides whether that token is its
//! own closer or an error.

use std::collections::VecDeque;

use crate::ast::{
    AttrFragment, Attribute, AttributeValue, Branch, Comment, CommentKind, CssModuleRef,
    Document, Element, HelperCall, Interpolation, Node, NodeId, ProcessingInstruction,
    RenderPropBinding, ScopedCssBlock, TextNode, WhitespaceControl,
};
use crate::expr_parser::helper_name;
use crate::{ErrorKind, ParseError};
use hbx_lexer::{is_void_element, LexerError, Scanner, SourcePosition, Span, Syntax, Token, TokenKind};

/// A construct that has been opened but not yet closed.
#[derive(Debug, Clone)]
enum Open {
    /// `id` is `None` for `<style scoped>`, which does not become an element.
    Element {
        tag: String,
        id: Option<NodeId>,
        position: SourcePosition,
    },
    Block {
        name: String,
        inverted: bool,
        position: SourcePosition,
    },
}

impl Open {
    fn describe(&self) -> String {
        match self {
            Open::Element { tag, .. } => format!("`<{tag}>`"),
            Open::Block {
                name,
                inverted: true,
                ..
            } => format!("`{{{{^{name}}}}}`"),
            Open::Block { name, .. } => format!("`{{{{#{name}}}}}`"),
        }
    }

    fn closer(&self) -> String {
        match self {
            Open::Element { tag, .. } => format!("`</{tag}>`"),
            Open::Block { name, .. } => format!("`{{{{/{name}}}}}`"),
        }
    }

    fn position(&self) -> SourcePosition {
        match self {
            Open::Element { position, .. } | Open::Block { position, .. } => *position,
        }
    }
}

/// Result of parsing a `{{…}}` / `{{{…}}}` mustache.
enum Mustache {
    Interpolation(Interpolation),
    Helper(HelperCall),
}

/// HBX document parser.
///
/// Converts a token stream from the scanner into a hierarchical `Document`
/// AST. Tokens are pulled on demand, so a lexical error is only reported if
/// no structural error precedes it.
pub struct Parser<I>
where
    I: Iterator<Item = Result<Token, LexerError>>,
{
    tokens: I,
    lookahead: VecDeque<Token>,
    syntax: Syntax,
    open: Vec<Open>,
    next_element_id: usize,
    last_span: Span,
}

impl<'a> Parser<Scanner<'a>> {
    /// Parse source code into a document AST.
    pub fn parse(source: &'a str) -> Result<Document, ParseError> {
        Self::parse_with(source, &Syntax::default())
    }

    /// Parse source code with custom markers and keywords.
    pub fn parse_with(source: &'a str, syntax: &Syntax) -> Result<Document, ParseError> {
        let scanner = Scanner::with_syntax(source, syntax.clone());
        let mut parser = Parser::with_syntax(scanner, syntax.clone());
        parser.parse_document()
    }
}

impl<I> Parser<I>
where
    I: Iterator<Item = Result<Token, LexerError>>,
{
    /// Create a new parser for the given tokens.
    pub fn new(tokens: I) -> Self {
        Self::with_syntax(tokens, Syntax::default())
    }

    /// Create a parser that validates branches against a custom syntax.
    pub fn with_syntax(tokens: I, syntax: Syntax) -> Self {
        Self {
            tokens,
            lookahead: VecDeque::new(),
            syntax,
            open: Vec::new(),
            next_element_id: 0,
            last_span: Span::new(0, 0, 1, 1),
        }
    }

    /// Parse a full document.
    pub fn parse_document(&mut self) -> Result<Document, ParseError> {
        log::debug!("parse: start");

        let children = self.parse_children()?;
        let token = self.advance()?;
        if token.kind != TokenKind::Eof {
            return Err(self.unexpected_close(&token));
        }

        log::debug!(
            "parse: done, {} top-level nodes, {} elements",
            children.len(),
            self.next_element_id
        );
        Ok(Document { children })
    }

    /// Parse nodes until a token that may close the current construct.
    /// That token is left for the caller.
    fn parse_children(&mut self) -> Result<Vec<Node>, ParseError> {
        let mut children = Vec::new();

        loop {
            let token = self.peek()?.clone();
            let position = token.span.position();

            let node = match token.kind {
                TokenKind::TagClose(_)
                | TokenKind::HelperClose
                | TokenKind::BranchKeyword(_)
                | TokenKind::Eof => return Ok(children),

                TokenKind::Text(text) => {
                    self.advance()?;
                    Node::Text(TextNode { text, position })
                }
                TokenKind::HtmlComment(text) => {
                    self.advance()?;
                    Node::Comment(Comment {
                        text,
                        kind: CommentKind::Html,
                        position,
                    })
                }
                TokenKind::MustacheComment(text) => {
                    self.advance()?;
                    Node::Comment(Comment {
                        text,
                        kind: CommentKind::Mustache,
                        position,
                    })
                }
                TokenKind::TagOpenStart(_) => self.parse_element()?,
                TokenKind::InterpOpen { .. } => match self.parse_mustache()? {
                    Mustache::Interpolation(interp) => Node::Interpolation(interp),
                    Mustache::Helper(helper) => Node::Helper(helper),
                },
                TokenKind::HelperOpen | TokenKind::InverseOpen => self.parse_block()?,
                TokenKind::CssModuleMarker => Node::CssModuleRef(self.parse_css_module_ref()?),
                TokenKind::RenderPropMarker => self.parse_render_prop()?,
                TokenKind::PiOpen(_) => self.parse_processing_instruction()?,

                other => {
                    return Err(self.error(
                        ErrorKind::Structural,
                        format!("Unexpected {}", other.describe()),
                        position,
                    ))
                }
            };

            children.push(node);
        }
    }

    // =========================================================================
    // Elements
    // =========================================================================

    /// Parse an element:
    /// ```text
    /// <div class="card {{$card}}">…</div>
    /// ```
    fn parse_element(&mut self) -> Result<Node, ParseError> {
        let open = self.advance()?;
        let position = open.span.position();
        let TokenKind::TagOpenStart(tag) = open.kind else {
            return Err(self.unexpected(&open, "a tag"));
        };

        // Stage 1: attributes
        let mut attributes = Vec::new();
        let mut scoped = false;
        let self_closing = loop {
            let token = self.advance()?;
            match token.kind {
                TokenKind::AttrName(name) => {
                    let attribute = self.parse_attribute(name, token.span.position())?;
                    attributes.push(attribute);
                }
                TokenKind::ScopedCssMarker => {
                    if self.peek_kind()? == TokenKind::AttrEquals {
                        return Err(self.error(
                            ErrorKind::Attribute,
                            format!(
                                "`{}` on `<{tag}>` takes no value",
                                self.syntax.scoped_style_attribute
                            ),
                            token.span.position(),
                        ));
                    }
                    scoped = true;
                }
                TokenKind::TagEnd => break false,
                TokenKind::TagSelfCloseEnd => break true,
                other => {
                    return Err(self.error(
                        ErrorKind::Attribute,
                        format!("Unexpected {} in `<{tag}>`", other.describe()),
                        token.span.position(),
                    ))
                }
            }
        };

        if scoped {
            return self.parse_scoped_css(tag, attributes, self_closing, position);
        }

        let id = NodeId(self.next_element_id);
        self.next_element_id += 1;

        if self_closing || is_void_element(&tag) {
            return Ok(Node::Element(Element {
                id,
                tag,
                attributes,
                children: Vec::new(),
                self_closing,
                position,
            }));
        }

        // Stage 2: children up to the matching close tag
        log::trace!("open <{tag}> at {}:{}", position.line, position.column);
        self.open.push(Open::Element {
            tag: tag.clone(),
            id: Some(id),
            position,
        });

        let children = self.parse_children()?;
        let token = self.advance()?;
        match &token.kind {
            TokenKind::TagClose(close) if close.eq_ignore_ascii_case(&tag) => {}
            _ => return Err(self.unexpected_close(&token)),
        }

        self.open.pop();
        log::trace!("close <{tag}>");

        Ok(Node::Element(Element {
            id,
            tag,
            attributes,
            children,
            self_closing: false,
            position,
        }))
    }

    /// Parse the body of `<style scoped>`. The CSS itself is not interpreted.
    fn parse_scoped_css(
        &mut self,
        tag: String,
        attributes: Vec<Attribute>,
        self_closing: bool,
        position: SourcePosition,
    ) -> Result<Node, ParseError> {
        let owner = self.enclosing_element();

        if self_closing {
            return Ok(Node::ScopedCss(ScopedCssBlock {
                css: String::new(),
                attributes,
                owner,
                position,
            }));
        }

        self.open.push(Open::Element {
            tag: tag.clone(),
            id: None,
            position,
        });

        let css = match self.peek_kind()? {
            TokenKind::Text(css) => {
                self.advance()?;
                css
            }
            _ => String::new(),
        };

        let token = self.advance()?;
        match &token.kind {
            TokenKind::TagClose(close) if close.eq_ignore_ascii_case(&tag) => {}
            _ => return Err(self.unexpected_close(&token)),
        }
        self.open.pop();

        Ok(Node::ScopedCss(ScopedCssBlock {
            css,
            attributes,
            owner,
            position,
        }))
    }

    /// The innermost open element, if any. Blocks in between are skipped.
    fn enclosing_element(&self) -> Option<NodeId> {
        self.open.iter().rev().find_map(|open| match open {
            Open::Element { id, .. } => *id,
            Open::Block { .. } => None,
        })
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    fn parse_attribute(
        &mut self,
        name: String,
        position: SourcePosition,
    ) -> Result<Attribute, ParseError> {
        let value = if self.peek_kind()? == TokenKind::AttrEquals {
            self.advance()?;
            self.parse_attribute_value()?
        } else {
            // `disabled` is the same as `disabled=""`
            AttributeValue::Literal(String::new())
        };

        Ok(Attribute {
            name,
            value,
            position,
        })
    }

    fn parse_attribute_value(&mut self) -> Result<AttributeValue, ParseError> {
        let token = self.peek()?.clone();

        match token.kind {
            TokenKind::AttrValueLiteral(value) => {
                self.advance()?;
                Ok(AttributeValue::Literal(value))
            }
            TokenKind::AttrValueQuoteStart(_) => {
                self.advance()?;
                self.parse_quoted_value()
            }
            TokenKind::InterpOpen { .. } | TokenKind::CssModuleMarker => {
                Ok(match self.parse_dynamic_fragment()? {
                    AttrFragment::Interpolation(interp) => AttributeValue::Interpolation(interp),
                    AttrFragment::Helper(helper) => AttributeValue::Helper(helper),
                    AttrFragment::CssModule(css) => AttributeValue::CssModule(css),
                    AttrFragment::Text(text) => AttributeValue::Literal(text),
                })
            }
            other => Err(self.error(
                ErrorKind::Attribute,
                format!("Expected an attribute value, found {}", other.describe()),
                token.span.position(),
            )),
        }
    }

    /// Parse fragments up to the closing quote.
    fn parse_quoted_value(&mut self) -> Result<AttributeValue, ParseError> {
        let mut fragments: Vec<AttrFragment> = Vec::new();

        loop {
            let token = self.peek()?.clone();
            match token.kind {
                TokenKind::AttrValueQuoteEnd(_) => {
                    self.advance()?;
                    break;
                }
                TokenKind::AttrValueLiteral(text) => {
                    self.advance()?;
                    match fragments.last_mut() {
                        Some(AttrFragment::Text(previous)) => previous.push_str(&text),
                        _ => fragments.push(AttrFragment::Text(text)),
                    }
                }
                TokenKind::MustacheComment(_) => {
                    self.advance()?;
                }
                TokenKind::InterpOpen { .. } | TokenKind::CssModuleMarker => {
                    fragments.push(self.parse_dynamic_fragment()?);
                }
                other => {
                    return Err(self.error(
                        ErrorKind::Attribute,
                        format!("{} is not allowed inside an attribute value", other.describe()),
                        token.span.position(),
                    ))
                }
            }
        }

        let is_literal = fragments
            .iter()
            .all(|fragment| matches!(fragment, AttrFragment::Text(_)));
        if !is_literal {
            return Ok(AttributeValue::Concat(fragments));
        }

        let text = fragments
            .into_iter()
            .filter_map(|fragment| match fragment {
                AttrFragment::Text(text) => Some(text),
                _ => None,
            })
            .collect();
        Ok(AttributeValue::Literal(text))
    }

    fn parse_dynamic_fragment(&mut self) -> Result<AttrFragment, ParseError> {
        if self.peek_kind()? == TokenKind::CssModuleMarker {
            return Ok(AttrFragment::CssModule(self.parse_css_module_ref()?));
        }

        Ok(match self.parse_mustache()? {
            Mustache::Interpolation(interp) => AttrFragment::Interpolation(interp),
            Mustache::Helper(helper) => AttrFragment::Helper(helper),
        })
    }

    // =========================================================================
    // Mustaches and block helpers
    // =========================================================================

    /// Parse `{{path}}` into an interpolation or `{{name args…}}` into an
    /// inline helper call.
    fn parse_mustache(&mut self) -> Result<Mustache, ParseError> {
        let open = self.advance()?;
        let escaped = !matches!(open.kind, TokenKind::InterpOpen { raw: true });
        let position = open.span.position();
        let before = self.eat_strip()?;

        let path = self.parse_path()?;
        if self.at_mustache_close()? {
            let strip = self.expect_mustache_close(before)?;
            return Ok(Mustache::Interpolation(Interpolation {
                path,
                escaped,
                strip,
                position,
            }));
        }

        let args = self.parse_arguments()?;
        if self.at_block_params()? {
            let token = self.advance()?;
            return Err(self.error(
                ErrorKind::Structural,
                "Block parameters are only allowed on a block helper".into(),
                token.span.position(),
            ));
        }
        let strip = self.expect_mustache_close(before)?;

        Ok(Mustache::Helper(HelperCall {
            name: helper_name(&path),
            args,
            branches: Vec::new(),
            escaped,
            inverted: false,
            strip,
            close_strip: WhitespaceControl::default(),
            position,
        }))
    }

    /// Parse a block helper or an inverted section:
    /// ```text
    /// {{#if a}}…{{else if b}}…{{else}}…{{/if}}
    /// {{#each items as |item|}}…{{^}}…{{/each}}
    /// {{^items}}…{{/items}}
    /// ```
    fn parse_block(&mut self) -> Result<Node, ParseError> {
        let open = self.advance()?;
        let position = open.span.position();
        let inverted = open.kind == TokenKind::InverseOpen;
        let before = self.eat_strip()?;

        let name = self.parse_helper_name()?;
        let args = self.parse_arguments()?;
        let params = self.parse_block_params()?;
        let strip = self.expect_mustache_close(before)?;

        log::trace!("open {{{{#{name}}}}} at {}:{}", position.line, position.column);
        self.open.push(Open::Block {
            name: name.clone(),
            inverted,
            position,
        });

        let mut branches = Vec::new();
        let mut keyword = None;
        let mut chain = None;
        let mut branch_args = Vec::new();
        let mut block_params = params;
        let mut branch_strip = strip;
        let mut branch_position = position;
        let mut accepts_branches = true;

        let close_strip = loop {
            let children = self.parse_children()?;
            let token = self.advance()?;

            branches.push(Branch {
                keyword: keyword.take(),
                chain: chain.take(),
                args: std::mem::take(&mut branch_args),
                block_params: std::mem::take(&mut block_params),
                children,
                strip: branch_strip,
                position: branch_position,
            });

            match token.kind {
                TokenKind::BranchKeyword(word) => {
                    let at = token.span.position();
                    if !accepts_branches {
                        return Err(self.error(
                            ErrorKind::Structural,
                            format!(
                                "`{{{{#{name}}}}}` already has a final `{{{{{word}}}}}` branch"
                            ),
                            at,
                        ));
                    }

                    let before = self.eat_strip()?;
                    let chained = match self.peek_kind()? {
                        TokenKind::Ident(_) if !self.at_block_params()? => {
                            Some(self.parse_helper_name()?)
                        }
                        _ => None,
                    };
                    let args = self.parse_arguments()?;
                    let params = self.parse_block_params()?;
                    let strip = self.expect_mustache_close(before)?;

                    match &chained {
                        Some(helper) if !self.syntax.accepts_chain(&name, helper) => {
                            return Err(self.error(
                                ErrorKind::Structural,
                                format!(
                                    "`{{{{#{name}}}}}` does not accept `{{{{{word} {helper}}}}}`"
                                ),
                                at,
                            ));
                        }
                        Some(_) => {}
                        None if !args.is_empty() || !params.is_empty() => {
                            return Err(self.error(
                                ErrorKind::Structural,
                                format!("`{{{{{word}}}}}` takes no arguments without a helper name"),
                                at,
                            ));
                        }
                        None => accepts_branches = false,
                    }

                    log::trace!("branch {word} of {{{{#{name}}}}} at {}:{}", at.line, at.column);
                    keyword = Some(word);
                    chain = chained;
                    branch_args = args;
                    block_params = params;
                    branch_strip = strip;
                    branch_position = at;
                }
                TokenKind::HelperClose => {
                    let before = self.eat_strip()?;
                    let close_name = self.parse_helper_name()?;
                    let close_strip = self.expect_mustache_close(before)?;

                    if close_name != name {
                        return Err(self.error(
                            ErrorKind::Structural,
                            format!(
                                "Expected `{{{{/{name}}}}}` to close the block opened at line {}, column {}, found `{{{{/{close_name}}}}}`",
                                position.line, position.column
                            ),
                            token.span.position(),
                        ));
                    }
                    break close_strip;
                }
                _ => return Err(self.unexpected_close(&token)),
            }
        };

        self.open.pop();
        log::trace!("close {{{{/{name}}}}}");

        Ok(Node::Helper(HelperCall {
            name,
            args,
            branches,
            escaped: true,
            inverted,
            strip,
            close_strip,
            position,
        }))
    }

    // =========================================================================
    // Markers and processing instructions
    // =========================================================================

    /// `{{$card.title}}`
    fn parse_css_module_ref(&mut self) -> Result<CssModuleRef, ParseError> {
        let marker = self.advance()?;
        let before = self.eat_strip()?;
        let path = self.parse_path()?;
        let strip = self.expect_mustache_close(before)?;

        Ok(CssModuleRef {
            path,
            strip,
            position: marker.span.position(),
        })
    }

    /// `{{> header}}` or `{{> "named slot"}}`
    fn parse_render_prop(&mut self) -> Result<Node, ParseError> {
        let marker = self.advance()?;
        let before = self.eat_strip()?;

        let name = match self.peek_kind()? {
            TokenKind::StringLit(name) => {
                self.advance()?;
                name
            }
            _ => self.parse_helper_name()?,
        };
        let strip = self.expect_mustache_close(before)?;

        Ok(Node::RenderProp(RenderPropBinding {
            name,
            strip,
            position: marker.span.position(),
        }))
    }

    /// `<?target payload?>`
    fn parse_processing_instruction(&mut self) -> Result<Node, ParseError> {
        let open = self.advance()?;
        let position = open.span.position();
        let TokenKind::PiOpen(target) = open.kind else {
            return Err(self.unexpected(&open, "a processing instruction"));
        };

        let payload = match self.peek_kind()? {
            TokenKind::Text(payload) => {
                self.advance()?;
                payload
            }
            _ => String::new(),
        };

        let close = self.advance()?;
        if close.kind != TokenKind::PiClose {
            return Err(self.unexpected(&close, "`?>`"));
        }

        Ok(Node::ProcessingInstruction(ProcessingInstruction {
            target,
            payload,
            position,
        }))
    }

    // =========================================================================
    // Errors
    // =========================================================================

    /// Describe a closing token the innermost open construct cannot accept.
    fn unexpected_close(&self, token: &Token) -> ParseError {
        let message = match (&token.kind, self.open.last()) {
            (TokenKind::Eof, Some(open)) => {
                let at = open.position();
                format!(
                    "Unclosed {} opened at line {}, column {}, expected {} before end of input",
                    open.describe(),
                    at.line,
                    at.column,
                    open.closer()
                )
            }
            (TokenKind::TagClose(tag), _) if is_void_element(tag) => {
                format!("`<{tag}>` is a void element and cannot have a closing tag")
            }
            (TokenKind::TagClose(tag), None) => {
                format!("Unexpected `</{tag}>`, no element is open")
            }
            (TokenKind::HelperClose, None) => "Unexpected `{{/`, no block helper is open".into(),
            (TokenKind::BranchKeyword(word), Some(open @ Open::Element { .. })) => format!(
                "`{{{{{word}}}}}` cannot appear inside {}, close it with {} first",
                open.describe(),
                open.closer()
            ),
            (TokenKind::BranchKeyword(word), _) => {
                format!("`{{{{{word}}}}}` outside of a block helper")
            }
            (kind, Some(open)) => {
                format!("Expected {}, found {}", open.closer(), kind.describe())
            }
            (kind, None) => format!("Unexpected {}", kind.describe()),
        };

        self.error(ErrorKind::Structural, message, token.span.position())
    }

    pub(crate) fn unexpected(&self, token: &Token, expected: &str) -> ParseError {
        self.error(
            ErrorKind::Structural,
            format!("Expected {expected}, found {}", token.kind.describe()),
            token.span.position(),
        )
    }

    pub(crate) fn error(
        &self,
        kind: ErrorKind,
        message: String,
        position: SourcePosition,
    ) -> ParseError {
        ParseError {
            kind,
            message,
            position,
        }
    }

    // =========================================================================
    // Token navigation helpers
    // =========================================================================

    pub(crate) fn peek(&mut self) -> Result<&Token, ParseError> {
        self.peek_nth(0)
    }

    pub(crate) fn peek_nth(&mut self, n: usize) -> Result<&Token, ParseError> {
        while self.lookahead.len() <= n {
            let token = match self.tokens.next() {
                Some(token) => token?,
                None => {
                    let span = self.lookahead.back().map_or(self.last_span, |t| t.span);
                    Token::new(
                        TokenKind::Eof,
                        Span::new(span.end, span.end, span.line, span.column),
                    )
                }
            };
            self.lookahead.push_back(token);
        }
        Ok(&self.lookahead[n])
    }

    pub(crate) fn peek_kind(&mut self) -> Result<TokenKind, ParseError> {
        Ok(self.peek()?.kind.clone())
    }

    pub(crate) fn peek_nth_kind(&mut self, n: usize) -> Result<TokenKind, ParseError> {
        Ok(self.peek_nth(n)?.kind.clone())
    }

    pub(crate) fn advance(&mut self) -> Result<Token, ParseError> {
        let token = self.peek()?.clone();
        self.lookahead.pop_front();
        self.last_span = token.span;
        Ok(token)
    }
}
