use std::collections::VecDeque;
use std::iter::FusedIterator;

use crate::syntax::Syntax;
use crate::token::{SourcePosition, Span, Token, TokenKind};
use crate::{LexErrorKind, LexerError};

/// Scanner mode determines which constructs are recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannerMode {
    /// Markup content: text, tags, comments, processing instructions, mustaches.
    Text,
    /// Inside `<name …` until `>` or `/>`. Mustaches are only accepted as values.
    Tag { name: String, start: SourcePosition },
    /// Inside a quoted attribute value. Mustaches are recognized, tags are not.
    AttrValue { quote: char, start: SourcePosition },
    /// Between a mustache opener and its closing braces.
    Mustache { raw: bool, start: SourcePosition },
    /// Body of a raw-text element such as `<script>`, kept verbatim.
    RawText { tag: String },
}

/// HBX source scanner.
///
/// Produces tokens lazily through `Iterator`, so a caller that stops at the
/// first structural problem never sees a lexical error further down the input.
///
/// - `Vec<char>` source for index-based navigation, byte offset tracked alongside
/// - Mode stack: `Text` at the bottom, pushed on `<name`, quotes and `{{`
/// - Position tracking on every token
pub struct Scanner<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
    offset: usize,
    line: usize,
    column: usize,
    modes: Vec<ScannerMode>,
    pending: VecDeque<Token>,
    syntax: Syntax,
    /// Offset just past the last path segment or `]`, where `.` separates.
    segment_end: Option<usize>,
    /// Offset just past the last `.` or `/` separator.
    separator_end: Option<usize>,
    error: Option<LexerError>,
    finished: bool,
}

impl<'a> Scanner<'a> {
    /// Create a new scanner for the given source.
    pub fn new(source: &'a str) -> Self {
        Self::with_syntax(source, Syntax::default())
    }

    /// Create a scanner with custom markers and keywords.
    pub fn with_syntax(source: &'a str, syntax: Syntax) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
            offset: 0,
            line: 1,
            column: 1,
            modes: Vec::new(),
            pending: VecDeque::new(),
            syntax,
            segment_end: None,
            separator_end: None,
            error: None,
            finished: false,
        }
    }

    /// Tokenize the entire source into a vector of tokens.
    pub fn tokenize(source: &str) -> Result<Vec<Token>, LexerError> {
        Scanner::new(source).collect()
    }

    /// Tokenize with custom markers and keywords.
    pub fn tokenize_with(source: &str, syntax: &Syntax) -> Result<Vec<Token>, LexerError> {
        Scanner::with_syntax(source, syntax.clone()).collect()
    }

    /// The mode the next token will be scanned in.
    pub fn mode(&self) -> ScannerMode {
        self.modes.last().cloned().unwrap_or(ScannerMode::Text)
    }

    /// Scan at least one more token (or finish, or fail).
    fn scan_next(&mut self) -> Result<(), LexerError> {
        match self.mode() {
            ScannerMode::Text => self.scan_text_mode(),
            ScannerMode::Tag { name, start } => self.scan_tag_mode(&name, start),
            ScannerMode::AttrValue { quote, start } => self.scan_attr_value_mode(quote, start),
            ScannerMode::Mustache { raw, start } => self.scan_mustache_mode(raw, start),
            ScannerMode::RawText { tag } => self.scan_raw_text(&tag),
        }
    }

    fn push_mode(&mut self, mode: ScannerMode) {
        log::trace!("scanner: enter {mode:?} at {}:{}", self.line, self.column);
        self.modes.push(mode);
    }

    fn pop_mode(&mut self) {
        let mode = self.modes.pop();
        log::trace!("scanner: leave {mode:?} at {}:{}", self.line, self.column);
    }

    // --- Text mode ---

    fn scan_text_mode(&mut self) -> Result<(), LexerError> {
        if self.is_at_end() {
            self.emit(TokenKind::Eof);
            self.finished = true;
            return Ok(());
        }

        let rest = self.rest();
        if rest.starts_with("{{") {
            self.scan_mustache_open()
        } else if rest.starts_with("<!--") {
            self.scan_html_comment()
        } else if rest.starts_with("</") && is_name_start(self.peek_at(2)) {
            self.scan_close_tag()
        } else if rest.starts_with("<?") && is_name_start(self.peek_at(2)) {
            self.scan_processing_instruction()
        } else if self.peek() == '<' && is_name_start(self.peek_at(1)) {
            self.scan_open_tag()
        } else {
            self.scan_text_run();
            Ok(())
        }
    }

    /// Whether the text mode would start a construct here.
    fn at_text_construct(&self) -> bool {
        let rest = self.rest();
        rest.starts_with("{{")
            || rest.starts_with("<!--")
            || (rest.starts_with("</") && is_name_start(self.peek_at(2)))
            || (rest.starts_with("<?") && is_name_start(self.peek_at(2)))
            || (self.peek() == '<' && is_name_start(self.peek_at(1)))
    }

    /// Accumulate literal characters verbatim until the next construct.
    fn scan_text_run(&mut self) {
        let start = self.current_position();
        let mut text = String::new();

        while !self.is_at_end() && (text.is_empty() || !self.at_text_construct()) {
            text.push(self.advance());
        }

        self.push_token(TokenKind::Text(text), start);
    }

    fn scan_open_tag(&mut self) -> Result<(), LexerError> {
        let start = self.current_position();
        self.advance(); // consume `<`
        let name = self.scan_name();

        self.push_token(TokenKind::TagOpenStart(name.clone()), start);
        self.push_mode(ScannerMode::Tag { name, start });
        Ok(())
    }

    fn scan_close_tag(&mut self) -> Result<(), LexerError> {
        let start = self.current_position();
        self.advance_by(2); // consume `</`
        let name = self.scan_name();
        self.skip_whitespace();

        if self.peek() != '>' {
            return Err(self.error(
                LexErrorKind::Malformed,
                format!("Expected `>` to finish closing tag `</{name}`"),
                start,
            ));
        }
        self.advance();

        self.push_token(TokenKind::TagClose(name), start);
        Ok(())
    }

    fn scan_html_comment(&mut self) -> Result<(), LexerError> {
        let start = self.current_position();
        self.advance_by(4); // consume `<!--`

        let mut content = String::new();
        while !self.rest().starts_with("-->") {
            if self.is_at_end() {
                return Err(self.error(
                    LexErrorKind::Malformed,
                    "Unterminated HTML comment".into(),
                    start,
                ));
            }
            content.push(self.advance());
        }
        self.advance_by(3);

        self.push_token(TokenKind::HtmlComment(content), start);
        Ok(())
    }

    /// Scan `<?target payload?>`. The payload is opaque.
    fn scan_processing_instruction(&mut self) -> Result<(), LexerError> {
        let start = self.current_position();
        self.advance_by(2); // consume `<?`
        let target = self.scan_name();
        self.push_token(TokenKind::PiOpen(target.clone()), start);

        self.skip_whitespace();
        let payload_start = self.current_position();
        let mut payload = String::new();
        while !self.rest().starts_with("?>") {
            if self.is_at_end() {
                return Err(self.error(
                    LexErrorKind::Malformed,
                    format!("Unterminated processing instruction `<?{target}`"),
                    start,
                ));
            }
            payload.push(self.advance());
        }
        if !payload.is_empty() {
            self.push_token(TokenKind::Text(payload), payload_start);
        }

        let close_start = self.current_position();
        self.advance_by(2);
        self.push_token(TokenKind::PiClose, close_start);
        Ok(())
    }

    fn scan_name(&mut self) -> String {
        let mut name = String::new();
        while !self.is_at_end() && is_name_char(self.peek()) {
            name.push(self.advance());
        }
        name
    }

    // --- Tag mode ---

    fn scan_tag_mode(&mut self, tag: &str, start: SourcePosition) -> Result<(), LexerError> {
        self.skip_whitespace();

        if self.is_at_end() {
            return Err(self.error(
                LexErrorKind::Malformed,
                format!("Unterminated tag `<{tag}`"),
                start,
            ));
        }

        let here = self.current_position();
        if self.rest().starts_with("/>") {
            self.advance_by(2);
            self.push_token(TokenKind::TagSelfCloseEnd, here);
            self.pop_mode();
            return Ok(());
        }
        if self.peek() == '/' {
            // `<br / >`: a stray slash is not an attribute
            self.advance();
            return Ok(());
        }
        if self.peek() == '>' {
            self.advance();
            self.push_token(TokenKind::TagEnd, here);
            self.pop_mode();
            if self.syntax.is_raw_text_element(tag) {
                self.push_mode(ScannerMode::RawText {
                    tag: tag.to_string(),
                });
            }
            return Ok(());
        }
        if self.rest().starts_with("{{") {
            return Err(self.error(
                LexErrorKind::Attribute,
                format!("Mustaches are not allowed in attribute-name position in `<{tag}>`"),
                here,
            ));
        }

        match self.peek() {
            c @ ('"' | '\'' | '=' | '<') => Err(self.error(
                LexErrorKind::Attribute,
                format!("Unexpected `{c}` in `<{tag}>`, expected an attribute name"),
                here,
            )),
            _ => self.scan_attribute(tag),
        }
    }

    /// Scan `name`, `name=value`, `name="…"` or `name={{…}}`.
    fn scan_attribute(&mut self, tag: &str) -> Result<(), LexerError> {
        let start = self.current_position();
        let mut name = String::new();

        while !self.is_at_end() {
            let c = self.peek();
            if c.is_whitespace()
                || matches!(c, '=' | '>' | '"' | '\'' | '<')
                || self.rest().starts_with("/>")
                || self.rest().starts_with("{{")
            {
                break;
            }
            name.push(self.advance());
        }

        let kind = if self.syntax.is_scoped_style(tag, &name) {
            TokenKind::ScopedCssMarker
        } else {
            TokenKind::AttrName(name)
        };
        self.push_token(kind, start);

        self.skip_whitespace();
        if self.peek() == '=' {
            let equals = self.current_position();
            self.advance();
            self.push_token(TokenKind::AttrEquals, equals);
            self.skip_whitespace();
            self.scan_attribute_value(tag)?;
        }

        Ok(())
    }

    fn scan_attribute_value(&mut self, tag: &str) -> Result<(), LexerError> {
        let start = self.current_position();

        if self.is_at_end() || self.peek() == '>' || self.rest().starts_with("/>") {
            return Err(self.error(
                LexErrorKind::Attribute,
                format!("Expected a value after `=` in `<{tag}>`"),
                start,
            ));
        }

        match self.peek() {
            '"' | '\'' => {
                let quote = self.advance();
                self.push_token(TokenKind::AttrValueQuoteStart(quote), start);
                self.push_mode(ScannerMode::AttrValue { quote, start });
                Ok(())
            }
            _ if self.rest().starts_with("{{") => self.scan_mustache_open(),
            _ => {
                let mut value = String::new();
                while !self.is_at_end() {
                    let c = self.peek();
                    if c.is_whitespace()
                        || matches!(c, '>' | '"' | '\'')
                        || self.rest().starts_with("/>")
                        || self.rest().starts_with("{{")
                    {
                        break;
                    }
                    value.push(self.advance());
                }
                self.push_token(TokenKind::AttrValueLiteral(value), start);
                Ok(())
            }
        }
    }

    // --- Attribute value mode ---

    fn scan_attr_value_mode(&mut self, quote: char, start: SourcePosition) -> Result<(), LexerError> {
        if self.is_at_end() {
            return Err(self.error(
                LexErrorKind::Attribute,
                "Unterminated attribute value".into(),
                start,
            ));
        }

        let here = self.current_position();
        if self.peek() == quote {
            self.advance();
            self.push_token(TokenKind::AttrValueQuoteEnd(quote), here);
            self.pop_mode();
            return Ok(());
        }
        if self.rest().starts_with("{{") {
            return self.scan_mustache_open();
        }

        let mut value = String::new();
        while !self.is_at_end() && self.peek() != quote && !self.rest().starts_with("{{") {
            value.push(self.advance());
        }
        self.push_token(TokenKind::AttrValueLiteral(value), here);
        Ok(())
    }

    // --- Raw text mode ---

    /// Keep everything up to the matching `</tag` as a single text run.
    fn scan_raw_text(&mut self, tag: &str) -> Result<(), LexerError> {
        let start = self.current_position();
        let mut text = String::new();

        while !self.is_at_end() && !self.at_raw_text_close(tag) {
            text.push(self.advance());
        }
        if !text.is_empty() {
            self.push_token(TokenKind::Text(text), start);
        }

        self.pop_mode();
        Ok(())
    }

    fn at_raw_text_close(&self, tag: &str) -> bool {
        let Some(after_slash) = self.rest().strip_prefix("</") else {
            return false;
        };
        let name_matches = after_slash
            .get(..tag.len())
            .is_some_and(|name| name.eq_ignore_ascii_case(tag));
        name_matches
            && after_slash
                .get(tag.len()..)
                .is_some_and(|after| after.is_empty() || after.starts_with(|c: char| c == '>' || c.is_whitespace()))
    }

    // --- Mustaches ---

    /// Scan a mustache opener and enter mustache mode.
    ///
    /// A `~` right after `{{` is emitted as a separate `Strip` token that
    /// follows the opener.
    fn scan_mustache_open(&mut self) -> Result<(), LexerError> {
        let start = self.current_position();

        if self.rest().starts_with("{{!") || self.rest().starts_with("{{~!") {
            return self.scan_mustache_comment(start);
        }

        self.advance_by(2); // consume `{{`
        let strip = if self.peek() == '~' {
            let at = self.current_position();
            self.advance();
            Some(at)
        } else {
            None
        };

        if self.peek() == '{' {
            self.advance();
            self.push_token(TokenKind::InterpOpen { raw: true }, start);
            self.push_strip(strip);
            self.push_mode(ScannerMode::Mustache { raw: true, start });
            return Ok(());
        }

        let kind = match self.peek() {
            '#' => {
                self.advance();
                TokenKind::HelperOpen
            }
            '/' => {
                self.advance();
                TokenKind::HelperClose
            }
            '^' => {
                self.advance();
                if self.at_bare_mustache_close() {
                    TokenKind::BranchKeyword("^".to_string())
                } else {
                    TokenKind::InverseOpen
                }
            }
            c if c == self.syntax.css_module_sigil => {
                self.advance();
                TokenKind::CssModuleMarker
            }
            c if c == self.syntax.render_prop_sigil => {
                self.advance();
                TokenKind::RenderPropMarker
            }
            _ => match self.branch_keyword_ahead() {
                Some(keyword) => {
                    self.skip_whitespace();
                    self.advance_by(keyword.chars().count());
                    TokenKind::BranchKeyword(keyword)
                }
                None => TokenKind::InterpOpen { raw: false },
            },
        };

        self.push_token(kind, start);
        self.push_strip(strip);
        self.push_mode(ScannerMode::Mustache { raw: false, start });
        Ok(())
    }

    /// Whether only whitespace and an optional `~` stand before `}}`.
    fn at_bare_mustache_close(&self) -> bool {
        let rest = self.rest().trim_start();
        rest.starts_with("}}") || rest.starts_with("~}}")
    }

    /// A configured branch keyword directly after `{{`, as a whole word.
    fn branch_keyword_ahead(&self) -> Option<String> {
        let rest = self.rest().trim_start();
        self.syntax
            .branch_keywords
            .iter()
            .find(|keyword| {
                !keyword.is_empty()
                    && rest.strip_prefix(keyword.as_str()).is_some_and(|after| {
                        after.starts_with(|c: char| c.is_whitespace() || c == '}' || c == '~')
                    })
            })
            .cloned()
    }

    /// Scan `{{! … }}` or `{{!-- … --}}`. Whitespace control marks are
    /// accepted on either side and not kept.
    fn scan_mustache_comment(&mut self, start: SourcePosition) -> Result<(), LexerError> {
        self.advance_by(2); // consume `{{`
        if self.peek() == '~' {
            self.advance();
        }

        let terminators: &[&str] = if self.rest().starts_with("!--") {
            self.advance_by(3);
            &["--}}", "--~}}"]
        } else {
            self.advance();
            &["}}", "~}}"]
        };

        let mut content = String::new();
        loop {
            if let Some(end) = terminators.iter().find(|end| self.rest().starts_with(**end)) {
                self.advance_by(end.len());
                break;
            }
            if self.is_at_end() {
                return Err(self.error(
                    LexErrorKind::Malformed,
                    "Unterminated mustache comment".into(),
                    start,
                ));
            }
            content.push(self.advance());
        }

        self.push_token(TokenKind::MustacheComment(content), start);
        Ok(())
    }

    fn scan_mustache_mode(&mut self, raw: bool, start: SourcePosition) -> Result<(), LexerError> {
        self.skip_whitespace();

        if self.is_at_end() {
            let opener = if raw { "{{{" } else { "{{" };
            return Err(self.error(
                LexErrorKind::Malformed,
                format!("Unterminated `{opener}`, expected a closing `}}}}`"),
                start,
            ));
        }

        let here = self.current_position();
        let closer = if raw { "~}}}" } else { "~}}" };
        if self.rest().starts_with(closer) {
            self.advance();
            self.push_token(TokenKind::Strip, here);
            return Ok(());
        }
        if raw && self.rest().starts_with("}}}") {
            self.advance_by(3);
            self.push_token(TokenKind::InterpClose { raw: true }, here);
            self.pop_mode();
            return Ok(());
        }
        if self.rest().starts_with("}}") {
            if raw {
                return Err(self.error(
                    LexErrorKind::Malformed,
                    "Expected `}}}` to close `{{{`".into(),
                    here,
                ));
            }
            self.advance_by(2);
            self.push_token(TokenKind::InterpClose { raw: false }, here);
            self.pop_mode();
            return Ok(());
        }

        let after_segment = self.segment_end == Some(here.offset);
        let after_separator = self.separator_end == Some(here.offset);
        let kind = match self.peek() {
            '.' if after_segment => {
                self.advance();
                TokenKind::Dot
            }
            // `.` and `..` at the head of a path
            '.' if self.peek_at(1) == '.' => {
                self.advance_by(2);
                TokenKind::Ident("..".to_string())
            }
            '.' if ends_relative_head(self.peek_at(1)) => {
                self.advance();
                TokenKind::Ident(".".to_string())
            }
            '.' => {
                self.advance();
                TokenKind::Dot
            }
            '/' => {
                self.advance();
                TokenKind::Slash
            }
            '|' => {
                self.advance();
                TokenKind::Pipe
            }
            '[' => {
                self.advance();
                self.push_token(TokenKind::LBracket, here);
                self.scan_literal_segment();
                self.segment_end = None;
                self.separator_end = None;
                return Ok(());
            }
            ']' => {
                self.advance();
                TokenKind::RBracket
            }
            '(' => {
                self.advance();
                TokenKind::LParen
            }
            ')' => {
                self.advance();
                TokenKind::RParen
            }
            '=' => {
                self.advance();
                TokenKind::Equals
            }
            '"' | '\'' => self.scan_string()?,
            c if after_separator && is_ident_char(c) => TokenKind::Ident(self.scan_segment()),
            '-' if self.peek_at(1).is_ascii_digit() => self.scan_number(here)?,
            c if c.is_ascii_digit() => self.scan_number(here)?,
            c if is_ident_start(c) => Self::keyword_or_ident(self.scan_segment()),
            c => {
                return Err(self.error(
                    LexErrorKind::Malformed,
                    format!("Unexpected character `{c}` inside a mustache"),
                    here,
                ))
            }
        };

        let continues_path = matches!(kind, TokenKind::Ident(_) | TokenKind::RBracket);
        let is_separator = matches!(kind, TokenKind::Dot | TokenKind::Slash);
        self.push_token(kind, here);
        self.segment_end = continues_path.then_some(self.offset);
        self.separator_end = is_separator.then_some(self.offset);
        Ok(())
    }

    /// The unquoted contents of `[…]`, kept exactly as written.
    ///
    /// Stops at `]` or a closing `}}`; the parser reports a missing `]`.
    fn scan_literal_segment(&mut self) {
        if matches!(self.peek(), '"' | '\'') {
            return;
        }

        let start = self.current_position();
        let mut segment = String::new();
        while !self.is_at_end() && self.peek() != ']' && !self.rest().starts_with("}}") {
            segment.push(self.advance());
        }
        if !segment.is_empty() {
            self.push_token(TokenKind::Ident(segment), start);
        }
    }

    /// Scan a string literal inside a mustache, resolving backslash escapes.
    fn scan_string(&mut self) -> Result<TokenKind, LexerError> {
        let start = self.current_position();
        let quote = self.advance();
        let mut value = String::new();

        while !self.is_at_end() && self.peek() != quote {
            if self.peek() == '\\' {
                self.advance(); // consume backslash
                if self.is_at_end() {
                    break;
                }
                match self.advance() {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    '\\' => value.push('\\'),
                    c if c == quote => value.push(c),
                    c => {
                        value.push('\\');
                        value.push(c);
                    }
                }
            } else {
                value.push(self.advance());
            }
        }

        if self.is_at_end() {
            return Err(self.error(
                LexErrorKind::Malformed,
                "Unterminated string".into(),
                start,
            ));
        }
        self.advance(); // consume closing quote

        Ok(TokenKind::StringLit(value))
    }

    /// Scan `-?digits(.digits)?`.
    fn scan_number(&mut self, start: SourcePosition) -> Result<TokenKind, LexerError> {
        if self.peek() == '-' {
            self.advance();
        }
        while self.peek().is_ascii_digit() {
            self.advance();
        }
        if self.peek() == '.' && self.peek_at(1).is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        let text = &self.source[start.offset..self.offset];
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| {
                self.error(
                    LexErrorKind::Malformed,
                    format!("Invalid number: '{text}'"),
                    start,
                )
            })
    }

    /// Scan an identifier or a path segment. Supports hyphens (`my-helper`).
    fn scan_segment(&mut self) -> String {
        let mut ident = String::new();
        ident.push(self.advance());
        while !self.is_at_end() && is_ident_char(self.peek()) {
            ident.push(self.advance());
        }
        ident
    }

    // --- Keyword detection ---

    fn keyword_or_ident(ident: String) -> TokenKind {
        match ident.as_str() {
            "true" => TokenKind::Boolean(true),
            "false" => TokenKind::Boolean(false),
            "null" | "undefined" => TokenKind::Null,
            _ => TokenKind::Ident(ident),
        }
    }

    // --- Helpers ---

    fn push_token(&mut self, kind: TokenKind, start: SourcePosition) {
        let span = Span::new(start.offset, self.offset, start.line, start.column);
        self.pending.push_back(Token::new(kind, span));
    }

    /// Emit the `~` that followed an opener.
    fn push_strip(&mut self, at: Option<SourcePosition>) {
        if let Some(at) = at {
            let span = Span::new(at.offset, at.offset + 1, at.line, at.column);
            self.pending.push_back(Token::new(TokenKind::Strip, span));
        }
    }

    fn emit(&mut self, kind: TokenKind) {
        let span = Span::new(self.offset, self.offset, self.line, self.column);
        self.pending.push_back(Token::new(kind, span));
    }

    fn current_position(&self) -> SourcePosition {
        SourcePosition::new(self.offset, self.line, self.column)
    }

    fn rest(&self) -> &'a str {
        &self.source[self.offset..]
    }

    fn peek(&self) -> char {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> char {
        self.chars.get(self.pos + n).copied().unwrap_or('\0')
    }

    fn advance(&mut self) -> char {
        let Some(&c) = self.chars.get(self.pos) else {
            return '\0';
        };
        self.pos += 1;
        self.offset += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        c
    }

    fn advance_by(&mut self, n: usize) {
        for _ in 0..n {
            self.advance();
        }
    }

    fn skip_whitespace(&mut self) {
        while !self.is_at_end() && self.peek().is_whitespace() {
            self.advance();
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn error(&self, kind: LexErrorKind, message: String, position: SourcePosition) -> LexerError {
        LexerError {
            kind,
            message,
            position,
        }
    }
}

impl Iterator for Scanner<'_> {
    type Item = Result<Token, LexerError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Some(Ok(token));
            }
            if let Some(error) = self.error.take() {
                return Some(Err(error));
            }
            if self.finished {
                return None;
            }
            if let Err(error) = self.scan_next() {
                // Tokens scanned before the failure are still handed out first.
                self.error = Some(error);
                self.finished = true;
            }
        }
    }
}

impl FusedIterator for Scanner<'_> {}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic()
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | ':' | '.')
}

/// What may follow a lone `.` path head: `{{./name}}`, `{{.}}`, `{{h .}}`.
fn ends_relative_head(c: char) -> bool {
    c.is_whitespace() || matches!(c, '/' | '}' | '~' | ')' | '\0')
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '@'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '@')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Helper: tokenize and return token kinds (ignoring spans).
    fn kinds(source: &str) -> Vec<TokenKind> {
        Scanner::tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    /// Helper: tokenize and panic on error.
    fn tokens(source: &str) -> Vec<Token> {
        Scanner::tokenize(source).unwrap()
    }

    fn text(s: &str) -> TokenKind {
        TokenKind::Text(s.into())
    }

    fn ident(s: &str) -> TokenKind {
        TokenKind::Ident(s.into())
    }

    const OPEN: TokenKind = TokenKind::InterpOpen { raw: false };
    const CLOSE: TokenKind = TokenKind::InterpClose { raw: false };

    // =========================================================================
    // Structure: empty, text, EOF
    // =========================================================================

    #[test]
    fn test_empty_source() {
        let toks = tokens("");
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].kind, TokenKind::Eof);
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(kinds("hello world"), vec![text("hello world"), TokenKind::Eof]);
    }

    #[test]
    fn test_text_keeps_unrecognized_characters() {
        assert_eq!(
            kinds("a < b && c > d } {"),
            vec![text("a < b && c > d } {"), TokenKind::Eof]
        );
    }

    #[test]
    fn test_text_with_newlines() {
        assert_eq!(kinds("one\ntwo\r\n"), vec![text("one\ntwo\r\n"), TokenKind::Eof]);
    }

    #[test]
    fn test_scanner_is_fused_after_eof() {
        let mut scanner = Scanner::new("x");
        assert!(matches!(scanner.next(), Some(Ok(_))));
        assert!(matches!(scanner.next(), Some(Ok(Token { kind: TokenKind::Eof, .. }))));
        assert!(scanner.next().is_none());
        assert!(scanner.next().is_none());
    }

    // =========================================================================
    // Tags
    // =========================================================================

    #[test]
    fn test_open_and_close_tag() {
        assert_eq!(
            kinds("<div>hi</div>"),
            vec![
                TokenKind::TagOpenStart("div".into()),
                TokenKind::TagEnd,
                text("hi"),
                TokenKind::TagClose("div".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_self_closing_tag() {
        assert_eq!(
            kinds("<br/><img />"),
            vec![
                TokenKind::TagOpenStart("br".into()),
                TokenKind::TagSelfCloseEnd,
                TokenKind::TagOpenStart("img".into()),
                TokenKind::TagSelfCloseEnd,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_component_tag_names() {
        assert_eq!(
            kinds("<my-card.Header>"),
            vec![
                TokenKind::TagOpenStart("my-card.Header".into()),
                TokenKind::TagEnd,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_close_tag_with_whitespace() {
        assert_eq!(
            kinds("</div  >"),
            vec![TokenKind::TagClose("div".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_stray_slash_in_tag_is_skipped() {
        assert_eq!(
            kinds("<br / ><input / disabled>"),
            vec![
                TokenKind::TagOpenStart("br".into()),
                TokenKind::TagEnd,
                TokenKind::TagOpenStart("input".into()),
                TokenKind::AttrName("disabled".into()),
                TokenKind::TagEnd,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_malformed_close_tag() {
        let err = Scanner::tokenize("</div x>").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::Malformed);
        assert_eq!(err.position.offset, 0);
    }

    #[test]
    fn test_unterminated_tag() {
        let err = Scanner::tokenize("ab<div class=\"a\"").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::Malformed);
        assert!(err.message.contains("Unterminated tag"));
        assert_eq!(err.position.offset, 2);
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    #[test]
    fn test_quoted_attribute() {
        assert_eq!(
            kinds("<div class=\"a\">"),
            vec![
                TokenKind::TagOpenStart("div".into()),
                TokenKind::AttrName("class".into()),
                TokenKind::AttrEquals,
                TokenKind::AttrValueQuoteStart('"'),
                TokenKind::AttrValueLiteral("a".into()),
                TokenKind::AttrValueQuoteEnd('"'),
                TokenKind::TagEnd,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_single_quoted_and_unquoted_attributes() {
        assert_eq!(
            kinds("<input type='text' size=10 disabled>"),
            vec![
                TokenKind::TagOpenStart("input".into()),
                TokenKind::AttrName("type".into()),
                TokenKind::AttrEquals,
                TokenKind::AttrValueQuoteStart('\''),
                TokenKind::AttrValueLiteral("text".into()),
                TokenKind::AttrValueQuoteEnd('\''),
                TokenKind::AttrName("size".into()),
                TokenKind::AttrEquals,
                TokenKind::AttrValueLiteral("10".into()),
                TokenKind::AttrName("disabled".into()),
                TokenKind::TagEnd,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_whitespace_around_equals() {
        assert_eq!(
            kinds("<a href = \"/\">"),
            vec![
                TokenKind::TagOpenStart("a".into()),
                TokenKind::AttrName("href".into()),
                TokenKind::AttrEquals,
                TokenKind::AttrValueQuoteStart('"'),
                TokenKind::AttrValueLiteral("/".into()),
                TokenKind::AttrValueQuoteEnd('"'),
                TokenKind::TagEnd,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_empty_quoted_value() {
        assert_eq!(
            kinds("<a title=\"\">"),
            vec![
                TokenKind::TagOpenStart("a".into()),
                TokenKind::AttrName("title".into()),
                TokenKind::AttrEquals,
                TokenKind::AttrValueQuoteStart('"'),
                TokenKind::AttrValueQuoteEnd('"'),
                TokenKind::TagEnd,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_interpolation_inside_attribute_value() {
        assert_eq!(
            kinds("<div class=\"{{x}}-fixed\">"),
            vec![
                TokenKind::TagOpenStart("div".into()),
                TokenKind::AttrName("class".into()),
                TokenKind::AttrEquals,
                TokenKind::AttrValueQuoteStart('"'),
                OPEN,
                ident("x"),
                CLOSE,
                TokenKind::AttrValueLiteral("-fixed".into()),
                TokenKind::AttrValueQuoteEnd('"'),
                TokenKind::TagEnd,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_tags_not_recognized_inside_attribute_value() {
        assert_eq!(
            kinds("<a title=\"<b>\">"),
            vec![
                TokenKind::TagOpenStart("a".into()),
                TokenKind::AttrName("title".into()),
                TokenKind::AttrEquals,
                TokenKind::AttrValueQuoteStart('"'),
                TokenKind::AttrValueLiteral("<b>".into()),
                TokenKind::AttrValueQuoteEnd('"'),
                TokenKind::TagEnd,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unquoted_mustache_value() {
        assert_eq!(
            kinds("<div class={{x}}>"),
            vec![
                TokenKind::TagOpenStart("div".into()),
                TokenKind::AttrName("class".into()),
                TokenKind::AttrEquals,
                OPEN,
                ident("x"),
                CLOSE,
                TokenKind::TagEnd,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_missing_attribute_value() {
        let err = Scanner::tokenize("<div class=>").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::Attribute);
        assert_eq!(err.position.offset, 11);
    }

    #[test]
    fn test_unterminated_attribute_value() {
        let err = Scanner::tokenize("<div class=\"abc").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::Attribute);
        assert!(err.message.contains("Unterminated attribute value"));
        assert_eq!(err.position.offset, 11);
    }

    #[test]
    fn test_mustache_in_attribute_name_position() {
        let err = Scanner::tokenize("<div {{action}}>").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::Attribute);
    }

    // =========================================================================
    // Mustaches
    // =========================================================================

    #[test]
    fn test_simple_interpolation() {
        assert_eq!(kinds("{{name}}"), vec![OPEN, ident("name"), CLOSE, TokenKind::Eof]);
    }

    #[test]
    fn test_raw_interpolation() {
        assert_eq!(
            kinds("{{{html}}}"),
            vec![
                TokenKind::InterpOpen { raw: true },
                ident("html"),
                TokenKind::InterpClose { raw: true },
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_raw_interpolation_needs_triple_close() {
        let err = Scanner::tokenize("{{{html}}").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::Malformed);
    }

    #[test]
    fn test_dotted_path_with_numeric_segment() {
        assert_eq!(
            kinds("{{items.0.name}}"),
            vec![
                OPEN,
                ident("items"),
                TokenKind::Dot,
                ident("0"),
                TokenKind::Dot,
                ident("name"),
                CLOSE,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_bracketed_path() {
        assert_eq!(
            kinds("{{a[\"b c\"]}}"),
            vec![
                OPEN,
                ident("a"),
                TokenKind::LBracket,
                TokenKind::StringLit("b c".into()),
                TokenKind::RBracket,
                CLOSE,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_helper_arguments() {
        assert_eq!(
            kinds("{{format-date when 'short' 3 -1.5 true null key=value}}"),
            vec![
                OPEN,
                ident("format-date"),
                ident("when"),
                TokenKind::StringLit("short".into()),
                TokenKind::Number(3.0),
                TokenKind::Number(-1.5),
                TokenKind::Boolean(true),
                TokenKind::Null,
                ident("key"),
                TokenKind::Equals,
                ident("value"),
                CLOSE,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_subexpression_parens() {
        assert_eq!(
            kinds("{{outer (inner a)}}"),
            vec![
                OPEN,
                ident("outer"),
                TokenKind::LParen,
                ident("inner"),
                ident("a"),
                TokenKind::RParen,
                CLOSE,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_bracket_segment_kept_as_written() {
        assert_eq!(
            kinds("{{a[007][foo bar].[1]}}"),
            vec![
                OPEN,
                ident("a"),
                TokenKind::LBracket,
                ident("007"),
                TokenKind::RBracket,
                TokenKind::LBracket,
                ident("foo bar"),
                TokenKind::RBracket,
                TokenKind::Dot,
                TokenKind::LBracket,
                ident("1"),
                TokenKind::RBracket,
                CLOSE,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_parent_and_relative_paths() {
        assert_eq!(
            kinds("{{../../title}}{{./name}}{{.}}{{person/name}}"),
            vec![
                OPEN,
                ident(".."),
                TokenKind::Slash,
                ident(".."),
                TokenKind::Slash,
                ident("title"),
                CLOSE,
                OPEN,
                ident("."),
                TokenKind::Slash,
                ident("name"),
                CLOSE,
                OPEN,
                ident("."),
                CLOSE,
                OPEN,
                ident("person"),
                TokenKind::Slash,
                ident("name"),
                CLOSE,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_whitespace_control_marks() {
        let toks = tokens("{{~name~}}");
        let kinds: Vec<_> = toks.iter().map(|t| t.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                OPEN,
                TokenKind::Strip,
                ident("name"),
                TokenKind::Strip,
                CLOSE,
                TokenKind::Eof,
            ]
        );
        assert_eq!(toks[1].span.start, 2);
        assert_eq!(toks[3].span.start, 7);
    }

    #[test]
    fn test_whitespace_control_on_block_delimiters() {
        assert_eq!(
            kinds("{{~#if a}}{{~else~}}{{/if~}}{{~{raw}~}}"),
            vec![
                TokenKind::HelperOpen,
                TokenKind::Strip,
                ident("if"),
                ident("a"),
                CLOSE,
                TokenKind::BranchKeyword("else".into()),
                TokenKind::Strip,
                TokenKind::Strip,
                CLOSE,
                TokenKind::HelperClose,
                ident("if"),
                TokenKind::Strip,
                CLOSE,
                TokenKind::InterpOpen { raw: true },
                TokenKind::Strip,
                ident("raw"),
                TokenKind::Strip,
                TokenKind::InterpClose { raw: true },
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_accept_whitespace_control() {
        assert_eq!(
            kinds("{{~! a ~}}{{~!-- b --~}}"),
            vec![
                TokenKind::MustacheComment(" a ".into()),
                TokenKind::MustacheComment(" b ".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_inverse_branch_and_section() {
        assert_eq!(
            kinds("{{^}}{{^ ~}}{{^items}}"),
            vec![
                TokenKind::BranchKeyword("^".into()),
                CLOSE,
                TokenKind::BranchKeyword("^".into()),
                TokenKind::Strip,
                CLOSE,
                TokenKind::InverseOpen,
                ident("items"),
                CLOSE,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_block_params() {
        assert_eq!(
            kinds("{{#each xs as |x i|}}"),
            vec![
                TokenKind::HelperOpen,
                ident("each"),
                ident("xs"),
                ident("as"),
                TokenKind::Pipe,
                ident("x"),
                ident("i"),
                TokenKind::Pipe,
                CLOSE,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#"{{t "say \"hi\"\n"}}"#),
            vec![
                OPEN,
                ident("t"),
                TokenKind::StringLit("say \"hi\"\n".into()),
                CLOSE,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_block_helper_delimiters() {
        assert_eq!(
            kinds("{{#if cond}}A{{else}}B{{/if}}"),
            vec![
                TokenKind::HelperOpen,
                ident("if"),
                ident("cond"),
                CLOSE,
                text("A"),
                TokenKind::BranchKeyword("else".into()),
                CLOSE,
                text("B"),
                TokenKind::HelperClose,
                ident("if"),
                CLOSE,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_chained_branch_keyword() {
        assert_eq!(
            kinds("{{ else if b }}"),
            vec![
                TokenKind::BranchKeyword("else".into()),
                ident("if"),
                ident("b"),
                CLOSE,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_keyword_prefix_is_not_a_branch() {
        assert_eq!(
            kinds("{{elsewhere}}"),
            vec![OPEN, ident("elsewhere"), CLOSE, TokenKind::Eof]
        );
    }

    #[test]
    fn test_custom_branch_keyword() {
        let syntax = Syntax {
            branch_keywords: vec!["otherwise".into()],
            ..Syntax::default()
        };
        let kinds: Vec<_> = Scanner::tokenize_with("{{otherwise}}{{else}}", &syntax)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::BranchKeyword("otherwise".into()),
                CLOSE,
                OPEN,
                ident("else"),
                CLOSE,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_mustache_comments() {
        assert_eq!(
            kinds("{{! short }}{{!-- has }} inside --}}"),
            vec![
                TokenKind::MustacheComment(" short ".into()),
                TokenKind::MustacheComment(" has }} inside ".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_interpolation() {
        let err = Scanner::tokenize("ab {{name").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::Malformed);
        assert!(err.message.contains("Unterminated"));
        assert_eq!(err.position.offset, 3);
    }

    #[test]
    fn test_unexpected_character_in_mustache() {
        let err = Scanner::tokenize("{{a ~ b}}").unwrap_err();
        assert!(err.message.contains("Unexpected character"));
    }

    // =========================================================================
    // Processing instructions and comments
    // =========================================================================

    #[test]
    fn test_processing_instruction() {
        assert_eq!(
            kinds("<?pi payload ?>"),
            vec![
                TokenKind::PiOpen("pi".into()),
                text("payload "),
                TokenKind::PiClose,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_processing_instruction_without_payload() {
        assert_eq!(
            kinds("<?flush?>"),
            vec![TokenKind::PiOpen("flush".into()), TokenKind::PiClose, TokenKind::Eof]
        );
    }

    #[test]
    fn test_unterminated_processing_instruction() {
        let err = Scanner::tokenize("<?pi payload").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::Malformed);
        assert_eq!(err.position.offset, 0);
    }

    #[test]
    fn test_html_comment() {
        assert_eq!(
            kinds("<!-- <b>{{x}}</b> -->"),
            vec![TokenKind::HtmlComment(" <b>{{x}}</b> ".into()), TokenKind::Eof]
        );
    }

    // =========================================================================
    // Markers and raw text
    // =========================================================================

    #[test]
    fn test_css_module_marker() {
        assert_eq!(
            kinds("{{$card.title}}"),
            vec![
                TokenKind::CssModuleMarker,
                ident("card"),
                TokenKind::Dot,
                ident("title"),
                CLOSE,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_render_prop_marker() {
        assert_eq!(
            kinds("{{> header}}"),
            vec![TokenKind::RenderPropMarker, ident("header"), CLOSE, TokenKind::Eof]
        );
    }

    #[test]
    fn test_custom_marker_sigils() {
        let syntax = Syntax {
            css_module_sigil: '%',
            render_prop_sigil: '*',
            ..Syntax::default()
        };
        let kinds: Vec<_> = Scanner::tokenize_with("{{%a}}{{*b}}", &syntax)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::CssModuleMarker,
                ident("a"),
                CLOSE,
                TokenKind::RenderPropMarker,
                ident("b"),
                CLOSE,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_scoped_style_marker_and_raw_body() {
        assert_eq!(
            kinds("<style scoped>.a > b { color: red }</style>"),
            vec![
                TokenKind::TagOpenStart("style".into()),
                TokenKind::ScopedCssMarker,
                TokenKind::TagEnd,
                text(".a > b { color: red }"),
                TokenKind::TagClose("style".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_scoped_attribute_on_other_tags_is_plain() {
        assert_eq!(
            kinds("<div scoped>"),
            vec![
                TokenKind::TagOpenStart("div".into()),
                TokenKind::AttrName("scoped".into()),
                TokenKind::TagEnd,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_script_body_is_raw() {
        assert_eq!(
            kinds("<script>if (a < b) { x = \"{{y}}\" }</script>"),
            vec![
                TokenKind::TagOpenStart("script".into()),
                TokenKind::TagEnd,
                text("if (a < b) { x = \"{{y}}\" }"),
                TokenKind::TagClose("script".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unclosed_raw_text_reaches_eof() {
        assert_eq!(
            kinds("<style>a{}"),
            vec![
                TokenKind::TagOpenStart("style".into()),
                TokenKind::TagEnd,
                text("a{}"),
                TokenKind::Eof,
            ]
        );
    }

    // =========================================================================
    // Span tracking
    // =========================================================================

    #[test]
    fn test_span_line_column() {
        let toks = tokens("<p>\n  {{name}}</p>");
        let open = toks.iter().find(|t| t.kind == OPEN).unwrap();
        assert_eq!(open.span.line, 2);
        assert_eq!(open.span.column, 3);
        assert_eq!(open.span.start, 6);
        assert_eq!(open.span.end, 8);
    }

    #[test]
    fn test_offsets_are_bytes_columns_are_chars() {
        let toks = tokens("é{{x}}");
        assert_eq!(toks[1].kind, OPEN);
        assert_eq!(toks[1].span.start, 2);
        assert_eq!(toks[1].span.column, 2);
    }

    #[test]
    fn test_eof_position() {
        let toks = tokens("ab\ncd");
        let eof = toks.last().unwrap();
        assert_eq!(eof.kind, TokenKind::Eof);
        assert_eq!(eof.span.position(), SourcePosition::new(5, 2, 3));
    }

    #[test]
    fn test_tokens_before_error_are_yielded() {
        let mut scanner = Scanner::new("<p>{{x");
        assert_eq!(
            scanner.next().unwrap().unwrap().kind,
            TokenKind::TagOpenStart("p".into())
        );
        assert_eq!(scanner.next().unwrap().unwrap().kind, TokenKind::TagEnd);
        assert_eq!(scanner.next().unwrap().unwrap().kind, OPEN);
        assert_eq!(scanner.next().unwrap().unwrap().kind, ident("x"));
        assert!(scanner.next().unwrap().is_err());
        assert!(scanner.next().is_none());
    }
}
