// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A single-pass, byte-offset SQL lexer. Unlike [`crate::redis_tokenizer`], which only needs to
//! split on whitespace/quotes, SQL needs real token kinds so the filter chain in
//! [`crate::sql_obfuscate`] can make per-kind decisions (replace literals, drop comments, collapse
//! groups, …).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dbms {
    Default,
    Postgres,
    SqlServer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Keyword,
    Select,
    From,
    Update,
    Into,
    Join,
    As,
    Savepoint,
    String,
    DoubleQuotedString,
    DollarQuotedString,
    /// A `$func$ ... $func$` dollar-quoted block: Postgres's convention for embedding a function
    /// body, which itself is SQL and must be recursively obfuscated rather than replaced whole.
    DollarQuotedFunctionBody,
    Number,
    BooleanLiteral,
    Null,
    EscapeSequence,
    Comment,
    ValueArg,
    ListArg,
    PreparedStatement,
    Variable,
    Comma,
    Semicolon,
    OpenParen,
    CloseParen,
    Operator,
    /// Postgres `::` type cast, e.g. `id::int`. Kept distinct from [`TokenKind::Variable`] so the
    /// filter chain doesn't mistake it (or the type name following it) for a bind variable.
    ColonCast,
    // Kinds produced only by the filter chain (§4.B), never by the tokenizer itself.
    TableName,
    Filtered,
    FilteredGroupable,
    FilteredBracketedIdentifier,
    LexError,
    EndChar,
}

#[derive(Debug, Clone)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
}

impl<'a> Token<'a> {
    /// §4.B's resolved open question: `FilteredGroupableParenthesis` and a bare `(` are not
    /// tracked as separate kinds, just this one predicate.
    pub fn is_open_paren(&self) -> bool {
        matches!(self.kind, TokenKind::OpenParen) || self.text == "("
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_identifier_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn keyword_kind(word: &str) -> TokenKind {
    match word.to_ascii_uppercase().as_str() {
        "SELECT" => TokenKind::Select,
        "FROM" => TokenKind::From,
        "UPDATE" => TokenKind::Update,
        "INTO" => TokenKind::Into,
        "JOIN" => TokenKind::Join,
        "AS" => TokenKind::As,
        "SAVEPOINT" => TokenKind::Savepoint,
        "TRUE" | "FALSE" => TokenKind::BooleanLiteral,
        "NULL" => TokenKind::Null,
        "WHERE" | "AND" | "OR" | "NOT" | "IN" | "ON" | "GROUP" | "BY" | "ORDER" | "HAVING"
        | "LIMIT" | "INSERT" | "VALUES" | "DELETE" | "CREATE" | "TABLE" | "DROP" | "ALTER"
        | "SET" | "DESC" | "ASC" | "CASE" | "WHEN" | "THEN" | "ELSE" | "END" | "LEFT" | "RIGHT"
        | "OUTER" | "INNER" | "IS" | "LIKE" | "BETWEEN" | "EXISTS" | "UNION" | "ALL" | "DISTINCT"
        | "COMMIT" | "ROLLBACK" | "BEGIN" | "TRANSACTION" | "IF" => TokenKind::Keyword,
        _ => TokenKind::Identifier,
    }
}

/// Streaming lexer over a UTF-8 source string. Tokens borrow from `src` until the next call to
/// [`SqlTokenizer::next_token`].
pub struct SqlTokenizer<'a> {
    src: &'a str,
    off: usize,
    dbms: Dbms,
    literal_escapes: bool,
    pub err: bool,
    /// Set once a bare `\` is seen inside a string literal, regardless of which way
    /// `literal_escapes` resolved it. Lets the caller retry with the opposite mode on a
    /// `LexError` instead of only on the mode it happened to guess first (§4.B top-level
    /// retry policy).
    pub seen_escape: bool,
}

impl<'a> SqlTokenizer<'a> {
    pub fn new(src: &'a str, dbms: Dbms, literal_escapes: bool) -> Self {
        SqlTokenizer {
            src,
            off: 0,
            dbms,
            literal_escapes,
            err: false,
            seen_escape: false,
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.off..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_at(&self, skip_bytes: usize) -> Option<char> {
        self.src[self.off + skip_bytes..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.off += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    pub fn next_token(&mut self) -> Token<'a> {
        self.skip_whitespace();
        let start = self.off;
        let Some(c) = self.peek() else {
            return Token {
                kind: TokenKind::EndChar,
                text: "",
            };
        };

        match c {
            ',' => {
                self.bump();
                self.finish(start, TokenKind::Comma)
            }
            ';' => {
                self.bump();
                self.finish(start, TokenKind::Semicolon)
            }
            '(' => {
                self.bump();
                self.finish(start, TokenKind::OpenParen)
            }
            ')' => {
                self.bump();
                self.finish(start, TokenKind::CloseParen)
            }
            '?' => {
                self.bump();
                if self.peek() == Some('|') && self.peek_at(1) == Some('|') {
                    // not expected here; treat lone '?' as ValueArg regardless
                }
                self.finish(start, TokenKind::ValueArg)
            }
            ':' if self.peek_at(1) == Some(':') => {
                self.bump();
                self.bump();
                self.finish(start, TokenKind::ColonCast)
            }
            ':' => self.scan_variable(start),
            '$' if self.peek_at(1).map(|c| c.is_ascii_digit()).unwrap_or(false) => {
                self.scan_prepared_statement(start)
            }
            '$' if self.dbms == Dbms::Postgres => self.scan_dollar_quoted(start),
            '\'' => self.scan_string(start, '\''),
            '"' => self.scan_double_quoted(start),
            '[' if self.dbms == Dbms::SqlServer => self.scan_bracketed(start),
            '{' => self.scan_curly_escape(start),
            '-' if self.peek_at(1) == Some('-') => self.scan_line_comment(start),
            '/' if self.peek_at(1) == Some('*') => self.scan_block_comment(start),
            '#' if self.dbms == Dbms::Default => self.scan_line_comment(start),
            '#' if self.dbms == Dbms::SqlServer && self.is_ident_after(start) => {
                self.scan_identifier(start)
            }
            c if c.is_ascii_digit() => self.scan_number(start),
            '+' | '-' | '.' if self.peek_at(1).map(|c| c.is_ascii_digit()).unwrap_or(false) => {
                self.scan_number(start)
            }
            c if is_identifier_start(c) => self.scan_identifier(start),
            '!' | '<' | '>' | '=' | '|' | '@' | '^' | '#' | '~' | '*' | '/' | '%' | '+' | '-' => {
                self.scan_operator(start)
            }
            _ => {
                self.bump();
                self.err = true;
                Token {
                    kind: TokenKind::LexError,
                    text: &self.src[start..self.off],
                }
            }
        }
    }

    fn is_ident_after(&self, start: usize) -> bool {
        self.src[start + 1..]
            .chars()
            .next()
            .map(is_identifier_start)
            .unwrap_or(false)
    }

    fn finish(&self, start: usize, kind: TokenKind) -> Token<'a> {
        Token {
            kind,
            text: &self.src[start..self.off],
        }
    }

    fn scan_identifier(&mut self, start: usize) -> Token<'a> {
        while matches!(self.peek(), Some(c) if is_identifier_continue(c)) {
            self.bump();
        }
        let text = &self.src[start..self.off];
        self.finish(start, keyword_kind(text))
    }

    fn scan_operator(&mut self, start: usize) -> Token<'a> {
        const OP_CHARS: &[char] = &[
            '!', '<', '>', '=', '|', '@', '^', '#', '~', '*', '/', '%', '+', '-',
        ];
        while matches!(self.peek(), Some(c) if OP_CHARS.contains(&c)) {
            self.bump();
        }
        self.finish(start, TokenKind::Operator)
    }

    fn scan_variable(&mut self, start: usize) -> Token<'a> {
        self.bump(); // ':'
        while matches!(self.peek(), Some(c) if is_identifier_continue(c)) {
            self.bump();
        }
        self.finish(start, TokenKind::Variable)
    }

    fn scan_prepared_statement(&mut self, start: usize) -> Token<'a> {
        self.bump(); // '$'
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        self.finish(start, TokenKind::PreparedStatement)
    }

    fn scan_number(&mut self, start: usize) -> Token<'a> {
        if self.peek() == Some('+') || self.peek() == Some('-') {
            self.bump();
        }
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            self.bump();
            self.bump();
            while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
                self.bump();
            }
            return self.finish(start, TokenKind::Number);
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some('.') {
            self.bump();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            self.bump();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.bump();
            }
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        // trailing numeric-literal suffix, e.g. 6.34F, -1d
        while matches!(self.peek(), Some(c) if c.is_ascii_alphabetic()) {
            self.bump();
        }
        self.finish(start, TokenKind::Number)
    }

    fn scan_string(&mut self, start: usize, delim: char) -> Token<'a> {
        self.bump(); // opening delimiter
        loop {
            match self.peek() {
                None => {
                    self.err = true;
                    break;
                }
                Some('\\') if !self.literal_escapes => {
                    self.seen_escape = true;
                    self.bump();
                    self.bump();
                }
                Some('\\') => {
                    self.seen_escape = true;
                    self.bump();
                }
                Some(c) if c == delim => {
                    self.bump();
                    if self.peek() == Some(delim) {
                        // doubled delimiter escapes it
                        self.bump();
                        continue;
                    }
                    break;
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
        self.finish(start, TokenKind::String)
    }

    fn scan_double_quoted(&mut self, start: usize) -> Token<'a> {
        self.bump();
        loop {
            match self.peek() {
                None => {
                    self.err = true;
                    break;
                }
                Some('"') => {
                    self.bump();
                    if self.peek() == Some('"') {
                        self.bump();
                        continue;
                    }
                    break;
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
        self.finish(start, TokenKind::DoubleQuotedString)
    }

    fn scan_bracketed(&mut self, start: usize) -> Token<'a> {
        self.bump(); // '['
        loop {
            match self.peek() {
                None => {
                    self.err = true;
                    break;
                }
                Some(']') => {
                    self.bump();
                    break;
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
        // tokenized as DoubleQuotedString with delimiter `]`, per §4.A.
        self.finish(start, TokenKind::DoubleQuotedString)
    }

    fn scan_dollar_quoted(&mut self, start: usize) -> Token<'a> {
        // `$tag$ ... $tag$`; `tag` may be empty.
        self.bump(); // opening '$'
        let tag_start = self.off;
        while matches!(self.peek(), Some(c) if c != '$') {
            self.bump();
        }
        if self.peek() != Some('$') {
            self.err = true;
            return self.finish(start, TokenKind::LexError);
        }
        let tag = &self.src[tag_start..self.off];
        self.bump(); // closing '$' of the opening tag
        let delim = format!("${tag}$");
        loop {
            if self.rest().starts_with(delim.as_str()) {
                self.off += delim.len();
                break;
            }
            if self.bump().is_none() {
                self.err = true;
                break;
            }
        }
        let kind = if tag.eq_ignore_ascii_case("func") {
            TokenKind::DollarQuotedFunctionBody
        } else {
            TokenKind::DollarQuotedString
        };
        self.finish(start, kind)
    }

    fn scan_curly_escape(&mut self, start: usize) -> Token<'a> {
        self.bump(); // '{'
        let mut depth = 1u32;
        loop {
            match self.bump() {
                None => {
                    self.err = true;
                    break;
                }
                Some('{') => depth += 1,
                Some('}') => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
        }
        if depth != 0 {
            self.err = true;
        }
        self.finish(start, TokenKind::EscapeSequence)
    }

    fn scan_line_comment(&mut self, start: usize) -> Token<'a> {
        while matches!(self.peek(), Some(c) if c != '\n') {
            self.bump();
        }
        self.finish(start, TokenKind::Comment)
    }

    fn scan_block_comment(&mut self, start: usize) -> Token<'a> {
        self.bump();
        self.bump();
        loop {
            if self.rest().starts_with("*/") {
                self.off += 2;
                break;
            }
            if self.bump().is_none() {
                self.err = true;
                break;
            }
        }
        self.finish(start, TokenKind::Comment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(src: &str) -> Vec<TokenKind> {
        let mut t = SqlTokenizer::new(src, Dbms::Default, false);
        let mut out = Vec::new();
        loop {
            let tok = t.next_token();
            if tok.kind == TokenKind::EndChar {
                break;
            }
            out.push(tok.kind);
        }
        out
    }

    #[test]
    fn tokenizes_simple_select() {
        let kinds = collect("SELECT * FROM foo WHERE id = 1");
        assert_eq!(kinds[0], TokenKind::Select);
        assert_eq!(kinds[1], TokenKind::Operator);
        assert_eq!(kinds[2], TokenKind::From);
        assert_eq!(kinds[3], TokenKind::Identifier);
    }

    #[test]
    fn scans_quoted_string_with_doubled_delimiter() {
        let mut t = SqlTokenizer::new("'O''Brady'", Dbms::Default, false);
        let tok = t.next_token();
        assert_eq!(tok.kind, TokenKind::String);
        assert_eq!(tok.text, "'O''Brady'");
    }

    #[test]
    fn scans_hex_and_float_numbers() {
        let mut t = SqlTokenizer::new("0xff 3.14 -1e6", Dbms::Default, false);
        assert_eq!(t.next_token().text, "0xff");
        assert_eq!(t.next_token().text, "3.14");
        assert_eq!(t.next_token().text, "-1e6");
    }

    #[test]
    fn scans_curly_escape_sequence() {
        let mut t = SqlTokenizer::new("{fn now()}", Dbms::Default, false);
        let tok = t.next_token();
        assert_eq!(tok.kind, TokenKind::EscapeSequence);
        assert_eq!(tok.text, "{fn now()}");
    }

    #[test]
    fn postgres_dollar_quoted_string() {
        let mut t = SqlTokenizer::new("$tag$hello $world$tag$", Dbms::Postgres, false);
        let tok = t.next_token();
        assert_eq!(tok.kind, TokenKind::DollarQuotedString);
    }

    #[test]
    fn postgres_func_tagged_dollar_quote_is_distinct_kind() {
        let mut t = SqlTokenizer::new("$func$ SELECT 1 $func$", Dbms::Postgres, false);
        let tok = t.next_token();
        assert_eq!(tok.kind, TokenKind::DollarQuotedFunctionBody);
    }

    #[test]
    fn double_colon_is_a_distinct_cast_token() {
        let mut t = SqlTokenizer::new("id::int", Dbms::Default, false);
        assert_eq!(t.next_token().kind, TokenKind::Identifier);
        let cast = t.next_token();
        assert_eq!(cast.kind, TokenKind::ColonCast);
        assert_eq!(cast.text, "::");
        assert_eq!(t.next_token().kind, TokenKind::Identifier);
    }

    #[test]
    fn mssql_bracketed_identifier() {
        let mut t = SqlTokenizer::new("[my column]", Dbms::SqlServer, false);
        let tok = t.next_token();
        assert_eq!(tok.kind, TokenKind::DoubleQuotedString);
        assert_eq!(tok.text, "[my column]");
    }
}
