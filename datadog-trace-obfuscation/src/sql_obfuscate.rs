// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The filter chain that turns a token stream from [`crate::sql_tokenizer`] into an obfuscated
//! SQL string: a `metadataFinder` pass records table names seen after `FROM`/`INTO`/`UPDATE`/
//! `JOIN`, `discard` drops comments, `replace` swaps literals for `?`, and `grouping` collapses a
//! run of `?, ?, ?` inside one set of parens down to a single `?`.

use crate::sql_tokenizer::{Dbms, SqlTokenizer, Token, TokenKind};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SqlMetadata {
    pub table_names: Vec<String>,
    pub procedure_names: Vec<String>,
    pub comments: Vec<String>,
    /// Command keywords (SELECT/INSERT/UPDATE/…), in the order they were seen at the start of a
    /// statement.
    pub commands: Vec<String>,
}

impl SqlMetadata {
    /// Deduplicated, comma-joined table names, in first-seen order.
    pub fn tables_csv(&self) -> String {
        let mut seen = std::collections::HashSet::new();
        self.table_names
            .iter()
            .filter(|t| seen.insert(t.as_str()))
            .cloned()
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Byte size of the metadata collected, used as part of a cache entry's admission cost.
    pub fn size(&self) -> usize {
        self.table_names.iter().map(|s| s.len()).sum::<usize>()
            + self.procedure_names.iter().map(|s| s.len()).sum::<usize>()
            + self.comments.iter().map(|s| s.len()).sum::<usize>()
            + self.commands.iter().map(|s| s.len()).sum::<usize>()
    }
}

fn is_command_keyword(text: &str) -> bool {
    matches!(
        text.to_ascii_uppercase().as_str(),
        "SELECT" | "INSERT" | "UPDATE" | "DELETE" | "CREATE" | "DROP" | "ALTER" | "COMMIT"
            | "ROLLBACK" | "BEGIN"
    )
}

fn is_literal(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::String
            | TokenKind::DoubleQuotedString
            | TokenKind::DollarQuotedString
            | TokenKind::Number
            | TokenKind::BooleanLiteral
            | TokenKind::Null
            | TokenKind::ValueArg
            | TokenKind::PreparedStatement
            | TokenKind::Variable
    )
}

/// Tokenizes `input` once, running the metadataFinder/discard/replace/grouping chain over the
/// stream, and returns the obfuscated string plus whatever table/procedure names and comments
/// were collected along the way.
///
/// On a lex error the chain still returns its best-effort output up to the point of failure
/// rather than discarding everything, matching the partial-output behavior of the JSON scanner.
pub fn obfuscate_sql_string(input: &str, dbms: Dbms) -> (String, SqlMetadata) {
    let (query, metadata, ..) = obfuscate_sql_string_checked(input, dbms, false);
    (query, metadata)
}

/// Same as [`obfuscate_sql_string`], but also reports whether the tokenizer hit a `LexError`
/// and whether it saw an ambiguous `\` along the way, and takes the `literalEscapes` mode the
/// top-level retry policy (§4.B) flips between.
///
/// Returns `(obfuscated, metadata, lex_error, seen_escape)`.
pub fn obfuscate_sql_string_checked(
    input: &str,
    dbms: Dbms,
    literal_escapes: bool,
) -> (String, SqlMetadata, bool, bool) {
    let mut tokenizer = SqlTokenizer::new(input, dbms, literal_escapes);
    let mut out = String::with_capacity(input.len());
    let mut meta = SqlMetadata::default();

    // `want_table_name` is set to true right after FROM/INTO/UPDATE/JOIN and cleared once the
    // next identifier-shaped token is consumed, implementing the metadataFinder pass.
    let mut want_table_name = false;
    let mut at_statement_start = true;
    let mut last_emitted: Option<TokenKind> = None;
    // `groupFilter`: one entry per currently-open `(…)`, tracking where its content starts in
    // `out`, whether any literal was replaced inside it, and whether anything other than a
    // literal/comma showed up (a subquery, an identifier, …) — only a pure literal-and-comma
    // group collapses down to the fixed `( ? )` form.
    let mut paren_stack: Vec<ParenGroup> = Vec::new();
    // `groupMulti`: true right after a top-level `(…)` group collapsed to a single `?` closes,
    // so a following `,(…)` run of sibling groups can be folded into that same `( ? )` instead
    // of each emitting its own.
    let mut last_closed_was_group = false;
    let mut lookahead: Option<Token<'_>> = None;

    loop {
        let tok = lookahead.take().unwrap_or_else(|| tokenizer.next_token());
        if tok.kind == TokenKind::EndChar {
            break;
        }

        let was_group_run = last_closed_was_group;
        last_closed_was_group = false;

        match tok.kind {
            TokenKind::Comment => {
                meta.comments.push(tok.text.trim().to_string());
                continue; // discard
            }
            TokenKind::LexError => {
                // stop processing, return what we have so far (partial output on failure)
                break;
            }
            TokenKind::DollarQuotedFunctionBody => {
                // `$func$ ... $func$` is embedded SQL, not an opaque literal: re-enter the chain
                // on its body rather than replacing the whole block with a single `?`.
                if let Some((tag, body)) = split_dollar_quoted(tok.text) {
                    let (inner_out, inner_meta) = obfuscate_sql_string(body, dbms);
                    meta.table_names.extend(inner_meta.table_names);
                    meta.procedure_names.extend(inner_meta.procedure_names);
                    meta.comments.extend(inner_meta.comments);
                    meta.commands.extend(inner_meta.commands);
                    if needs_space(last_emitted, TokenKind::DollarQuotedFunctionBody) {
                        out.push(' ');
                    }
                    out.push('$');
                    out.push_str(tag);
                    out.push('$');
                    out.push(' ');
                    out.push_str(&inner_out);
                    out.push(' ');
                    out.push('$');
                    out.push_str(tag);
                    out.push('$');
                } else {
                    push_replaced(&mut out, last_emitted);
                }
                if let Some(group) = paren_stack.last_mut() {
                    group.has_nonliteral = true;
                }
                last_emitted = Some(TokenKind::DollarQuotedFunctionBody);
                continue;
            }
            TokenKind::Comma if was_group_run => {
                lookahead = Some(tokenizer.next_token());
                if lookahead.as_ref().map(|t| t.is_open_paren()).unwrap_or(false) {
                    lookahead = None; // consume the '(' we just peeked
                    let mut depth = 1;
                    'swallow: loop {
                        let t = tokenizer.next_token();
                        match t.kind {
                            TokenKind::EndChar => break 'swallow,
                            TokenKind::LexError => break 'swallow,
                            TokenKind::Comment => meta.comments.push(t.text.trim().to_string()),
                            _ if t.is_open_paren() => depth += 1,
                            TokenKind::CloseParen => {
                                depth -= 1;
                                if depth == 0 {
                                    break 'swallow;
                                }
                            }
                            _ => {}
                        }
                    }
                    last_closed_was_group = true;
                    continue;
                }
                // not followed by another group: fall through and emit the comma normally.
            }
            _ => {}
        }

        if at_statement_start {
            if is_command_keyword(tok.text) || matches!(tok.kind, TokenKind::Select) {
                meta.commands.push(tok.text.to_ascii_uppercase());
            }
            at_statement_start = false;
        }
        if tok.kind == TokenKind::Semicolon {
            at_statement_start = true;
        }

        if want_table_name {
            if matches!(tok.kind, TokenKind::Identifier | TokenKind::Keyword) {
                meta.table_names.push(tok.text.to_string());
            }
            want_table_name = false;
        }
        if matches!(
            tok.kind,
            TokenKind::From | TokenKind::Into | TokenKind::Update | TokenKind::Join
        ) {
            want_table_name = true;
        }

        if tok.is_open_paren() {
            push_token(&mut out, &tok, last_emitted);
            paren_stack.push(ParenGroup {
                start: out.len(),
                has_literal: false,
                has_nonliteral: false,
            });
            last_emitted = Some(tok.kind);
            continue;
        }
        if tok.kind == TokenKind::CloseParen {
            if let Some(group) = paren_stack.pop() {
                if group.has_literal && !group.has_nonliteral {
                    out.truncate(group.start);
                    out.push_str(" ? )");
                    last_emitted = Some(TokenKind::CloseParen);
                    if paren_stack.is_empty() {
                        last_closed_was_group = true;
                    } else if let Some(outer) = paren_stack.last_mut() {
                        outer.has_literal = true;
                    }
                    continue;
                }
                if let Some(outer) = paren_stack.last_mut() {
                    outer.has_nonliteral = true;
                }
            }
            push_token(&mut out, &tok, last_emitted);
            last_emitted = Some(tok.kind);
            continue;
        }

        if is_literal(tok.kind) {
            let collapsed_already = paren_stack.last().map(|g| g.has_literal).unwrap_or(false);
            if collapsed_already && last_emitted == Some(TokenKind::Comma) {
                // grouping filter: a literal following a literal we already replaced, inside the
                // same parens, separated only by a comma — drop the ", ?" entirely.
                // Remove the trailing ", " we just emitted for the comma.
                while out.ends_with(' ') {
                    out.pop();
                }
                if out.ends_with(',') {
                    out.pop();
                }
                last_emitted = Some(TokenKind::FilteredGroupable);
                continue;
            }
            push_replaced(&mut out, last_emitted);
            if let Some(group) = paren_stack.last_mut() {
                group.has_literal = true;
            }
            last_emitted = Some(TokenKind::FilteredGroupable);
            continue;
        }

        if !matches!(tok.kind, TokenKind::Comma) {
            if let Some(group) = paren_stack.last_mut() {
                group.has_nonliteral = true;
            }
        }
        push_token(&mut out, &tok, last_emitted);
        last_emitted = Some(tok.kind);
    }

    (out, meta, tokenizer.err, tokenizer.seen_escape)
}

/// Bookkeeping for one currently-open `(…)` in the grouping filter (§4.B).
struct ParenGroup {
    /// Byte offset into `out` right after the opening `(` was emitted.
    start: usize,
    has_literal: bool,
    has_nonliteral: bool,
}

fn push_replaced(out: &mut String, last_emitted: Option<TokenKind>) {
    if needs_space(last_emitted, TokenKind::FilteredGroupable) {
        out.push(' ');
    }
    out.push('?');
}

fn push_token(out: &mut String, tok: &Token, last_emitted: Option<TokenKind>) {
    if needs_space(last_emitted, tok.kind) {
        out.push(' ');
    }
    out.push_str(tok.text);
}

fn needs_space(prev: Option<TokenKind>, next: TokenKind) -> bool {
    let Some(prev) = prev else { return false };
    if matches!(next, TokenKind::Comma | TokenKind::CloseParen | TokenKind::Semicolon) {
        return false;
    }
    if matches!(prev, TokenKind::OpenParen) {
        return false;
    }
    // `::` binds tightly to both its operand and its target type: `id::int`, not `id :: int`.
    if matches!(next, TokenKind::ColonCast) || matches!(prev, TokenKind::ColonCast) {
        return false;
    }
    true
}

/// Splits a `$tag$ ... $tag$` token's raw text into `(tag, body)`, stripping both delimiters.
fn split_dollar_quoted(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix('$')?;
    let tag_end = rest.find('$')?;
    let tag = &rest[..tag_end];
    let open_len = 1 + tag_end + 1;
    let close_delim_len = 1 + tag.len() + 1;
    if text.len() < open_len + close_delim_len {
        return None;
    }
    Some((tag, &text[open_len..text.len() - close_delim_len]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_string_and_number_literals() {
        let (out, _) = obfuscate_sql_string("SELECT * FROM foo WHERE id = 1 AND name = 'bob'", Dbms::Default);
        assert_eq!(out, "SELECT * FROM foo WHERE id = ? AND name = ?");
    }

    #[test]
    fn collapses_grouped_value_args() {
        let (out, _) = obfuscate_sql_string("INSERT INTO foo VALUES (?, ?, ?)", Dbms::Default);
        assert_eq!(out, "INSERT INTO foo VALUES ( ? )");
    }

    #[test]
    fn drops_comments() {
        let (out, meta) = obfuscate_sql_string("SELECT 1 -- trailing comment\n", Dbms::Default);
        assert_eq!(out, "SELECT ?");
        assert_eq!(meta.comments, vec!["-- trailing comment"]);
    }

    #[test]
    fn records_table_names() {
        let (_, meta) = obfuscate_sql_string(
            "SELECT * FROM users u JOIN orders o ON u.id = o.user_id",
            Dbms::Default,
        );
        assert_eq!(meta.table_names, vec!["users", "orders"]);
    }

    #[test]
    fn partial_output_on_lex_error() {
        let (out, _) = obfuscate_sql_string("SELECT 1 FROM foo WHERE id = `", Dbms::Default);
        assert!(out.starts_with("SELECT ? FROM foo WHERE id ="));
        let (_, _, lex_error, _) = obfuscate_sql_string_checked("SELECT 1 FROM foo WHERE id = `", Dbms::Default, false);
        assert!(lex_error);
    }

    #[test]
    fn records_command_keyword() {
        let (_, meta) = obfuscate_sql_string("SELECT * FROM users WHERE id = 42", Dbms::Default);
        assert_eq!(meta.commands, vec!["SELECT"]);
        assert_eq!(meta.tables_csv(), "users");

        let (_, meta) = obfuscate_sql_string("INSERT INTO t VALUES (1,2),(3,4),(5,6)", Dbms::Default);
        assert_eq!(meta.commands, vec!["INSERT"]);
        assert_eq!(meta.tables_csv(), "t");
    }

    #[test]
    fn collapses_consecutive_value_groups() {
        let (out, _) = obfuscate_sql_string("INSERT INTO t VALUES (1,2),(3,4),(5,6)", Dbms::Default);
        assert_eq!(out, "INSERT INTO t VALUES ( ? )");
    }

    #[test]
    fn subquery_inside_parens_is_not_collapsed() {
        let (out, _) = obfuscate_sql_string(
            "SELECT * FROM foo WHERE id IN (SELECT id FROM bar)",
            Dbms::Default,
        );
        assert_eq!(out, "SELECT * FROM foo WHERE id IN (SELECT id FROM bar)");
    }

    #[test]
    fn recursively_obfuscates_dollar_quoted_function_body() {
        let (out, _) = obfuscate_sql_string("SELECT $func$ SELECT 42 $func$", Dbms::Postgres);
        assert_eq!(out, "SELECT $func$ SELECT ? $func$");
    }

    #[test]
    fn non_func_dollar_quoted_string_stays_an_opaque_literal() {
        let (out, _) =
            obfuscate_sql_string("SELECT $tag$ hello world $tag$", Dbms::Postgres);
        assert_eq!(out, "SELECT ?");
    }

    #[test]
    fn type_cast_does_not_corrupt_identifier_or_type_name() {
        let (out, _) = obfuscate_sql_string("SELECT id::int FROM foo", Dbms::Default);
        assert_eq!(out, "SELECT id::int FROM foo");
    }

    #[test]
    fn tables_csv_dedupes() {
        let (_, meta) = obfuscate_sql_string(
            "SELECT * FROM users u JOIN users o ON u.id = o.user_id",
            Dbms::Default,
        );
        assert_eq!(meta.tables_csv(), "users");
    }
}
