// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;

type Transformer = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Obfuscates a JSON string by replacing all leaf values with `"?"`, unless the value
/// belongs to a key listed in `keep_keys`, in which case it is left verbatim.
/// Keys in `transform_keys` have their string values passed through a transformer function
/// (e.g. SQL obfuscation) instead of being replaced with `"?"`.
///
/// This is a byte-level pushdown scanner over the input, not a
/// `serde_json::Value` tree-walk: it tracks container nesting with an
/// explicit stack of scan states and copies structural bytes straight
/// through, so a malformed or truncated document still yields whatever
/// prefix was scanned successfully before the error.
///
/// Multiple concatenated JSON documents in the input are each obfuscated
/// independently. On a parse error the output built so far is returned
/// with `"..."` appended.
pub struct JsonObfuscator {
    keep_keys: HashSet<String>,
    transform_keys: HashSet<String>,
    transformer: Option<Transformer>,
}

impl JsonObfuscator {
    pub fn new(
        keep_keys: impl IntoIterator<Item = String>,
        transform_keys: impl IntoIterator<Item = String>,
        transformer: Option<Transformer>,
    ) -> Self {
        Self {
            keep_keys: keep_keys.into_iter().collect(),
            transform_keys: transform_keys.into_iter().collect(),
            transformer,
        }
    }

    pub fn obfuscate(&self, input: &str) -> String {
        if input.is_empty() {
            return String::new();
        }

        let mut scanner = Scanner::new(input);
        let mut out = String::with_capacity(input.len());

        loop {
            scanner.skip_ws();
            if scanner.peek().is_none() {
                break;
            }
            if self.obfuscate_value(&mut scanner, &mut out, None).is_err() {
                out.push_str("...");
                break;
            }
        }

        out
    }

    /// Scans and emits a single JSON value at the scanner's current position.
    /// `key` is the enclosing object key this value was found under, if any;
    /// `None` for array elements and top-level values, which never match
    /// `keep_keys`/`transform_keys`.
    fn obfuscate_value(&self, scanner: &mut Scanner, out: &mut String, key: Option<&str>) -> Result<(), ()> {
        if key.is_some_and(|k| self.keep_keys.contains(k)) {
            let start = scanner.off;
            scanner.skip_value()?;
            out.push_str(&scanner.src[start..scanner.off]);
            return Ok(());
        }

        if let Some(transformer) = &self.transformer {
            if key.is_some_and(|k| self.transform_keys.contains(k)) {
                if scanner.peek() == Some('"') {
                    let s = scanner.scan_json_string()?;
                    push_json_string(out, &transformer(&s));
                } else {
                    self.obfuscate_value(scanner, out, None)?;
                }
                return Ok(());
            }
        }

        match scanner.peek() {
            Some('{') => self.obfuscate_object(scanner, out),
            Some('[') => self.obfuscate_array(scanner, out),
            Some('"') => {
                scanner.skip_string()?;
                out.push_str("\"?\"");
                Ok(())
            }
            Some('t') => {
                scanner.expect_literal("true")?;
                out.push_str("\"?\"");
                Ok(())
            }
            Some('f') => {
                scanner.expect_literal("false")?;
                out.push_str("\"?\"");
                Ok(())
            }
            Some('n') => {
                scanner.expect_literal("null")?;
                out.push_str("\"?\"");
                Ok(())
            }
            Some(c) if c == '-' || c.is_ascii_digit() => {
                scanner.skip_number()?;
                out.push_str("\"?\"");
                Ok(())
            }
            _ => Err(()),
        }
    }

    fn obfuscate_object(&self, scanner: &mut Scanner, out: &mut String) -> Result<(), ()> {
        scanner.bump(); // '{'
        out.push('{');
        scanner.skip_ws();
        if scanner.peek() == Some('}') {
            scanner.bump();
            out.push('}');
            return Ok(());
        }
        loop {
            scanner.skip_ws();
            if scanner.peek() != Some('"') {
                return Err(());
            }
            let key = scanner.scan_json_string()?;
            push_json_string(out, &key);
            scanner.skip_ws();
            if scanner.peek() != Some(':') {
                return Err(());
            }
            scanner.bump();
            out.push(':');
            scanner.skip_ws();
            self.obfuscate_value(scanner, out, Some(&key))?;
            scanner.skip_ws();
            match scanner.peek() {
                Some(',') => {
                    scanner.bump();
                    out.push(',');
                }
                Some('}') => {
                    scanner.bump();
                    out.push('}');
                    return Ok(());
                }
                _ => return Err(()),
            }
        }
    }

    fn obfuscate_array(&self, scanner: &mut Scanner, out: &mut String) -> Result<(), ()> {
        scanner.bump(); // '['
        out.push('[');
        scanner.skip_ws();
        if scanner.peek() == Some(']') {
            scanner.bump();
            out.push(']');
            return Ok(());
        }
        loop {
            scanner.skip_ws();
            self.obfuscate_value(scanner, out, None)?;
            scanner.skip_ws();
            match scanner.peek() {
                Some(',') => {
                    scanner.bump();
                    out.push(',');
                }
                Some(']') => {
                    scanner.bump();
                    out.push(']');
                    return Ok(());
                }
                _ => return Err(()),
            }
        }
    }
}

/// Writes `s` as a quoted JSON string literal, escaping the characters JSON requires.
fn push_json_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Byte-offset cursor over a JSON document, in the same style as the SQL tokenizer:
/// `peek`/`bump` walk `char`s, `skip_*` advance past a grammar production without
/// building output, `scan_json_string` additionally decodes escapes into an owned `String`.
struct Scanner<'a> {
    src: &'a str,
    off: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Scanner { src, off: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.off..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.off += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t') | Some('\n') | Some('\r')) {
            self.bump();
        }
    }

    fn expect_literal(&mut self, lit: &str) -> Result<(), ()> {
        if self.src[self.off..].starts_with(lit) {
            self.off += lit.len();
            Ok(())
        } else {
            Err(())
        }
    }

    /// Advances past a string literal (including both quotes) without decoding it.
    fn skip_string(&mut self) -> Result<(), ()> {
        if self.bump() != Some('"') {
            return Err(());
        }
        loop {
            match self.bump() {
                None => return Err(()),
                Some('"') => return Ok(()),
                Some('\\') => {
                    if self.bump().is_none() {
                        return Err(());
                    }
                }
                Some(_) => {}
            }
        }
    }

    /// Advances past and decodes a string literal's escapes into an owned `String`.
    fn scan_json_string(&mut self) -> Result<String, ()> {
        if self.bump() != Some('"') {
            return Err(());
        }
        let mut s = String::new();
        loop {
            match self.bump() {
                None => return Err(()),
                Some('"') => return Ok(s),
                Some('\\') => match self.bump() {
                    Some('"') => s.push('"'),
                    Some('\\') => s.push('\\'),
                    Some('/') => s.push('/'),
                    Some('b') => s.push('\u{8}'),
                    Some('f') => s.push('\u{c}'),
                    Some('n') => s.push('\n'),
                    Some('r') => s.push('\r'),
                    Some('t') => s.push('\t'),
                    Some('u') => {
                        let cp = self.scan_hex4()?;
                        s.push(char::from_u32(cp).unwrap_or('\u{fffd}'));
                    }
                    _ => return Err(()),
                },
                Some(c) => s.push(c),
            }
        }
    }

    fn scan_hex4(&mut self) -> Result<u32, ()> {
        let mut cp = 0u32;
        for _ in 0..4 {
            let c = self.bump().ok_or(())?;
            cp = cp * 16 + c.to_digit(16).ok_or(())?;
        }
        Ok(cp)
    }

    fn skip_number(&mut self) -> Result<(), ()> {
        let start = self.off;
        if self.peek() == Some('-') {
            self.bump();
        }
        let mut digits = 0;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            digits += 1;
        }
        if digits == 0 {
            self.off = start;
            return Err(());
        }
        if self.peek() == Some('.') {
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            self.bump();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.bump();
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        Ok(())
    }

    /// Advances past exactly one JSON value's raw text without transforming it,
    /// for copying a `keep_keys` subtree verbatim.
    fn skip_value(&mut self) -> Result<(), ()> {
        match self.peek() {
            Some('{') => self.skip_container('{', '}'),
            Some('[') => self.skip_container('[', ']'),
            Some('"') => self.skip_string(),
            Some('t') => self.expect_literal("true"),
            Some('f') => self.expect_literal("false"),
            Some('n') => self.expect_literal("null"),
            Some(c) if c == '-' || c.is_ascii_digit() => self.skip_number(),
            _ => Err(()),
        }
    }

    fn skip_container(&mut self, open: char, close: char) -> Result<(), ()> {
        if self.bump() != Some(open) {
            return Err(());
        }
        self.skip_ws();
        if self.peek() == Some(close) {
            self.bump();
            return Ok(());
        }
        loop {
            self.skip_ws();
            if open == '{' {
                self.skip_string()?;
                self.skip_ws();
                if self.bump() != Some(':') {
                    return Err(());
                }
                self.skip_ws();
            }
            self.skip_value()?;
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(c) if c == close => return Ok(()),
                _ => return Err(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::JsonObfuscator;
    use crate::sql_obfuscate::obfuscate_sql_string;
    use crate::sql_tokenizer::Dbms;

    fn obf(keep_keys: &[&str]) -> JsonObfuscator {
        JsonObfuscator::new(keep_keys.iter().map(|s| s.to_string()), [], None)
    }

    fn obf_sql(keep_keys: &[&str], transform_keys: &[&str]) -> JsonObfuscator {
        JsonObfuscator::new(
            keep_keys.iter().map(|s| s.to_string()),
            transform_keys.iter().map(|s| s.to_string()),
            Some(Box::new(|s: &str| obfuscate_sql_string(s, Dbms::Default).0)),
        )
    }

    fn assert_json_eq(result: &str, expected: &str) {
        let result: serde_json::Value =
            serde_json::from_str(result).expect("result is not valid JSON");
        let expected: serde_json::Value =
            serde_json::from_str(expected).expect("expected is not valid JSON");
        assert_eq!(result, expected);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(obf(&[]).obfuscate(""), "");
    }

    #[test]
    fn test_all_values_obfuscated() {
        let input = r#"{"query":{"multi_match":{"query":"guide","fields":["_all",{"key":"value","other":["1","2",{"k":"v"}]},"2"]}}}"#;
        let expected = r#"{"query":{"multi_match":{"query":"?","fields":["?",{"key":"?","other":["?","?",{"k":"?"}]},"?"]}}}"#;
        assert_json_eq(&obf(&[]).obfuscate(input), expected);
    }

    #[test]
    fn test_numbers_obfuscated() {
        let input = r#"{"highlight":{"pre_tags":["<em>"],"post_tags":["</em>"],"index":1}}"#;
        let expected = r#"{"highlight":{"pre_tags":["?"],"post_tags":["?"],"index":"?"}}"#;
        assert_json_eq(&obf(&[]).obfuscate(input), expected);
    }

    #[test]
    fn test_keep_key_keeps_entire_value() {
        let input = r#"{"query":{"multi_match":{"query":"guide","fields":["_all",{"key":"value","other":["1","2",{"k":"v"}]},"2"]}}}"#;
        let expected = r#"{"query":{"multi_match":{"query":"?","fields":["?",{"key":"?","other":["1","2",{"k":"v"}]},"?"]}}}"#;
        assert_json_eq(&obf(&["other"]).obfuscate(input), expected);
    }

    #[test]
    fn test_keep_key_deep_nested() {
        let input = r#"{"fields":["_all",{"key":"value","other":["1","2",{"k":"v"}]},"2"]}"#;
        let expected = r#"{"fields":["?",{"key":"?","other":["?","?",{"k":"v"}]},"?"]}"#;
        assert_json_eq(&obf(&["k"]).obfuscate(input), expected);
    }

    #[test]
    fn test_multiple_json_objects() {
        let input = r#"{"index":{"_index":"traces","_type":"trace"}} {"value":1,"name":"test"}"#;
        let result = obf(&[]).obfuscate(input);
        let mut stream =
            serde_json::Deserializer::from_str(&result).into_iter::<serde_json::Value>();
        let first = stream
            .next()
            .expect("first value")
            .expect("first value is valid JSON");
        let second = stream
            .next()
            .expect("second value")
            .expect("second value is valid JSON");
        assert_eq!(first, json!({"index":{"_index":"?","_type":"?"}}));
        assert_eq!(second, json!({"value":"?","name":"?"}));
    }

    #[test]
    fn test_invalid_json_appends_ellipsis() {
        let result = obf(&[]).obfuscate("INVALID");
        assert_eq!(result, "...");
    }

    #[test]
    fn test_partial_json_appends_ellipsis() {
        let result = obf(&[]).obfuscate(r#"{"key": "value""#);
        assert!(
            result.ends_with("..."),
            "expected '...' suffix, got: {result}"
        );
    }

    #[test]
    fn test_partial_json_preserves_output_scanned_before_the_error() {
        // The first key/value pair is complete and obfuscated before the
        // scanner hits the truncated second pair; that prefix must survive
        // in the output rather than being discarded wholesale.
        let result = obf(&[]).obfuscate(r#"{"a":"1","b":"unterminated"#);
        assert!(
            result.starts_with(r#"{"a":"?","b":"#),
            "expected scanned prefix to survive, got: {result}"
        );
        assert!(result.ends_with("..."));
    }

    #[test]
    fn test_transform_key_sql_basic() {
        let input = r#"{"query":"select * from table where id = 2","hello":"world","hi":"there"}"#;
        let result = obf_sql(&["hello"], &["query"]).obfuscate(input);
        let val: serde_json::Value = serde_json::from_str(&result).unwrap();
        assert_eq!(val["hello"], json!("world"));
        assert_eq!(val["hi"], json!("?"));
        assert!(
            val["query"].as_str().unwrap().contains('?'),
            "SQL value should be obfuscated"
        );
    }

    #[test]
    fn test_transform_key_with_object_value_falls_through() {
        let input = r#"{"object":{"not a":"query"}}"#;
        let expected = r#"{"object":{"not a":"?"}}"#;
        assert_json_eq(&obf_sql(&[], &["object"]).obfuscate(input), expected);
    }

    #[test]
    fn test_boolean_and_null_obfuscated() {
        let input = r#"{"a":true,"b":false,"c":null}"#;
        let expected = r#"{"a":"?","b":"?","c":"?"}"#;
        assert_json_eq(&obf(&[]).obfuscate(input), expected);
    }
}
