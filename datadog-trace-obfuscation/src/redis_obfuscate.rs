// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Redis command obfuscation built on top of [`crate::redis_tokenizer`]'s scan loop.
//!
//! Two entrypoints: [`obfuscate`] applies a per-command argument mask table (keys and flags
//! survive, sensitive operands are replaced with `?`), while [`quantize`] discards every command
//! but the first up to three, reduced to just their name (plus, for known two-word compounds,
//! their first argument), appending ` ...` when commands were dropped. Both walk the same scanner
//! used for Redis command quantization, so neither reproduces the newline-inside-a-quoted-string
//! bug a naive whitespace split would hit.

use crate::redis_tokenizer::{RedisTokenType, RedisTokenizer};

/// Command names whose first argument is part of the command's identity, not a masked operand
/// (`CLIENT LIST`, `CONFIG GET`, ...). Used by [`quantize`] to keep such pairs together.
const TWO_WORD_COMMANDS: &[&str] = &["CLIENT", "CLUSTER", "COMMAND", "CONFIG", "DEBUG", "SCRIPT"];

const ZADD_FLAGS: &[&str] = &["NX", "XX", "GT", "LT", "CH", "INCR"];
const GEOADD_FLAGS: &[&str] = &["NX", "XX", "CH"];

/// One parsed `COMMAND arg arg ...` group.
struct Command<'a> {
    name: &'a str,
    args: Vec<&'a str>,
}

/// Walks the tokenizer once, grouping tokens into one [`Command`] per command the scanner
/// reports (a new `RedisTokenCommand` token, or a newline inside a multi-command string, starts
/// a new group).
fn scan_commands(cmd: &str) -> Vec<Command<'_>> {
    let mut tokenizer = RedisTokenizer::new(cmd);
    let mut commands = Vec::new();
    let mut current: Option<Command> = None;
    loop {
        let result = tokenizer.scan();
        match result.token_type {
            RedisTokenType::RedisTokenCommand => {
                if let Some(c) = current.take() {
                    commands.push(c);
                }
                if !result.token.is_empty() {
                    current = Some(Command {
                        name: result.token,
                        args: Vec::new(),
                    });
                }
            }
            RedisTokenType::RedisTokenArgument => {
                if !result.token.is_empty() {
                    if let Some(c) = current.as_mut() {
                        c.args.push(result.token);
                    }
                }
            }
        }
        if result.done {
            break;
        }
    }
    if let Some(c) = current {
        commands.push(c);
    }
    commands
}

/// Applies the per-command argument mask table, keeping command names and non-sensitive operands
/// (keys, field names, flags) verbatim and replacing sensitive operands with `?`. Unrecognized
/// commands mask every argument.
pub fn obfuscate(cmd: &str) -> String {
    let mut out = String::with_capacity(cmd.len());
    for command in scan_commands(cmd) {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(command.name);
        for masked in mask_args(command.name, &command.args) {
            out.push(' ');
            out.push_str(masked);
        }
    }
    out
}

fn mask_args<'a>(command: &str, args: &[&'a str]) -> Vec<&'a str> {
    match command.to_ascii_uppercase().as_str() {
        "SET" => mask_all_but(args, &[0]),
        "HSET" | "HMSET" => mask_key_field_value_pairs(args),
        "ZADD" => mask_flagged_pairs(args, ZADD_FLAGS),
        "BITFIELD" => mask_bitfield(args),
        "GEOADD" => mask_geoadd(args),
        // AUTH and anything unrecognized: every argument is sensitive.
        _ => args.iter().map(|_| "?").collect(),
    }
}

fn mask_all_but<'a>(args: &[&'a str], keep_indices: &[usize]) -> Vec<&'a str> {
    args.iter()
        .enumerate()
        .map(|(i, &a)| if keep_indices.contains(&i) { a } else { "?" })
        .collect()
}

/// `key field value [field value ...]`: key and field names kept, values masked.
fn mask_key_field_value_pairs<'a>(args: &[&'a str]) -> Vec<&'a str> {
    args.iter()
        .enumerate()
        .map(|(i, &a)| {
            if i == 0 || (i - 1) % 2 == 0 {
                a
            } else {
                "?"
            }
        })
        .collect()
}

/// `key [flag ...] member-or-score member-or-score ...`: key and recognized leading flags kept,
/// every remaining operand masked.
fn mask_flagged_pairs<'a>(args: &[&'a str], flags: &[&str]) -> Vec<&'a str> {
    if args.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(args.len());
    out.push(args[0]);
    let mut i = 1;
    while i < args.len() && flags.iter().any(|f| args[i].eq_ignore_ascii_case(f)) {
        out.push(args[i]);
        i += 1;
    }
    out.extend(args[i..].iter().map(|_| "?"));
    out
}

/// `key [GET type offset] [SET type offset value] [INCRBY type offset increment] [OVERFLOW mode]`:
/// masks the 3rd token of each `SET` sub-op (its offset), keeps the rest verbatim.
fn mask_bitfield<'a>(args: &[&'a str]) -> Vec<&'a str> {
    if args.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(args.len());
    out.push(args[0]);
    let mut i = 1;
    while i < args.len() {
        let op = args[i];
        out.push(op);
        let arity = match op.to_ascii_uppercase().as_str() {
            "GET" => 2,
            "SET" => 3,
            "INCRBY" => 3,
            "OVERFLOW" => 1,
            _ => 0,
        };
        for (offset, &arg) in args.iter().skip(i + 1).take(arity).enumerate() {
            // Within a SET sub-op (SET type offset value), offset is the 3rd token overall,
            // i.e. the 2nd token after SET itself.
            if op.eq_ignore_ascii_case("SET") && offset == 1 {
                out.push("?");
            } else {
                out.push(arg);
            }
        }
        i += 1 + arity;
    }
    out
}

/// `key [NX|XX] [CH] longitude latitude member [longitude latitude member ...]`: key and leading
/// flags kept, every 3rd remaining operand (the member name) masked.
fn mask_geoadd<'a>(args: &[&'a str]) -> Vec<&'a str> {
    if args.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(args.len());
    out.push(args[0]);
    let mut i = 1;
    while i < args.len() && GEOADD_FLAGS.iter().any(|f| args[i].eq_ignore_ascii_case(f)) {
        out.push(args[i]);
        i += 1;
    }
    for (pos, &a) in args[i..].iter().enumerate() {
        if (pos + 1) % 3 == 0 {
            out.push("?");
        } else {
            out.push(a);
        }
    }
    out
}

/// Reduces a multi-command string to the first up to three commands, each collapsed to just its
/// name (plus, for [`TWO_WORD_COMMANDS`], its first argument). Appends ` ...` when any command
/// was dropped to make the cut.
pub fn quantize(cmd: &str) -> String {
    const LIMIT: usize = 3;
    let commands = scan_commands(cmd);
    let mut out = String::new();
    for command in commands.iter().take(LIMIT) {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(command.name);
        if TWO_WORD_COMMANDS
            .iter()
            .any(|c| command.name.eq_ignore_ascii_case(c))
        {
            if let Some(first_arg) = command.args.first() {
                out.push(' ');
                out.push_str(first_arg);
            }
        }
    }
    if commands.len() > LIMIT {
        out.push_str(" ...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_masks_its_only_argument() {
        assert_eq!(obfuscate("AUTH supersecret"), "AUTH ?");
    }

    #[test]
    fn set_keeps_key_masks_value() {
        assert_eq!(obfuscate("SET key1 value1"), "SET key1 ?");
    }

    #[test]
    fn hset_keeps_key_and_field_masks_value() {
        assert_eq!(obfuscate("HSET hash field value"), "HSET hash field ?");
    }

    #[test]
    fn hmset_masks_every_value_across_multiple_pairs() {
        assert_eq!(
            obfuscate("HMSET hash f1 v1 f2 v2"),
            "HMSET hash f1 ? f2 ?"
        );
    }

    #[test]
    fn zadd_keeps_key_and_flags_masks_score_and_member() {
        assert_eq!(
            obfuscate("ZADD key NX CH 1 member1 2 member2"),
            "ZADD key NX CH ? ? ? ?"
        );
    }

    #[test]
    fn bitfield_keeps_type_and_value_masks_set_offset() {
        assert_eq!(
            obfuscate("BITFIELD key SET u8 100 255"),
            "BITFIELD key SET u8 ? 255"
        );
    }

    #[test]
    fn geoadd_keeps_coordinates_masks_member() {
        assert_eq!(
            obfuscate("GEOADD key 13.361389 38.115556 Palermo"),
            "GEOADD key 13.361389 38.115556 ?"
        );
    }

    #[test]
    fn unrecognized_command_masks_every_argument() {
        assert_eq!(obfuscate("GET key1"), "GET ?");
    }

    #[test]
    fn handles_multiple_commands_on_separate_lines() {
        assert_eq!(obfuscate("SET a 1\nGET a"), "SET a ? GET ?");
    }

    #[test]
    fn preserves_quoted_arg_with_embedded_space_as_single_token() {
        assert_eq!(obfuscate(r#"SET key "hello world""#), r#"SET key ?"#);
    }

    #[test]
    fn bare_command_with_no_args() {
        assert_eq!(obfuscate("PING"), "PING");
    }

    #[test]
    fn quantize_keeps_command_name_only() {
        assert_eq!(quantize("GET key1"), "GET");
        assert_eq!(quantize("SET key1 value1"), "SET");
    }

    #[test]
    fn quantize_keeps_two_word_compound_commands_together() {
        assert_eq!(quantize("CLIENT LIST extra"), "CLIENT LIST");
    }

    #[test]
    fn quantize_keeps_up_to_three_commands_and_appends_ellipsis_when_truncated() {
        assert_eq!(quantize("CMD1\nCMD2\nCMD3\nCMD4"), "CMD1 CMD2 CMD3 ...");
    }

    #[test]
    fn quantize_does_not_append_ellipsis_when_nothing_was_dropped() {
        assert_eq!(quantize("CMD1\nCMD2"), "CMD1 CMD2");
    }

    #[test]
    fn quantize_does_not_reproduce_the_newline_in_quoted_string_command_count_bug() {
        // A literal newline embedded inside a quoted argument must not be miscounted as a
        // command boundary.
        assert_eq!(quantize("SET key \"line1\nline2\""), "SET");
    }
}
