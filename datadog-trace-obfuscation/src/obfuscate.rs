// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};

use datadog_trace_protobuf::pb;

use crate::{
    cache::{Cache, Costed},
    credit_cards::is_card_number,
    json::JsonObfuscator,
    memcached::obfuscate_memcached_string,
    obfuscation_config::ObfuscationConfig,
    redis_obfuscate,
    replacer::replace_span_tags,
    sql_obfuscate::{obfuscate_sql_string_checked, SqlMetadata},
    sql_tokenizer::Dbms,
    url_obfuscate::{obfuscate_url, UrlObfuscationConfig},
};

/// Memoized result of obfuscating one SQL/NoSQL query string; what [`crate::cache::Cache`]
/// stores for the SQL obfuscation cache (§4.F).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObfuscatedQuery {
    pub query: String,
    pub metadata: SqlMetadata,
}

impl Costed for ObfuscatedQuery {
    /// Admission cost used by the cost-aware SQL cache (§4.F): the bytes the entry occupies.
    fn cost(&self) -> usize {
        self.query.len() + self.metadata.size()
    }
}

/// Stateful obfuscation facade: SQL/JSON obfuscation with their bounded cache, plus the
/// stateless per-protocol rewriters (HTTP, Redis, Memcached) and the credit-card scrubber.
///
/// Not safe for concurrent use — callers serialize access to a single instance. The embedded
/// SQL cache is internally locked and safe to share, but `Obfuscator` itself flips
/// `literal_escapes` between calls (§4.B's top-level retry policy) and that ordering only makes
/// sense under serialized access.
pub struct Obfuscator {
    config: ObfuscationConfig,
    sql_cache: Cache<ObfuscatedQuery>,
    literal_escapes: AtomicBool,
    es_json: JsonObfuscator,
    mongo_json: JsonObfuscator,
}

impl Obfuscator {
    pub fn new(config: ObfuscationConfig) -> Self {
        let sql_cache = Cache::new(config.sql_cache_size.max(1));
        let es_json = JsonObfuscator::new(config.es_keep_values.clone(), [], None);
        let mongo_json = JsonObfuscator::new(config.mongo_keep_values.clone(), [], None);
        Obfuscator {
            config,
            sql_cache,
            literal_escapes: AtomicBool::new(false),
            es_json,
            mongo_json,
        }
    }

    /// A handle to the SQL obfuscation cache, for wiring up the background stats flusher
    /// (§4.F) from the caller's owning task.
    pub fn sql_cache(&self) -> Cache<ObfuscatedQuery> {
        self.sql_cache.clone()
    }

    pub fn obfuscate_span(&self, span: &mut pb::Span) {
        match span.r#type.as_str() {
            "sql" | "cassandra" => self.obfuscate_sql_span(span),
            "elasticsearch" | "opensearch" => {
                self.obfuscate_json_meta(span, "elasticsearch.body", &self.es_json)
            }
            "mongodb" => self.obfuscate_json_meta(span, "mongodb.query", &self.mongo_json),
            _ => {}
        }
        obfuscate_span(span, &self.config);
        self.scrub_credit_card_numbers(span);
    }

    fn obfuscate_sql_span(&self, span: &mut pb::Span) {
        if span.resource.is_empty() {
            return;
        }
        let obfuscated = self.obfuscate_sql(&span.resource);
        span.resource = obfuscated.query;
        if !obfuscated.metadata.table_names.is_empty() {
            span.meta
                .insert("sql.tables".to_string(), obfuscated.metadata.tables_csv());
        }
    }

    fn obfuscate_json_meta(&self, span: &mut pb::Span, meta_key: &str, json: &JsonObfuscator) {
        if let Some(value) = span.meta.get_mut(meta_key) {
            *value = json.obfuscate(value);
        }
    }

    fn scrub_credit_card_numbers(&self, span: &mut pb::Span) {
        if !self.config.credit_card_detection_enabled || span.meta.is_empty() {
            return;
        }
        for value in span.meta.values_mut() {
            if is_card_number(value.as_str(), self.config.credit_card_luhn_check) {
                *value = "?".to_string();
            }
        }
    }

    /// Runs the SQL filter chain for `query`, memoizing the result in the bounded cache unless
    /// it's disabled.
    fn obfuscate_sql(&self, query: &str) -> ObfuscatedQuery {
        if !self.config.sql_cache_enabled {
            let (text, metadata, _) = self.attempt_sql(query);
            return ObfuscatedQuery {
                query: text,
                metadata,
            };
        }
        self.sql_cache.get_or_insert_with(query, || {
            let (text, metadata, _) = self.attempt_sql(query);
            ObfuscatedQuery {
                query: text,
                metadata,
            }
        })
    }

    /// Top-level retry policy (§4.B): try the current `literal_escapes` guess; if tokenization
    /// failed and the failure involved an ambiguous `\`, retry with the opposite guess and, on
    /// success, persist it for future calls.
    fn attempt_sql(&self, query: &str) -> (String, SqlMetadata, bool) {
        let current = self.literal_escapes.load(Ordering::Relaxed);
        let (text, metadata, lex_error, seen_escape) =
            obfuscate_sql_string_checked(query, Dbms::Default, current);
        if lex_error && seen_escape {
            let alt = !current;
            let (alt_text, alt_metadata, alt_lex_error, _) =
                obfuscate_sql_string_checked(query, Dbms::Default, alt);
            if !alt_lex_error {
                self.literal_escapes.store(alt, Ordering::Relaxed);
                return (alt_text, alt_metadata, false);
            }
        }
        (text, metadata, lex_error)
    }
}

pub fn obfuscate_span(span: &mut pb::Span, config: &ObfuscationConfig) {
    match span.r#type.as_str() {
        "web" | "http" => {
            if span.meta.is_empty() {
                return;
            }
            if let Some(url) = span.meta.get_mut("http.url") {
                *url = obfuscate_url(
                    url,
                    &UrlObfuscationConfig {
                        remove_query_string: config.http_remove_query_string,
                        redact_numeric_path_segments: config.http_remove_path_digits,
                    },
                )
            }
        }
        "memcached" if config.obfuscate_memcached => {
            if let Some(cmd) = span.meta.get_mut("memcached.command") {
                *cmd = obfuscate_memcached_string(cmd)
            }
        }
        "redis" => {
            if !config.obfuscation_redis_enabled || span.meta.is_empty() {
                return;
            }
            if let Some(redis_cmd) = span.meta.get_mut("redis.raw_command") {
                if config.obfuscation_redis_remove_all_args {
                    *redis_cmd = redis_obfuscate::quantize(redis_cmd)
                } else {
                    *redis_cmd = redis_obfuscate::obfuscate(redis_cmd)
                }
            }
        }
        _ => {}
    }
    if let Some(tag_replace_rules) = &config.tag_replace_rules {
        replace_span_tags(span, tag_replace_rules, &mut String::new());
    }
}
