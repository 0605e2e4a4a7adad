// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use log::{debug, error};
use std::env;

use ddcommon::config::parse_env;

use crate::replacer::{self, ReplaceRule};

#[derive(Debug, Default)]
pub struct ObfuscationConfig {
    pub tag_replace_rules: Option<Vec<ReplaceRule>>,
    pub http_remove_query_string: bool,
    pub http_remove_path_digits: bool,
    pub obfuscate_memcached: bool,
    pub obfuscation_redis_enabled: bool,
    pub obfuscation_redis_remove_all_args: bool,
    /// Whether obfuscated SQL/NoSQL queries are memoized in the bounded cache (§4.F). Disabling
    /// this makes every cache operation a no-op; each query is re-tokenized every time.
    pub sql_cache_enabled: bool,
    /// Byte-cost budget for the SQL cache (§4.F), not an entry count — see [`crate::cache::Costed`].
    pub sql_cache_size: usize,
    /// `elasticsearch`/`opensearch` span `.body` JSON keys whose value is kept verbatim instead
    /// of being wiped to `"?"`.
    pub es_keep_values: Vec<String>,
    /// `mongodb` span `.query` JSON keys whose value is kept verbatim.
    pub mongo_keep_values: Vec<String>,
    /// Whether span `meta` values are scanned for credit-card-shaped numbers (§4.E) and scrubbed.
    pub credit_card_detection_enabled: bool,
    /// Whether the Luhn checksum gates a credit-card match, or any matching IIN prefix is enough.
    pub credit_card_luhn_check: bool,
}

impl ObfuscationConfig {
    pub fn new() -> Result<ObfuscationConfig, Box<dyn std::error::Error>> {
        let tag_replace_rules: Option<Vec<ReplaceRule>> = match env::var("DD_APM_REPLACE_TAGS") {
            Ok(replace_rules_str) => match replacer::parse_rules_from_string(&replace_rules_str) {
                Ok(res) => {
                    debug!("Successfully parsed DD_APM_REPLACE_TAGS: {res:?}");
                    Some(res)
                }
                Err(e) => {
                    error!("Failed to parse DD_APM_REPLACE_TAGS: {e}");
                    None
                }
            },
            Err(_) => None,
        };
        let http_remove_query_string =
            parse_env::bool("DD_APM_OBFUSCATION_HTTP_REMOVE_QUERY_STRING").unwrap_or(false);
        let http_remove_path_digits =
            parse_env::bool("DD_APM_OBFUSCATION_HTTP_REMOVE_PATHS_WITH_DIGITS").unwrap_or(false);
        let obfuscation_redis_enabled =
            parse_env::bool("DD_APM_OBFUSCATION_REDIS_ENABLED").unwrap_or(false);
        let obfuscation_redis_remove_all_args =
            parse_env::bool("DD_APM_OBFUSCATION_REDIS_REMOVE_ALL_ARGS").unwrap_or(false);
        let obfuscate_memcached =
            parse_env::bool("DD_APM_OBFUSCATION_MEMCACHED_ENABLED").unwrap_or(false);
        let sql_cache_enabled =
            parse_env::bool("DD_APM_OBFUSCATION_SQL_CACHE_ENABLED").unwrap_or(true);
        let sql_cache_size =
            parse_env::int::<usize>("DD_APM_OBFUSCATION_SQL_CACHE_SIZE").unwrap_or(5_000);
        let es_keep_values = comma_separated_env("DD_APM_OBFUSCATION_ELASTICSEARCH_KEEP_VALUES");
        let mongo_keep_values = comma_separated_env("DD_APM_OBFUSCATION_MONGODB_KEEP_VALUES");
        let credit_card_detection_enabled =
            parse_env::bool("DD_APM_OBFUSCATION_CREDIT_CARDS_ENABLED").unwrap_or(false);
        let credit_card_luhn_check =
            parse_env::bool("DD_APM_OBFUSCATION_CREDIT_CARDS_LUHN").unwrap_or(false);

        Ok(ObfuscationConfig {
            tag_replace_rules,
            http_remove_query_string,
            http_remove_path_digits,
            obfuscate_memcached,
            obfuscation_redis_enabled,
            obfuscation_redis_remove_all_args,
            sql_cache_enabled,
            sql_cache_size,
            es_keep_values,
            mongo_keep_values,
            credit_card_detection_enabled,
            credit_card_luhn_check,
        })
    }
}

fn comma_separated_env(name: &str) -> Vec<String> {
    env::var(name)
        .ok()
        .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_to_all_disabled_without_env() {
        for var in [
            "DD_APM_REPLACE_TAGS",
            "DD_APM_OBFUSCATION_HTTP_REMOVE_QUERY_STRING",
            "DD_APM_OBFUSCATION_HTTP_REMOVE_PATHS_WITH_DIGITS",
            "DD_APM_OBFUSCATION_REDIS_ENABLED",
            "DD_APM_OBFUSCATION_REDIS_REMOVE_ALL_ARGS",
            "DD_APM_OBFUSCATION_MEMCACHED_ENABLED",
            "DD_APM_OBFUSCATION_SQL_CACHE_ENABLED",
            "DD_APM_OBFUSCATION_SQL_CACHE_SIZE",
            "DD_APM_OBFUSCATION_ELASTICSEARCH_KEEP_VALUES",
            "DD_APM_OBFUSCATION_MONGODB_KEEP_VALUES",
        ] {
            env::remove_var(var);
        }
        let cfg = ObfuscationConfig::new().unwrap();
        assert!(cfg.tag_replace_rules.is_none());
        assert!(!cfg.http_remove_query_string);
        assert!(!cfg.obfuscation_redis_enabled);
        assert!(cfg.sql_cache_enabled);
        assert_eq!(cfg.sql_cache_size, 5_000);
        assert!(cfg.es_keep_values.is_empty());
    }

    #[test]
    #[serial]
    fn parses_replace_tags_from_env() {
        env::set_var(
            "DD_APM_REPLACE_TAGS",
            r#"[{"name": "http.url", "pattern": "guid", "repl": "[REDACTED]"}]"#,
        );
        let cfg = ObfuscationConfig::new().unwrap();
        assert_eq!(cfg.tag_replace_rules.unwrap().len(), 1);
        env::remove_var("DD_APM_REPLACE_TAGS");
    }
}
