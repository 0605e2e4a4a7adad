// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod cache;
pub mod credit_cards;
pub mod ip_address;
pub mod json;
pub mod memcached;
pub mod obfuscate;
pub mod obfuscation_config;
pub mod redis_obfuscate;
pub mod redis_tokenizer;
pub mod replacer;
pub mod sql_obfuscate;
pub mod sql_tokenizer;
pub mod url_obfuscate;
