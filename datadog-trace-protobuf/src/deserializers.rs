// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::de::{Deserialize, Deserializer};
use std::collections::HashMap;

/// Tracers occasionally send `null` for fields that are normally a concrete type.
/// Deserialize those into the field's `Default` rather than failing the whole payload.
pub fn deserialize_null_into_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let opt = Option::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

/// Same as [deserialize_null_into_default], but for maps whose *values* can individually be
/// `null` (seen from some non-Go tracers' JSON encoders).
pub fn deserialize_map_with_nullable_values<'de, D>(
    deserializer: D,
) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let map: HashMap<String, Option<String>> = HashMap::deserialize(deserializer)?;
    Ok(map
        .into_iter()
        .map(|(k, v)| (k, v.unwrap_or_default()))
        .collect())
}

pub fn is_default<T: Default + PartialEq>(t: &T) -> bool {
    *t == T::default()
}

/// Clamp a duration field to `0` instead of rejecting the payload when a tracer sends a
/// negative value (observed from clock skew between start/finish timestamps).
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer).unwrap_or(0);
    Ok(raw.max(0))
}
