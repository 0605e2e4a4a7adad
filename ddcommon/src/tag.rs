// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt::{Debug, Display, Formatter};

/// A `key:value` metric tag. Cheap to clone when built from a static string.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag {
    value: Cow<'static, str>,
}

impl Tag {
    /// Used by the `tag!` macro, not meant to be called directly.
    /// # Safety
    /// Callers must ensure `value` is a valid `key:value` tag; the macro
    /// enforces this at compile time.
    pub const unsafe fn from_static_unchecked(value: &'static str) -> Self {
        Self {
            value: Cow::Borrowed(value),
        }
    }

    /// Builds a tag from a key/value pair known only at runtime.
    pub fn new(key: &str, value: &str) -> Result<Self, &'static str> {
        if key.is_empty() {
            return Err("tag key must not be empty");
        }
        if value.is_empty() {
            return Err("tag value must not be empty");
        }
        Ok(Self {
            value: Cow::Owned(format!("{key}:{value}")),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl AsRef<str> for Tag {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

impl Debug for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Tag").field(&self.value).finish()
    }
}

/// Builds a [`Tag`] from a key and value known at compile time.
#[macro_export]
macro_rules! tag {
    ($key:expr, $val:expr) => {{
        const COMBINED: &str = concat!($key, ":", $val);
        // SAFETY: COMBINED is a non-empty, colon-joined literal.
        unsafe { $crate::tag::Tag::from_static_unchecked(COMBINED) }
    }};
}
