//! Static API-key check

use std::collections::HashSet;

/// Accepted API keys
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    keys: HashSet<String>,
}

impl ApiKeys {
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            keys: keys
                .into_iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Check an `Authorization` header value: `Bearer <key>` or the bare key
    pub fn authorize(&self, header: Option<&str>) -> bool {
        let Some(value) = header.map(str::trim).filter(|v| !v.is_empty()) else {
            return false;
        };
        let key = match value.split_once(' ') {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
            _ => value,
        };
        self.keys.contains(key)
    }
}
