//! Shadow-read comparison strategies
//!
//! A comparator decides whether the mock and real payloads for the same
//! request agree. Its verdicts feed the `data_integrity` gate.

use serde_json::Value;

pub trait ShadowComparator: Send + Sync {
    fn name(&self) -> &'static str;

    fn agrees(&self, mock: &Value, real: &Value) -> bool;
}

/// Payloads must be identical
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatch;

impl ShadowComparator for ExactMatch {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn agrees(&self, mock: &Value, real: &Value) -> bool {
        mock == real
    }
}

/// Payloads must match after dropping the listed top-level object fields
///
/// Useful for volatile fields such as timestamps or server-assigned ids.
#[derive(Debug, Clone, Default)]
pub struct IgnoreFields {
    fields: Vec<String>,
}

impl IgnoreFields {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    fn strip(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .filter(|(k, _)| !self.fields.iter().any(|f| f == *k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

impl ShadowComparator for IgnoreFields {
    fn name(&self) -> &'static str {
        "ignore_fields"
    }

    fn agrees(&self, mock: &Value, real: &Value) -> bool {
        self.strip(mock) == self.strip(real)
    }
}
