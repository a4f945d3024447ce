//! Attribute extraction from a materialized response
//!
//! Vendor-specific extractors live with the instrumentation that knows the
//! vendor's field names. [`FlattenExtractor`] is the generic fallback.

use serde_json::Value;

use crate::error::Result;
use crate::span::AttributeValue;

/// Attributes split by priority.
///
/// `core` is attached first and is never the tier that gets dropped when the
/// span runs out of attribute slots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeTiers {
    pub core: Vec<(String, AttributeValue)>,
    pub extra: Vec<(String, AttributeValue)>,
}

impl AttributeTiers {
    pub fn len(&self) -> usize {
        self.core.len() + self.extra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.is_empty() && self.extra.is_empty()
    }
}

/// Turns the reconstructed response into span attributes.
pub trait AttributeExtractor: Send {
    /// `response` is `None` when the stream never produced a chunk.
    fn extract(&self, response: Option<&Value>) -> Result<AttributeTiers>;
}

/// Flattens the response into dotted attribute keys.
///
/// The serialized response is always core (`output.value`,
/// `output.mime_type`); configured core paths are promoted out of the extra
/// tier.
#[derive(Debug, Clone)]
pub struct FlattenExtractor {
    prefix: String,
    core_paths: Vec<String>,
}

impl FlattenExtractor {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            core_paths: Vec::new(),
        }
    }

    /// Promote `path` (and everything below it) to the core tier
    pub fn core_path(mut self, path: impl Into<String>) -> Self {
        self.core_paths.push(path.into());
        self
    }

    fn is_core(&self, path: &str) -> bool {
        self.core_paths.iter().any(|core| {
            path == core
                || path
                    .strip_prefix(core.as_str())
                    .is_some_and(|rest| rest.starts_with('.'))
        })
    }

    fn key_for(&self, path: &str) -> String {
        if self.prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}.{}", self.prefix, path)
        }
    }
}

impl Default for FlattenExtractor {
    fn default() -> Self {
        Self::new("llm.output")
    }
}

impl AttributeExtractor for FlattenExtractor {
    fn extract(&self, response: Option<&Value>) -> Result<AttributeTiers> {
        let mut tiers = AttributeTiers::default();
        let Some(response) = response else {
            return Ok(tiers);
        };

        tiers.core.push((
            "output.value".to_string(),
            AttributeValue::String(serde_json::to_string(response)?),
        ));
        tiers
            .core
            .push(("output.mime_type".to_string(), "application/json".into()));

        let mut flat = Vec::new();
        flatten(response, String::new(), &mut flat);

        for (path, value) in flat {
            let entry = (self.key_for(&path), value);
            if self.is_core(&path) {
                tiers.core.push(entry);
            } else {
                tiers.extra.push(entry);
            }
        }

        Ok(tiers)
    }
}

fn flatten(value: &Value, path: String, out: &mut Vec<(String, AttributeValue)>) {
    let join = |segment: &str| {
        if path.is_empty() {
            segment.to_string()
        } else {
            format!("{path}.{segment}")
        }
    };

    match value {
        Value::Object(fields) => {
            for (key, child) in fields {
                flatten(child, join(key), out);
            }
        }
        Value::Array(items) => {
            for (position, child) in items.iter().enumerate() {
                flatten(child, join(&position.to_string()), out);
            }
        }
        primitive => {
            if let Some(attribute) = AttributeValue::from_json(primitive) {
                out.push((path, attribute));
            }
        }
    }
}
