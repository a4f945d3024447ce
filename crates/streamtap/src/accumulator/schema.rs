//! Merge rules for an accumulator tree
//!
//! A schema is declared once, when the tree is built, and decides how each
//! key of every later fragment is merged. Keys the schema does not mention
//! are inferred from the first non-null value that arrives for them.

use std::collections::BTreeMap;

use serde_json::Value;

/// Field carrying the slot number of an indexed fragment
pub const INDEX_KEY: &str = "index";

/// How a single field accumulates
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    /// Last non-null value wins
    Scalar,
    /// String fragments are appended in arrival order
    Text,
    /// Named children, each merged by its own rule
    Map(MapSchema),
    /// Children addressed by the `index` field of each element
    IndexedList(Box<Schema>),
}

impl Schema {
    pub fn scalar() -> Self {
        Schema::Scalar
    }

    pub fn text() -> Self {
        Schema::Text
    }

    /// Indexed list whose slots are built from `element`
    pub fn indexed(element: impl Into<Schema>) -> Self {
        Schema::IndexedList(Box::new(element.into()))
    }

    /// Pick a rule for a key the schema never declared.
    ///
    /// Objects become dynamic maps, arrays of index-bearing objects become
    /// indexed lists (keeping `index` in each slot), anything else is scalar.
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Object(_) => Schema::Map(MapSchema::new()),
            Value::Array(items) if is_index_bearing(items) => {
                Schema::indexed(MapSchema::new().field(INDEX_KEY, Schema::Scalar))
            }
            _ => Schema::Scalar,
        }
    }
}

impl From<MapSchema> for Schema {
    fn from(map: MapSchema) -> Self {
        Schema::Map(map)
    }
}

fn is_index_bearing(items: &[Value]) -> bool {
    !items.is_empty()
        && items
            .iter()
            .all(|item| item.as_object().is_some_and(|obj| obj.contains_key(INDEX_KEY)))
}

/// Declared children of a map node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapSchema {
    fields: BTreeMap<String, Schema>,
    aliases: BTreeMap<String, String>,
}

impl MapSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the merge rule for `name`
    pub fn field(mut self, name: impl Into<String>, schema: impl Into<Schema>) -> Self {
        self.fields.insert(name.into(), schema.into());
        self
    }

    /// Merge incoming `from` keys as if they were named `to`
    pub fn alias(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.aliases.insert(from.into(), to.into());
        self
    }

    /// Declared rule for `name`, if any
    pub fn get(&self, name: &str) -> Option<&Schema> {
        self.fields.get(name)
    }

    pub fn declares(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Resolve an incoming key through the alias table
    pub fn canonical<'a>(&'a self, key: &'a str) -> &'a str {
        self.aliases.get(key).map(String::as_str).unwrap_or(key)
    }
}
