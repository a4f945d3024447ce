//! Accumulator tree nodes

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::schema::{INDEX_KEY, MapSchema, Schema};
use crate::error::MergeError;

/// One node of the accumulator tree, built from its declared [`Schema`].
#[derive(Debug, Clone)]
pub(crate) enum Node {
    Scalar(Option<Value>),
    Text(String),
    Map(MapNode),
    IndexedList(IndexedListNode),
}

impl Node {
    pub(crate) fn new(schema: &Schema) -> Self {
        match schema {
            Schema::Scalar => Node::Scalar(None),
            Schema::Text => Node::Text(String::new()),
            Schema::Map(map) => Node::Map(MapNode::new(map.clone())),
            Schema::IndexedList(element) => {
                Node::IndexedList(IndexedListNode::new(element.as_ref().clone()))
            }
        }
    }

    /// Merge one fragment value. A null value is always a no-op.
    pub(crate) fn merge(&mut self, value: &Value) -> Result<(), MergeError> {
        if value.is_null() {
            return Ok(());
        }

        match self {
            Node::Scalar(current) => {
                *current = Some(value.clone());
                Ok(())
            }
            Node::Text(buffer) => match value {
                Value::String(fragment) => {
                    buffer.push_str(fragment);
                    Ok(())
                }
                other => Err(MergeError::mismatch("string", kind_of(other))),
            },
            Node::Map(map) => map.merge(value),
            Node::IndexedList(list) => list.merge(value),
        }
    }

    /// Merge the fields of an indexed element, leaving out `skip`.
    fn merge_element(
        &mut self,
        fields: &Map<String, Value>,
        skip: Option<&str>,
    ) -> Result<(), MergeError> {
        match self {
            Node::Map(map) => map.merge_fields(fields, skip),
            other => {
                let stripped: Map<String, Value> = fields
                    .iter()
                    .filter(|(key, _)| Some(key.as_str()) != skip)
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                other.merge(&Value::Object(stripped))
            }
        }
    }

    pub(crate) fn materialize(&self) -> Value {
        match self {
            Node::Scalar(current) => current.clone().unwrap_or(Value::Null),
            Node::Text(buffer) => Value::String(buffer.clone()),
            Node::Map(map) => map.materialize(),
            Node::IndexedList(list) => list.materialize(),
        }
    }
}

/// Named children, created lazily as keys first appear.
#[derive(Debug, Clone)]
pub(crate) struct MapNode {
    schema: MapSchema,
    children: BTreeMap<String, Node>,
}

impl MapNode {
    pub(crate) fn new(schema: MapSchema) -> Self {
        Self {
            schema,
            children: BTreeMap::new(),
        }
    }

    pub(crate) fn merge(&mut self, value: &Value) -> Result<(), MergeError> {
        match value {
            Value::Object(fields) => self.merge_fields(fields, None),
            other => Err(MergeError::mismatch("object", kind_of(other))),
        }
    }

    /// Route every non-null field into its child. A failing field does not
    /// stop its siblings from merging; the first failure is returned.
    fn merge_fields(
        &mut self,
        fields: &Map<String, Value>,
        skip: Option<&str>,
    ) -> Result<(), MergeError> {
        let mut first_error = None;

        for (key, incoming) in fields {
            if incoming.is_null() || Some(key.as_str()) == skip {
                continue;
            }

            let key = self.schema.canonical(key);
            // an undeclared key is inferred from its first non-vacant value
            if is_vacant(incoming) && !self.schema.declares(key) && !self.children.contains_key(key)
            {
                continue;
            }

            let child = self.children.entry(key.to_string()).or_insert_with(|| {
                let schema = self
                    .schema
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| Schema::infer(incoming));
                Node::new(&schema)
            });

            if let Err(e) = child.merge(incoming) {
                first_error.get_or_insert(e.within(key));
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Object of every child with observable content.
    pub(crate) fn materialize(&self) -> Value {
        let mut out = Map::new();
        for (key, child) in &self.children {
            let value = child.materialize();
            if !is_vacant(&value) {
                out.insert(key.clone(), value);
            }
        }
        Value::Object(out)
    }
}

/// Slots addressed by the `index` field of each incoming element.
#[derive(Debug, Clone)]
pub(crate) struct IndexedListNode {
    element: Schema,
    keep_index: bool,
    slots: BTreeMap<u64, Node>,
}

impl IndexedListNode {
    pub(crate) fn new(element: Schema) -> Self {
        let keep_index = matches!(&element, Schema::Map(map) if map.declares(INDEX_KEY));
        Self {
            element,
            keep_index,
            slots: BTreeMap::new(),
        }
    }

    pub(crate) fn merge(&mut self, value: &Value) -> Result<(), MergeError> {
        let Value::Array(items) = value else {
            return Err(MergeError::mismatch("array", kind_of(value)));
        };

        let mut first_error = None;

        for (position, item) in items.iter().enumerate() {
            let Value::Object(fields) = item else {
                first_error.get_or_insert(
                    MergeError::mismatch("object", kind_of(item)).within(position.to_string()),
                );
                continue;
            };

            let index = match fields.get(INDEX_KEY) {
                None | Some(Value::Null) => 0,
                Some(raw) => match raw.as_u64() {
                    Some(index) => index,
                    None => {
                        first_error.get_or_insert(
                            MergeError::mismatch("non-negative integer", kind_of(raw))
                                .within(INDEX_KEY)
                                .within(position.to_string()),
                        );
                        continue;
                    }
                },
            };

            let slot = self
                .slots
                .entry(index)
                .or_insert_with(|| Node::new(&self.element));
            let skip = (!self.keep_index).then_some(INDEX_KEY);

            if let Err(e) = slot.merge_element(fields, skip) {
                first_error.get_or_insert(e.within(index.to_string()));
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Slots in index order. Map slots always survive once addressed; any
    /// other slot needs observable content.
    pub(crate) fn materialize(&self) -> Value {
        Value::Array(
            self.slots
                .values()
                .map(Node::materialize)
                .filter(|value| value.is_object() || !is_vacant(value))
                .collect(),
        )
    }
}

/// Null, empty string, empty array or empty object.
pub(crate) fn is_vacant(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_keeps_last_non_null_value() {
        let mut node = Node::new(&Schema::Scalar);
        node.merge(&json!("first")).unwrap();
        node.merge(&json!("second")).unwrap();
        node.merge(&Value::Null).unwrap();
        assert_eq!(node.materialize(), json!("second"));
    }

    #[test]
    fn text_appends_in_arrival_order() {
        let mut node = Node::new(&Schema::Text);
        for fragment in ["Hel", "", "lo"] {
            node.merge(&json!(fragment)).unwrap();
        }
        assert_eq!(node.materialize(), json!("Hello"));
    }

    #[test]
    fn text_rejects_non_string_fragment() {
        let mut node = Node::new(&Schema::Text);
        node.merge(&json!("A")).unwrap();
        let err = node.merge(&json!(7)).unwrap_err();
        assert_eq!(err.expected, "string");
        assert_eq!(err.found, "number");
        assert_eq!(node.materialize(), json!("A"));
    }

    #[test]
    fn map_omits_vacant_children() {
        let schema = MapSchema::new().field("content", Schema::Text);
        let mut node = MapNode::new(schema);
        node.merge(&json!({"content": "", "tags": [], "meta": {}, "extra": null}))
            .unwrap();
        assert_eq!(node.materialize(), json!({}));
    }

    #[test]
    fn map_continues_past_a_failing_field() {
        let schema = MapSchema::new().field("content", Schema::Text);
        let mut node = MapNode::new(schema);
        let err = node
            .merge(&json!({"content": 1, "role": "assistant"}))
            .unwrap_err();
        assert_eq!(err.path(), "content");
        assert_eq!(node.materialize(), json!({"role": "assistant"}));
    }

    #[test]
    fn indexed_list_strips_undeclared_index() {
        let mut node = IndexedListNode::new(Schema::Map(MapSchema::new()));
        node.merge(&json!([{"index": 1, "a": 1}, {"a": 0}])).unwrap();
        assert_eq!(node.materialize(), json!([{"a": 0}, {"a": 1}]));
    }

    #[test]
    fn indexed_list_keeps_declared_index() {
        let element = MapSchema::new().field(INDEX_KEY, Schema::Scalar);
        let mut node = IndexedListNode::new(Schema::Map(element));
        node.merge(&json!([{"index": 2, "a": 1}])).unwrap();
        assert_eq!(node.materialize(), json!([{"index": 2, "a": 1}]));
    }

    #[test]
    fn indexed_list_skips_bad_elements_but_merges_the_rest() {
        let mut node = IndexedListNode::new(Schema::Map(MapSchema::new()));
        let err = node
            .merge(&json!(["loose", {"index": -1, "a": 1}, {"index": 0, "a": 2}]))
            .unwrap_err();
        assert_eq!(err.path(), "0");
        assert_eq!(node.materialize(), json!([{"a": 2}]));
    }

    #[test]
    fn indexed_list_keeps_addressed_map_slots() {
        let mut node = IndexedListNode::new(Schema::Map(
            MapSchema::new().field("t", Schema::Text),
        ));
        node.merge(&json!([{"index": 3, "t": ""}, {"index": 1, "t": "x"}]))
            .unwrap();
        assert_eq!(node.materialize(), json!([{"t": "x"}, {}]));
    }

    #[test]
    fn indexed_list_drops_vacant_non_map_slots() {
        let mut node = IndexedListNode::new(Schema::Text);
        assert!(node.merge(&json!([{"index": 0, "t": "x"}])).is_err());
        assert_eq!(node.materialize(), json!([]));
    }
}
