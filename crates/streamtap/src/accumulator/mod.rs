//! Incremental reconstruction of a streamed response
//!
//! A [`DeltaAccumulator`] owns a tree of merge nodes (scalar, text, map and
//! indexed list) shaped by a [`MapSchema`]. Each parsed chunk is merged into
//! the tree as it arrives; [`DeltaAccumulator::materialize`] renders the best
//! reconstruction of everything seen so far.

mod node;
mod schema;

pub use schema::{INDEX_KEY, MapSchema, Schema};

use serde_json::Value;
use tracing::{trace, warn};

use crate::error::MergeError;
use node::MapNode;

/// Merges a sequence of partial fragments into one structured value.
///
/// Each streaming call owns its own accumulator; nothing here is shared.
#[derive(Debug, Clone)]
pub struct DeltaAccumulator {
    root: MapNode,
    chunks: usize,
    suppressed: bool,
}

impl DeltaAccumulator {
    /// Create an empty accumulator whose root follows `schema`
    pub fn new(schema: MapSchema) -> Self {
        Self {
            root: MapNode::new(schema),
            chunks: 0,
            suppressed: false,
        }
    }

    /// Accumulator with no declared fields; every key is inferred
    pub fn dynamic() -> Self {
        Self::new(MapSchema::new())
    }

    /// Ignore every chunk when `suppressed` is set
    pub fn suppressed(mut self, suppressed: bool) -> Self {
        self.suppressed = suppressed;
        self
    }

    /// Merge one parsed chunk.
    ///
    /// Malformed fragments are logged and dropped; whatever parts of the
    /// fragment did fit are still merged.
    pub fn process_chunk(&mut self, fragment: &Value) {
        if let Err(e) = self.try_process_chunk(fragment) {
            warn!(
                error_type = "accumulator",
                error_message = %e,
                chunk = self.chunks,
                "Malformed stream chunk, continuing"
            );
        }
    }

    /// Like [`process_chunk`](Self::process_chunk) but reports the first
    /// merge failure instead of logging it.
    pub fn try_process_chunk(&mut self, fragment: &Value) -> Result<(), MergeError> {
        if self.suppressed {
            return Ok(());
        }

        self.chunks += 1;
        trace!(chunk = self.chunks, "Merging stream chunk");
        self.root.merge(fragment)
    }

    /// Current reconstruction, or `None` if no chunk was ever processed.
    ///
    /// Side-effect free; a chunked stream that produced nothing observable
    /// materializes as an empty object, not `None`.
    pub fn materialize(&self) -> Option<Value> {
        if self.chunks == 0 {
            return None;
        }
        Some(self.root.materialize())
    }

    /// Number of chunks offered to the accumulator
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }
}

impl Default for DeltaAccumulator {
    fn default() -> Self {
        Self::dynamic()
    }
}
