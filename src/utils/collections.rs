//! Collection helpers shared across the crate.

use rustc_hash::FxHashMap;
use serde_json::Value;

/// Fresh map for the extras channel / `NodePartial::extra`.
#[must_use]
pub fn new_extra_map() -> FxHashMap<String, Value> {
    FxHashMap::default()
}
