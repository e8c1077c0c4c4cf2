//! Map Operation Protocol
//!
//! Names and Data Transfer Objects for the operations a distributed map
//! registers on every locality. An operation name is scoped by the map's
//! object id, so several maps coexist in one mesh without colliding.
//!
//! Payloads are JSON values produced from the DTOs below; anything a key or
//! value type cannot serialize cannot cross a locality boundary.

use crate::cluster::types::ObjectId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// --- Operation names ---

/// Insert or overwrite one entry on the owning locality.
pub const OP_INSERT: &str = "insert";
/// Read one entry from the owning locality.
pub const OP_LOOKUP: &str = "lookup";
/// Remove one entry from the owning locality.
pub const OP_ERASE: &str = "erase";
/// Run a registered mutator on one entry at the owning locality.
pub const OP_APPLY: &str = "apply";
/// Report the locality-local entry count.
pub const OP_SIZE: &str = "size";
/// Reset the locality-local map.
pub const OP_CLEAR: &str = "clear";
/// Receive one aggregated insert batch.
pub const OP_FLUSH_RECEIVE: &str = "flush_receive";
/// Ship every pending aggregation buffer of this locality.
pub const OP_FLUSH_ALL: &str = "flush_all";
/// Fan a registered entry visitor over the local buckets.
pub const OP_FOR_EACH_ENTRY: &str = "for_each_entry";
/// Fan a registered key visitor over the local buckets.
pub const OP_FOR_EACH_KEY: &str = "for_each_key";
/// Log every locality-local entry.
pub const OP_PRINT: &str = "print";

/// Iteration handler visiting one bucket chain's entries.
pub const ITER_VISIT_ENTRIES: &str = "visit_entries";
/// Iteration handler visiting one bucket chain's keys.
pub const ITER_VISIT_KEYS: &str = "visit_keys";

/// Builds the per-instance name an operation is registered under.
pub fn op_name(oid: ObjectId, op: &str) -> String {
    format!("hashmap/{}/{}", oid, op)
}

/// Prefix shared by every handler of one map instance; used by the collective
/// release to unregister them all.
pub fn op_prefix(oid: ObjectId) -> String {
    format!("hashmap/{}/", oid)
}

// --- Data Transfer Objects ---

#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(deserialize = "K: DeserializeOwned, V: DeserializeOwned"))]
pub struct InsertRequest<K, V> {
    pub key: K,
    pub value: V,
}

/// Request carrying just a key (lookup, erase).
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(deserialize = "K: DeserializeOwned"))]
pub struct KeyRequest<K> {
    pub key: K,
}

/// Lookup reply. `None` means the key does not exist on its owner.
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(deserialize = "V: DeserializeOwned"))]
pub struct LookupResponse<V> {
    pub value: Option<V>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SizeResponse {
    pub size: usize,
}

/// Apply request: the mutator is identified by its registered name; its extra
/// arguments travel as an opaque JSON value.
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(deserialize = "K: DeserializeOwned"))]
pub struct ApplyRequest<K> {
    pub key: K,
    pub mutator: String,
    pub args: Value,
}

/// Collective visit request: the visitor is identified by its registered
/// name; its extra arguments travel as an opaque JSON value.
#[derive(Debug, Serialize, Deserialize)]
pub struct ForEachRequest {
    pub visitor: String,
    pub args: Value,
}
