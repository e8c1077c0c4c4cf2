use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a single locality in the mesh.
///
/// Localities are numbered densely from zero, so the id doubles as an index
/// into the locality table. The count is fixed when the mesh starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalityId(pub u32);

impl fmt::Display for LocalityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally agreed identifier for a distributed object.
///
/// The collective factory generates one id and registers a per-locality
/// representative under it on every locality, so the same id resolves to the
/// local representative wherever a handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(uuid::Uuid);

impl ObjectId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
