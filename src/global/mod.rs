//! Distributed Hashmap Module
//!
//! The global façade over the per-locality maps.
//!
//! ## Core Concepts
//! - **Partitioning**: every key has exactly one owning locality, chosen by
//!   hashing the key modulo the locality count fixed at creation.
//! - **Dispatch**: operations on locally-owned keys go straight to the local
//!   map; everything else travels as a named operation through the mesh,
//!   either blocking for the reply, attached to a completion handle, or
//!   aggregated into bulk insert batches.
//! - **Representatives**: the collective factory registers one façade instance
//!   per locality under a shared object id; remote handlers resolve their
//!   local instance through the registry, never through a captured pointer.

pub mod handlers;
pub mod map;
pub mod partition;
pub mod protocol;
