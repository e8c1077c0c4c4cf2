//! Distributed Hashmap Library
//!
//! This library crate implements a distributed, thread-safe associative
//! container: entries are partitioned across a fixed set of cooperating
//! localities, and operations may be issued synchronously or asynchronously
//! against the global view.
//!
//! ## Architecture Modules
//! The system is composed of four loosely coupled subsystems:
//!
//! - **`cluster`**: The execution substrate. An in-process locality mesh with
//!   per-locality message dispatch, named operation handlers, an object
//!   registry, and join-only completion handles for asynchronous work.
//! - **`local`**: The node-local storage engine. A bucket-chained concurrent
//!   hashmap with fixed table size, inline slots, per-chain locking, and
//!   on-demand overflow buckets.
//! - **`buffer`**: The write-aggregation layer. Batches cross-locality inserts
//!   per destination and ships them in bulk, with explicit flush semantics
//!   coupled to completion handles.
//! - **`global`**: The façade. Maps every key to its owning locality, routes
//!   operations (direct, dispatched, or buffered), and runs the collectives:
//!   size reduction, clear, and parallel per-bucket iteration.

pub mod buffer;
pub mod cluster;
pub mod global;
pub mod local;
