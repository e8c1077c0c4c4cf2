//! Locality Mesh Module
//!
//! Implements the in-process execution substrate that the distributed map is
//! built on. A fixed set of localities is created at startup; each locality
//! owns an inbox, a registry of named operation handlers, and a registry of
//! shared objects. All cross-locality work travels as messages, never as
//! shared references.
//!
//! ## Core Mechanisms
//! - **Dispatch**: `execute_at` ships a named operation plus a JSON payload to
//!   a target locality and awaits the reply; `async_execute_at` fires the same
//!   message without blocking and tracks completion through a [`handle::Handle`].
//! - **Parallel loops**: `for_each_at` runs a registered iteration handler over
//!   an index range, chunked across worker tasks on the target locality.
//! - **Object registry**: collective data structures register one
//!   representative per locality under a shared [`types::ObjectId`]; handlers
//!   resolve the representative through the registry at execution time.

pub mod handle;
pub mod registry;
pub mod service;
pub mod types;

#[cfg(test)]
mod tests;
