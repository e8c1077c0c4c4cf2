//! Insert Aggregation Module
//!
//! Batches cross-locality inserts to amortize dispatch overhead. Entries bound
//! for the same destination accumulate in a per-destination buffer; a full
//! buffer ships implicitly, and a collective flush forces out whatever is
//! pending. The receiving locality feeds each batched entry into its local
//! map in append order.

pub mod aggregator;

#[cfg(test)]
mod tests;
