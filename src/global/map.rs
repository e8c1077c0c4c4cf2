use super::handlers;
use super::partition::Partitioner;
use super::protocol::*;
use crate::buffer::aggregator::InsertAggregator;
use crate::cluster::handle::{Handle, ReturnSlot};
use crate::cluster::service::ClusterService;
use crate::cluster::types::{LocalityId, ObjectId};
use crate::local::bucket::Entry;
use crate::local::map::{InsertPolicy, KeyEq, LocalMap, default_key_eq, overwrite};

use anyhow::Result;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

/// Entry visitor for collective iteration: `(key, value, args)`.
pub type EntryVisitor<K, V> = fn(&K, &V, &Value);

/// Key visitor for collective iteration: `(key, args)`.
pub type KeyVisitor<K> = fn(&K, &Value);

/// Per-entry mutator for apply: `(key, value, args)`, run under the entry's
/// chain lock on the owning locality.
pub type Mutator<K, V> = fn(&K, &mut V, &Value);

/// The distributed, thread-safe hashmap.
///
/// One instance of this struct exists per locality, all sharing the same
/// object id; each instance is the façade for callers on its home locality.
/// Operations on keys the home locality owns short-circuit to the local map,
/// everything else is dispatched through the mesh.
///
/// User callables (visitors, mutators, key equality, insertion policy) are
/// plain function pointers registered under a name on every locality, because
/// only the name and value-copyable arguments cross locality boundaries.
pub struct DistributedMap<K, V> {
    oid: ObjectId,
    home: LocalityId,
    service: Arc<ClusterService>,
    partitioner: Partitioner,
    pub(crate) local: Arc<LocalMap<K, V>>,
    pub(crate) buffers: InsertAggregator<K, V>,
    pub(crate) entry_visitors: DashMap<String, EntryVisitor<K, V>>,
    pub(crate) key_visitors: DashMap<String, KeyVisitor<K>>,
    pub(crate) mutators: DashMap<String, Mutator<K, V>>,
}

impl<K, V> DistributedMap<K, V>
where
    K: Clone + Debug + Eq + Hash + Send + Sync + Serialize + DeserializeOwned + 'static,
    V: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    /// Collective factory: allocates a local map on every locality, registers
    /// the per-locality representatives and their operation handlers under a
    /// fresh object id, and returns the representative of locality 0.
    ///
    /// `expected_entries` sizes each locality's bucket table; the tables never
    /// resize afterwards.
    pub fn create(service: &Arc<ClusterService>, expected_entries: usize) -> Result<Arc<Self>> {
        Self::create_with(service, expected_entries, default_key_eq, overwrite)
    }

    /// As [`create`](Self::create), with custom key equality and insertion
    /// policy. Both are plain function pointers, installed identically on
    /// every locality.
    pub fn create_with(
        service: &Arc<ClusterService>,
        expected_entries: usize,
        key_eq: KeyEq<K>,
        policy: InsertPolicy<V>,
    ) -> Result<Arc<Self>> {
        let oid = ObjectId::new();
        let partitioner = Partitioner::new(service.num_localities());
        let mut origin: Option<Arc<Self>> = None;

        for loc in service.localities() {
            let view = Arc::new(Self {
                oid,
                home: loc,
                service: service.clone(),
                partitioner,
                local: Arc::new(LocalMap::with_policy(expected_entries, key_eq, policy)),
                buffers: InsertAggregator::new(service.clone(), op_name(oid, OP_FLUSH_RECEIVE)),
                entry_visitors: DashMap::new(),
                key_visitors: DashMap::new(),
                mutators: DashMap::new(),
            });

            service.register_object(loc, oid, view.clone())?;
            handlers::register::<K, V>(service, loc, oid)?;

            origin.get_or_insert(view);
        }

        tracing::info!(
            "created distributed map {} across {} localities",
            oid,
            service.num_localities()
        );

        origin.ok_or_else(|| anyhow::anyhow!("mesh has no localities"))
    }

    /// Resolves the representative of map `oid` on `loc`.
    pub fn get_ptr(
        service: &Arc<ClusterService>,
        loc: LocalityId,
        oid: ObjectId,
    ) -> Option<Arc<Self>> {
        service.object(loc, oid)
    }

    /// Collective release: unregisters every representative and handler of
    /// map `oid` from every locality.
    pub fn destroy(service: &Arc<ClusterService>, oid: ObjectId) -> Result<()> {
        for loc in service.localities() {
            service.remove_handlers(loc, &op_prefix(oid))?;
            service.remove_object(loc, oid)?;
        }

        tracing::info!("destroyed distributed map {}", oid);
        Ok(())
    }

    /// The identifier this map is registered under on every locality.
    pub fn global_id(&self) -> ObjectId {
        self.oid
    }

    /// The locality this representative serves.
    pub fn home(&self) -> LocalityId {
        self.home
    }

    /// The owning locality of `key`.
    pub fn owner_of(&self, key: &K) -> LocalityId {
        self.partitioner.owner_of(key)
    }

    // --- Point operations ---

    /// Inserts a key-value pair; a duplicate key is resolved by the insertion
    /// policy on the owning locality.
    pub async fn insert(&self, key: K, value: V) -> Result<()> {
        let target = self.owner_of(&key);
        if target == self.home {
            self.local.insert(key, value);
            return Ok(());
        }

        let payload = serde_json::to_value(InsertRequest { key, value })?;
        self.service
            .execute_at(target, &op_name(self.oid, OP_INSERT), payload)
            .await?;
        Ok(())
    }

    /// Asynchronous insert: returns once the operation is enqueued; completion
    /// is tracked by `handle`.
    pub fn async_insert(&self, handle: &Handle, key: K, value: V) -> Result<()> {
        let target = self.owner_of(&key);
        let payload = serde_json::to_value(InsertRequest { key, value })?;
        self.service
            .async_execute_at(handle, target, &op_name(self.oid, OP_INSERT), payload)
    }

    pub async fn lookup(&self, key: &K) -> Result<Option<V>> {
        let target = self.owner_of(key);
        if target == self.home {
            return Ok(self.local.lookup(key));
        }

        tracing::debug!("lookup: fetching from owning locality {}", target);
        let payload = serde_json::to_value(KeyRequest { key: key.clone() })?;
        let response: LookupResponse<V> = self
            .service
            .execute_at_with_ret(target, &op_name(self.oid, OP_LOOKUP), payload)
            .await?;
        Ok(response.value)
    }

    /// Asynchronous lookup: the reply lands in `slot`, which is valid once
    /// `handle` has been waited on.
    pub fn async_lookup(
        &self,
        handle: &Handle,
        key: &K,
        slot: ReturnSlot<LookupResponse<V>>,
    ) -> Result<()> {
        let target = self.owner_of(key);
        let payload = serde_json::to_value(KeyRequest { key: key.clone() })?;
        self.service.async_execute_at_with_ret(
            handle,
            target,
            &op_name(self.oid, OP_LOOKUP),
            payload,
            slot,
        )
    }

    /// Removes a key. Absent keys are a silent no-op.
    pub async fn erase(&self, key: &K) -> Result<()> {
        let target = self.owner_of(key);
        if target == self.home {
            self.local.erase(key);
            return Ok(());
        }

        let payload = serde_json::to_value(KeyRequest { key: key.clone() })?;
        self.service
            .execute_at(target, &op_name(self.oid, OP_ERASE), payload)
            .await?;
        Ok(())
    }

    pub fn async_erase(&self, handle: &Handle, key: &K) -> Result<()> {
        let target = self.owner_of(key);
        let payload = serde_json::to_value(KeyRequest { key: key.clone() })?;
        self.service
            .async_execute_at(handle, target, &op_name(self.oid, OP_ERASE), payload)
    }

    /// Runs the registered mutator `mutator` on the entry for `key`, under
    /// the entry's chain lock on the owning locality. Absent keys are a
    /// no-op; an unregistered mutator name is an error.
    pub async fn apply(&self, key: &K, mutator: &str, args: Value) -> Result<()> {
        let target = self.owner_of(key);
        if target == self.home {
            return self.apply_local(key, mutator, &args);
        }

        let payload = serde_json::to_value(ApplyRequest {
            key: key.clone(),
            mutator: mutator.to_string(),
            args,
        })?;
        self.service
            .execute_at(target, &op_name(self.oid, OP_APPLY), payload)
            .await?;
        Ok(())
    }

    pub fn async_apply(&self, handle: &Handle, key: &K, mutator: &str, args: Value) -> Result<()> {
        let target = self.owner_of(key);
        let payload = serde_json::to_value(ApplyRequest {
            key: key.clone(),
            mutator: mutator.to_string(),
            args,
        })?;
        self.service
            .async_execute_at(handle, target, &op_name(self.oid, OP_APPLY), payload)
    }

    pub(crate) fn apply_local(&self, key: &K, mutator: &str, args: &Value) -> Result<()> {
        let mutator_fn = *self
            .mutators
            .get(mutator)
            .ok_or_else(|| anyhow::anyhow!("unknown mutator: {}", mutator))?;
        self.local.apply(key, |k, v| mutator_fn(k, v, args));
        Ok(())
    }

    // --- Buffered inserts ---

    /// Insert through the aggregation buffers: remote entries accumulate per
    /// destination and ship in batches. Buffered entries become visible only
    /// after the matching [`flush_buffers`](Self::flush_buffers).
    pub async fn buffered_insert(&self, key: K, value: V) -> Result<()> {
        let target = self.owner_of(&key);
        if target == self.home {
            self.local.insert(key, value);
            return Ok(());
        }

        self.buffers.insert(Entry::new(key, value), target).await
    }

    /// Asynchronous buffered insert. Entries are guaranteed visible only
    /// after waiting on `handle` and then calling
    /// [`flush_buffers`](Self::flush_buffers), in this order.
    pub async fn buffered_async_insert(&self, handle: &Handle, key: K, value: V) -> Result<()> {
        let target = self.owner_of(&key);
        if target == self.home {
            self.local.insert(key, value);
            return Ok(());
        }

        self.buffers
            .async_insert(handle, Entry::new(key, value), target)
            .await
    }

    /// Collective finalization of buffered inserts: every locality ships its
    /// pending batches and the call blocks until all are acknowledged.
    pub async fn flush_buffers(&self) -> Result<()> {
        self.service
            .execute_on_all(&op_name(self.oid, OP_FLUSH_ALL), Value::Null)
            .await
    }

    // --- Collectives ---

    /// Total entry count across every locality. A one-to-all reduction; the
    /// result is not linearized against concurrent mutation.
    pub async fn size(&self) -> Result<usize> {
        let mut size = self.local.len();
        for loc in self.service.localities() {
            if loc == self.home {
                continue;
            }
            let response: SizeResponse = self
                .service
                .execute_at_with_ret(loc, &op_name(self.oid, OP_SIZE), Value::Null)
                .await?;
            size += response.size;
        }
        Ok(size)
    }

    /// Collective reset: every locality drops its entries and overflow
    /// chains.
    pub async fn clear(&self) -> Result<()> {
        self.service
            .execute_on_all(&op_name(self.oid, OP_CLEAR), Value::Null)
            .await
    }

    /// Runs the registered entry visitor over every entry on every locality;
    /// each locality parallelizes across its bucket chains. Entries inserted
    /// or erased during the sweep may or may not be visited.
    pub async fn for_each_entry(&self, visitor: &str, args: Value) -> Result<()> {
        let payload = serde_json::to_value(ForEachRequest {
            visitor: visitor.to_string(),
            args,
        })?;
        self.service
            .execute_on_all(&op_name(self.oid, OP_FOR_EACH_ENTRY), payload)
            .await
    }

    pub fn async_for_each_entry(&self, handle: &Handle, visitor: &str, args: Value) -> Result<()> {
        let payload = serde_json::to_value(ForEachRequest {
            visitor: visitor.to_string(),
            args,
        })?;
        self.service
            .async_execute_on_all(handle, &op_name(self.oid, OP_FOR_EACH_ENTRY), payload)
    }

    pub async fn for_each_key(&self, visitor: &str, args: Value) -> Result<()> {
        let payload = serde_json::to_value(ForEachRequest {
            visitor: visitor.to_string(),
            args,
        })?;
        self.service
            .execute_on_all(&op_name(self.oid, OP_FOR_EACH_KEY), payload)
            .await
    }

    pub fn async_for_each_key(&self, handle: &Handle, visitor: &str, args: Value) -> Result<()> {
        let payload = serde_json::to_value(ForEachRequest {
            visitor: visitor.to_string(),
            args,
        })?;
        self.service
            .async_execute_on_all(handle, &op_name(self.oid, OP_FOR_EACH_KEY), payload)
    }

    /// Logs every entry, locality by locality.
    pub async fn print_all_entries(&self) -> Result<()> {
        self.service
            .execute_on_all(&op_name(self.oid, OP_PRINT), Value::Null)
            .await
    }

    // --- Callable registration ---

    /// Installs a named entry visitor on every locality.
    pub fn register_entry_visitor(&self, name: &str, visitor: EntryVisitor<K, V>) -> Result<()> {
        self.for_each_view(|view| {
            view.entry_visitors.insert(name.to_string(), visitor);
        })
    }

    /// Installs a named key visitor on every locality.
    pub fn register_key_visitor(&self, name: &str, visitor: KeyVisitor<K>) -> Result<()> {
        self.for_each_view(|view| {
            view.key_visitors.insert(name.to_string(), visitor);
        })
    }

    /// Installs a named mutator on every locality.
    pub fn register_mutator(&self, name: &str, mutator: Mutator<K, V>) -> Result<()> {
        self.for_each_view(|view| {
            view.mutators.insert(name.to_string(), mutator);
        })
    }

    fn for_each_view(&self, install: impl Fn(&Arc<Self>)) -> Result<()> {
        for loc in self.service.localities() {
            let view: Arc<Self> = self.service.object(loc, self.oid).ok_or_else(|| {
                anyhow::anyhow!("map {} is not registered on locality {}", self.oid, loc)
            })?;
            install(&view);
        }
        Ok(())
    }

    // --- Local observation ---

    /// Entry count of this locality's share alone.
    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    /// Reads a key from this locality's share only, ignoring ownership.
    pub fn local_lookup(&self, key: &K) -> Option<V> {
        self.local.lookup(key)
    }
}
