//! Per-Locality Operation Handlers
//!
//! The operation set one map instance registers on each locality at creation
//! time. Every handler resolves the locality's own representative through the
//! object registry before touching any state, so a handler never holds a
//! reference into another locality.

use super::map::DistributedMap;
use super::protocol::*;
use crate::buffer::aggregator::FlushBatch;
use crate::cluster::service::ClusterService;
use crate::cluster::types::{LocalityId, ObjectId};

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

fn resolve<K, V>(
    service: &Arc<ClusterService>,
    loc: LocalityId,
    oid: ObjectId,
) -> Result<Arc<DistributedMap<K, V>>>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    service
        .object(loc, oid)
        .ok_or_else(|| anyhow::anyhow!("map {} is not registered on locality {}", oid, loc))
}

/// Registers the full operation set of map `oid` on locality `loc`.
pub(crate) fn register<K, V>(
    service: &Arc<ClusterService>,
    loc: LocalityId,
    oid: ObjectId,
) -> Result<()>
where
    K: Clone + Debug + Eq + Hash + Send + Sync + Serialize + DeserializeOwned + 'static,
    V: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    // --- Point operations ---

    let service_ref = service.clone();
    service.register_handler(loc, &op_name(oid, OP_INSERT), move |payload: Value| {
        let service = service_ref.clone();
        async move {
            let request: InsertRequest<K, V> = serde_json::from_value(payload)?;
            let view = resolve::<K, V>(&service, loc, oid)?;
            view.local.insert(request.key, request.value);
            Ok(Value::Null)
        }
    })?;

    let service_ref = service.clone();
    service.register_handler(loc, &op_name(oid, OP_LOOKUP), move |payload: Value| {
        let service = service_ref.clone();
        async move {
            let request: KeyRequest<K> = serde_json::from_value(payload)?;
            let view = resolve::<K, V>(&service, loc, oid)?;
            let response = LookupResponse {
                value: view.local.lookup(&request.key),
            };
            Ok(serde_json::to_value(response)?)
        }
    })?;

    let service_ref = service.clone();
    service.register_handler(loc, &op_name(oid, OP_ERASE), move |payload: Value| {
        let service = service_ref.clone();
        async move {
            let request: KeyRequest<K> = serde_json::from_value(payload)?;
            let view = resolve::<K, V>(&service, loc, oid)?;
            view.local.erase(&request.key);
            Ok(Value::Null)
        }
    })?;

    let service_ref = service.clone();
    service.register_handler(loc, &op_name(oid, OP_APPLY), move |payload: Value| {
        let service = service_ref.clone();
        async move {
            let request: ApplyRequest<K> = serde_json::from_value(payload)?;
            let view = resolve::<K, V>(&service, loc, oid)?;
            view.apply_local(&request.key, &request.mutator, &request.args)?;
            Ok(Value::Null)
        }
    })?;

    // --- Collectives ---

    let service_ref = service.clone();
    service.register_handler(loc, &op_name(oid, OP_SIZE), move |_payload: Value| {
        let service = service_ref.clone();
        async move {
            let view = resolve::<K, V>(&service, loc, oid)?;
            Ok(serde_json::to_value(SizeResponse {
                size: view.local.len(),
            })?)
        }
    })?;

    let service_ref = service.clone();
    service.register_handler(loc, &op_name(oid, OP_CLEAR), move |_payload: Value| {
        let service = service_ref.clone();
        async move {
            let view = resolve::<K, V>(&service, loc, oid)?;
            view.local.clear();
            tracing::debug!("locality {}: map {} cleared", loc, oid);
            Ok(Value::Null)
        }
    })?;

    let service_ref = service.clone();
    service.register_handler(loc, &op_name(oid, OP_PRINT), move |_payload: Value| {
        let service = service_ref.clone();
        async move {
            let view = resolve::<K, V>(&service, loc, oid)?;
            let mut count = 0usize;
            view.local.for_each_entry(|key, value| {
                tracing::info!("locality {}: {:?} => {:?}", loc, key, value);
                count += 1;
            });
            tracing::info!("locality {}: {} entries", loc, count);
            Ok(Value::Null)
        }
    })?;

    // --- Buffered inserts ---

    let service_ref = service.clone();
    service.register_handler(loc, &op_name(oid, OP_FLUSH_RECEIVE), move |payload: Value| {
        let service = service_ref.clone();
        async move {
            let batch: FlushBatch<K, V> = serde_json::from_value(payload)?;
            let view = resolve::<K, V>(&service, loc, oid)?;
            tracing::debug!(
                "locality {}: applying batch of {} buffered inserts",
                loc,
                batch.entries.len()
            );
            for entry in batch.entries {
                view.local.insert(entry.key, entry.value);
            }
            Ok(Value::Null)
        }
    })?;

    let service_ref = service.clone();
    service.register_handler(loc, &op_name(oid, OP_FLUSH_ALL), move |_payload: Value| {
        let service = service_ref.clone();
        async move {
            let view = resolve::<K, V>(&service, loc, oid)?;
            view.buffers.flush_all().await?;
            Ok(Value::Null)
        }
    })?;

    // --- Parallel iteration ---
    //
    // The collective handler validates the visitor name, then fans the
    // iteration handler over this locality's bucket chains.

    let service_ref = service.clone();
    service.register_handler(loc, &op_name(oid, OP_FOR_EACH_ENTRY), move |payload: Value| {
        let service = service_ref.clone();
        async move {
            let request: ForEachRequest = serde_json::from_value(payload.clone())?;
            let view = resolve::<K, V>(&service, loc, oid)?;
            if !view.entry_visitors.contains_key(&request.visitor) {
                anyhow::bail!("unknown entry visitor: {}", request.visitor);
            }
            service
                .for_each_at(
                    loc,
                    &op_name(oid, ITER_VISIT_ENTRIES),
                    payload,
                    view.local.num_buckets(),
                )
                .await?;
            Ok(Value::Null)
        }
    })?;

    let service_ref = service.clone();
    service.register_handler(loc, &op_name(oid, OP_FOR_EACH_KEY), move |payload: Value| {
        let service = service_ref.clone();
        async move {
            let request: ForEachRequest = serde_json::from_value(payload.clone())?;
            let view = resolve::<K, V>(&service, loc, oid)?;
            if !view.key_visitors.contains_key(&request.visitor) {
                anyhow::bail!("unknown key visitor: {}", request.visitor);
            }
            service
                .for_each_at(
                    loc,
                    &op_name(oid, ITER_VISIT_KEYS),
                    payload,
                    view.local.num_buckets(),
                )
                .await?;
            Ok(Value::Null)
        }
    })?;

    let service_ref = service.clone();
    service.register_iter_handler(
        loc,
        &op_name(oid, ITER_VISIT_ENTRIES),
        move |index: usize, payload: &Value| {
            let request: ForEachRequest = serde_json::from_value(payload.clone())?;
            let view = resolve::<K, V>(&service_ref, loc, oid)?;
            let visitor = *view
                .entry_visitors
                .get(&request.visitor)
                .ok_or_else(|| anyhow::anyhow!("unknown entry visitor: {}", request.visitor))?;
            view.local
                .visit_bucket(index, |key, value| visitor(key, value, &request.args));
            Ok(())
        },
    )?;

    let service_ref = service.clone();
    service.register_iter_handler(
        loc,
        &op_name(oid, ITER_VISIT_KEYS),
        move |index: usize, payload: &Value| {
            let request: ForEachRequest = serde_json::from_value(payload.clone())?;
            let view = resolve::<K, V>(&service_ref, loc, oid)?;
            let visitor = *view
                .key_visitors
                .get(&request.visitor)
                .ok_or_else(|| anyhow::anyhow!("unknown key visitor: {}", request.visitor))?;
            view.local
                .visit_bucket(index, |key, _value| visitor(key, &request.args));
            Ok(())
        },
    )?;

    Ok(())
}
