use crate::cluster::handle::Handle;
use crate::cluster::service::ClusterService;
use crate::cluster::types::LocalityId;
use crate::local::bucket::Entry;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::Mutex;

/// High-water mark of a destination buffer: reaching it triggers an implicit
/// flush of that buffer.
pub const BUFFER_CAPACITY: usize = 256;

/// Wire format of one shipped batch. The receiver inserts the entries into
/// its local map in the order they appear.
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(deserialize = "K: DeserializeOwned, V: DeserializeOwned"))]
pub struct FlushBatch<K, V> {
    pub entries: Vec<Entry<K, V>>,
}

/// Per-destination aggregation buffers for cross-locality inserts.
///
/// One buffer per locality in the mesh. The aggregator never talks to a map
/// directly; it ships batches to a named flush handler, which resolves the
/// destination map through the object registry.
pub struct InsertAggregator<K, V> {
    service: Arc<ClusterService>,
    flush_handler: String,
    buffers: Vec<Mutex<Vec<Entry<K, V>>>>,
}

impl<K, V> InsertAggregator<K, V>
where
    K: Serialize + Send + Sync,
    V: Serialize + Send + Sync,
{
    pub fn new(service: Arc<ClusterService>, flush_handler: String) -> Self {
        let buffers = (0..service.num_localities())
            .map(|_| Mutex::new(Vec::new()))
            .collect();

        Self {
            service,
            flush_handler,
            buffers,
        }
    }

    /// Appends an entry bound for `dest`. At the high-water mark the batch
    /// ships synchronously; the buffer lock is held across the send, so
    /// batches for one destination leave in append order.
    pub async fn insert(&self, entry: Entry<K, V>, dest: LocalityId) -> Result<()> {
        let mut buffer = self.buffer(dest)?.lock().await;
        buffer.push(entry);
        if buffer.len() >= BUFFER_CAPACITY {
            let batch = std::mem::take(&mut *buffer);
            self.ship(dest, batch).await?;
        }
        Ok(())
    }

    /// As [`insert`](Self::insert), but an implicit flush is issued as an
    /// asynchronous send attached to `handle`. The batch is only guaranteed
    /// delivered after the handle has been waited on.
    pub async fn async_insert(&self, handle: &Handle, entry: Entry<K, V>, dest: LocalityId) -> Result<()> {
        let mut buffer = self.buffer(dest)?.lock().await;
        buffer.push(entry);
        if buffer.len() >= BUFFER_CAPACITY {
            let batch = std::mem::take(&mut *buffer);
            tracing::debug!(
                "async-shipping {} buffered entries to locality {}",
                batch.len(),
                dest
            );
            let payload = serde_json::to_value(FlushBatch { entries: batch })?;
            self.service
                .async_execute_at(handle, dest, &self.flush_handler, payload)?;
        }
        Ok(())
    }

    /// Ships every non-empty buffer and blocks until each batch has been
    /// acknowledged by its destination.
    pub async fn flush_all(&self) -> Result<()> {
        for (index, buffer) in self.buffers.iter().enumerate() {
            let dest = LocalityId(index as u32);
            let batch = {
                let mut buffer = buffer.lock().await;
                std::mem::take(&mut *buffer)
            };
            if !batch.is_empty() {
                self.ship(dest, batch).await?;
            }
        }
        Ok(())
    }

    async fn ship(&self, dest: LocalityId, batch: Vec<Entry<K, V>>) -> Result<()> {
        tracing::debug!("shipping {} buffered entries to locality {}", batch.len(), dest);
        let payload = serde_json::to_value(FlushBatch { entries: batch })?;
        self.service
            .execute_at(dest, &self.flush_handler, payload)
            .await?;
        Ok(())
    }

    fn buffer(&self, dest: LocalityId) -> Result<&Mutex<Vec<Entry<K, V>>>> {
        self.buffers
            .get(dest.0 as usize)
            .ok_or_else(|| anyhow::anyhow!("no buffer for locality {}", dest))
    }
}
