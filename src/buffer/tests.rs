#[cfg(test)]
mod tests {
    use crate::buffer::aggregator::{BUFFER_CAPACITY, FlushBatch, InsertAggregator};
    use crate::cluster::handle::Handle;
    use crate::cluster::service::ClusterService;
    use crate::cluster::types::LocalityId;
    use crate::local::bucket::Entry;
    use crate::local::map::LocalMap;
    use serde_json::Value;
    use std::sync::Arc;

    /// One receiving map per locality, fed by a registered flush handler,
    /// mirroring how the distributed map wires its aggregator.
    fn mesh_with_sinks(
        num_localities: usize,
    ) -> (Arc<ClusterService>, Vec<Arc<LocalMap<u64, u64>>>) {
        let service = ClusterService::start(num_localities).unwrap();
        let mut maps = Vec::new();

        for loc in service.localities() {
            let map: Arc<LocalMap<u64, u64>> = Arc::new(LocalMap::new(1024));
            let sink = map.clone();
            service
                .register_handler(loc, "flush_sink", move |payload: Value| {
                    let sink = sink.clone();
                    async move {
                        let batch: FlushBatch<u64, u64> = serde_json::from_value(payload)?;
                        for entry in batch.entries {
                            sink.insert(entry.key, entry.value);
                        }
                        Ok(Value::Null)
                    }
                })
                .unwrap();
            maps.push(map);
        }

        (service, maps)
    }

    // ============================================================
    // SYNCHRONOUS BUFFERING
    // ============================================================

    #[tokio::test]
    async fn test_nothing_is_visible_before_flush() {
        let (service, maps) = mesh_with_sinks(2);
        let aggregator = InsertAggregator::new(service, "flush_sink".to_string());

        for key in 0..10 {
            aggregator
                .insert(Entry::new(key, key), LocalityId(1))
                .await
                .unwrap();
        }

        assert_eq!(maps[1].len(), 0, "buffered entries must not leak early");

        aggregator.flush_all().await.unwrap();
        assert_eq!(maps[1].len(), 10);
        for key in 0..10 {
            assert_eq!(maps[1].lookup(&key), Some(key));
        }
    }

    #[tokio::test]
    async fn test_full_buffer_flushes_implicitly() {
        let (service, maps) = mesh_with_sinks(2);
        let aggregator = InsertAggregator::new(service, "flush_sink".to_string());

        for key in 0..BUFFER_CAPACITY as u64 {
            aggregator
                .insert(Entry::new(key, key), LocalityId(1))
                .await
                .unwrap();
        }

        // The high-water mark shipped the batch without an explicit flush.
        assert_eq!(maps[1].len(), BUFFER_CAPACITY);
    }

    #[tokio::test]
    async fn test_flush_all_covers_every_destination() {
        let (service, maps) = mesh_with_sinks(4);
        let aggregator = InsertAggregator::new(service, "flush_sink".to_string());

        for dest in 1..4u32 {
            for key in 0..5u64 {
                aggregator
                    .insert(Entry::new(dest as u64 * 100 + key, key), LocalityId(dest))
                    .await
                    .unwrap();
            }
        }

        aggregator.flush_all().await.unwrap();

        for dest in 1..4usize {
            assert_eq!(maps[dest].len(), 5, "destination {}", dest);
        }
        assert_eq!(maps[0].len(), 0);
    }

    #[tokio::test]
    async fn test_batched_duplicates_resolve_via_the_receiver_policy() {
        let (service, maps) = mesh_with_sinks(2);
        let aggregator = InsertAggregator::new(service, "flush_sink".to_string());

        aggregator
            .insert(Entry::new(7, 1), LocalityId(1))
            .await
            .unwrap();
        aggregator
            .insert(Entry::new(7, 2), LocalityId(1))
            .await
            .unwrap();
        aggregator.flush_all().await.unwrap();

        // FIFO delivery plus the overwrite policy: the later append wins.
        assert_eq!(maps[1].lookup(&7), Some(2));
        assert_eq!(maps[1].len(), 1);
    }

    // ============================================================
    // ASYNCHRONOUS BUFFERING
    // ============================================================

    #[tokio::test]
    async fn test_async_inserts_are_visible_after_wait_then_flush() {
        let (service, maps) = mesh_with_sinks(2);
        let aggregator = InsertAggregator::new(service, "flush_sink".to_string());
        let total = BUFFER_CAPACITY as u64 + 50;

        let handle = Handle::new();
        for key in 0..total {
            aggregator
                .async_insert(&handle, Entry::new(key, key * 3), LocalityId(1))
                .await
                .unwrap();
        }

        // The implicit flush at the high-water mark rode on the handle; the
        // tail is still buffered until the explicit flush.
        handle.wait().await;
        aggregator.flush_all().await.unwrap();

        assert_eq!(maps[1].len(), total as usize);
        for key in (0..total).step_by(31) {
            assert_eq!(maps[1].lookup(&key), Some(key * 3));
        }
    }
}
