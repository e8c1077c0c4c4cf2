#[cfg(test)]
mod tests {
    use crate::cluster::handle::{Handle, ReturnSlot};
    use crate::cluster::service::ClusterService;
    use crate::cluster::types::{LocalityId, ObjectId};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ============================================================
    // DISPATCH
    // ============================================================

    #[tokio::test]
    async fn test_execute_at_roundtrip() {
        let service = ClusterService::start(2).unwrap();

        service
            .register_handler(LocalityId(1), "echo", |payload: Value| async move {
                Ok(payload)
            })
            .unwrap();

        let reply = service
            .execute_at(LocalityId(1), "echo", json!({"n": 7}))
            .await
            .unwrap();

        assert_eq!(reply, json!({"n": 7}));
    }

    #[tokio::test]
    async fn test_execute_at_with_typed_return() {
        let service = ClusterService::start(1).unwrap();

        service
            .register_handler(LocalityId(0), "double", |payload: Value| async move {
                let n: u64 = serde_json::from_value(payload)?;
                Ok(serde_json::to_value(n * 2)?)
            })
            .unwrap();

        let doubled: u64 = service
            .execute_at_with_ret(LocalityId(0), "double", json!(21))
            .await
            .unwrap();

        assert_eq!(doubled, 42);
    }

    #[tokio::test]
    async fn test_unknown_handler_is_an_error() {
        let service = ClusterService::start(1).unwrap();

        let result = service
            .execute_at(LocalityId(0), "no_such_operation", Value::Null)
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_zero_localities_is_an_error() {
        assert!(ClusterService::start(0).is_err());
    }

    #[tokio::test]
    async fn test_unknown_locality_is_an_error() {
        let service = ClusterService::start(2).unwrap();

        let result = service
            .execute_at(LocalityId(9), "anything", Value::Null)
            .await;

        assert!(result.is_err());
    }

    // ============================================================
    // ASYNC DISPATCH AND HANDLES
    // ============================================================

    #[tokio::test]
    async fn test_handle_joins_all_attached_operations() {
        let service = ClusterService::start(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for loc in service.localities() {
            let counter = counter.clone();
            service
                .register_handler(loc, "bump", move |_payload: Value| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(Value::Null)
                    }
                })
                .unwrap();
        }

        let handle = Handle::new();
        for i in 0..100u32 {
            let loc = LocalityId(i % 2);
            service
                .async_execute_at(&handle, loc, "bump", Value::Null)
                .unwrap();
        }

        handle.wait().await;
        assert_eq!(handle.outstanding(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn test_wait_on_empty_handle_returns_immediately() {
        let handle = Handle::new();
        handle.wait().await;
    }

    #[tokio::test]
    async fn test_return_slot_is_valid_after_wait() {
        let service = ClusterService::start(1).unwrap();

        service
            .register_handler(LocalityId(0), "answer", |_payload: Value| async move {
                Ok(json!(42u64))
            })
            .unwrap();

        let handle = Handle::new();
        let slot: ReturnSlot<u64> = ReturnSlot::new();
        service
            .async_execute_at_with_ret(&handle, LocalityId(0), "answer", Value::Null, slot.clone())
            .unwrap();

        handle.wait().await;
        assert_eq!(slot.get(), Some(&42));
    }

    #[tokio::test]
    async fn test_async_unknown_handler_still_completes_the_handle() {
        let service = ClusterService::start(1).unwrap();

        let handle = Handle::new();
        service
            .async_execute_at(&handle, LocalityId(0), "missing", Value::Null)
            .unwrap();

        // The wait must not hang even though the handler does not exist.
        handle.wait().await;
    }

    // ============================================================
    // COLLECTIVES AND PARALLEL LOOPS
    // ============================================================

    #[tokio::test]
    async fn test_execute_on_all_touches_every_locality() {
        let service = ClusterService::start(4).unwrap();
        let touched = Arc::new(AtomicUsize::new(0));

        for loc in service.localities() {
            let touched = touched.clone();
            service
                .register_handler(loc, "touch", move |_payload: Value| {
                    let touched = touched.clone();
                    async move {
                        touched.fetch_add(1, Ordering::SeqCst);
                        Ok(Value::Null)
                    }
                })
                .unwrap();
        }

        service.execute_on_all("touch", Value::Null).await.unwrap();
        assert_eq!(touched.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_for_each_at_visits_every_index_once() {
        let service = ClusterService::start(1).unwrap();
        let count = 1000;
        let visits: Arc<Vec<AtomicUsize>> =
            Arc::new((0..count).map(|_| AtomicUsize::new(0)).collect());

        let recorded = visits.clone();
        service
            .register_iter_handler(LocalityId(0), "mark", move |index, _payload| {
                recorded[index].fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        service
            .for_each_at(LocalityId(0), "mark", Value::Null, count)
            .await
            .unwrap();

        for (index, visit) in visits.iter().enumerate() {
            assert_eq!(visit.load(Ordering::SeqCst), 1, "index {} visit count", index);
        }
    }

    #[tokio::test]
    async fn test_async_for_each_at_completes_through_handle() {
        let service = ClusterService::start(1).unwrap();
        let sum = Arc::new(AtomicUsize::new(0));

        let recorded = sum.clone();
        service
            .register_iter_handler(LocalityId(0), "add_index", move |index, _payload| {
                recorded.fetch_add(index, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let handle = Handle::new();
        service
            .async_for_each_at(&handle, LocalityId(0), "add_index", Value::Null, 100)
            .unwrap();
        handle.wait().await;

        assert_eq!(sum.load(Ordering::SeqCst), (0..100).sum::<usize>());
    }

    // ============================================================
    // OBJECT REGISTRY
    // ============================================================

    struct Representative {
        locality: LocalityId,
    }

    #[tokio::test]
    async fn test_object_registry_resolves_per_locality() {
        let service = ClusterService::start(3).unwrap();
        let oid = ObjectId::new();

        for loc in service.localities() {
            service
                .register_object(loc, oid, Arc::new(Representative { locality: loc }))
                .unwrap();
        }

        for loc in service.localities() {
            let representative: Arc<Representative> = service.object(loc, oid).unwrap();
            assert_eq!(representative.locality, loc);
        }
    }

    #[tokio::test]
    async fn test_object_registry_misses() {
        let service = ClusterService::start(1).unwrap();
        let oid = ObjectId::new();

        // Unknown id.
        assert!(service.object::<Representative>(LocalityId(0), oid).is_none());

        // Known id, wrong type.
        service
            .register_object(LocalityId(0), oid, Arc::new(Representative {
                locality: LocalityId(0),
            }))
            .unwrap();
        assert!(service.object::<String>(LocalityId(0), oid).is_none());

        // Removed id.
        service.remove_object(LocalityId(0), oid).unwrap();
        assert!(service.object::<Representative>(LocalityId(0), oid).is_none());
    }
}
