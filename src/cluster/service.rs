use super::handle::{Handle, ReturnSlot};
use super::registry::{HandlerRegistry, ObjectRegistry};
use super::types::{LocalityId, ObjectId};

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

/// Decoded-return sink, invoked by the target locality before completion is
/// signalled on the handle.
type ReturnSink = Box<dyn FnOnce(Value) + Send>;

enum Message {
    Invoke {
        handler: String,
        payload: Value,
        reply: Option<oneshot::Sender<Result<Value>>>,
        sink: Option<ReturnSink>,
        completion: Option<Handle>,
    },
    ParallelFor {
        handler: String,
        payload: Value,
        count: usize,
        reply: Option<oneshot::Sender<Result<()>>>,
        completion: Option<Handle>,
    },
}

struct Locality {
    id: LocalityId,
    handlers: HandlerRegistry,
    objects: ObjectRegistry,
    inbox: mpsc::UnboundedSender<Message>,
}

impl Locality {
    async fn process(&self, message: Message) {
        match message {
            Message::Invoke {
                handler,
                payload,
                reply,
                sink,
                completion,
            } => {
                let result = match self.handlers.get(&handler) {
                    Some(handler_fn) => handler_fn(payload).await,
                    None => {
                        tracing::error!("locality {}: unknown handler '{}'", self.id, handler);
                        Err(anyhow::anyhow!("unknown handler: {}", handler))
                    }
                };

                match (reply, result) {
                    (Some(tx), result) => {
                        // The caller may have given up on the reply already.
                        let _ = tx.send(result);
                    }
                    (None, Ok(value)) => {
                        if let Some(sink) = sink {
                            sink(value);
                        }
                    }
                    (None, Err(e)) => {
                        tracing::error!(
                            "locality {}: handler '{}' failed: {:#}",
                            self.id,
                            handler,
                            e
                        );
                    }
                }

                if let Some(handle) = completion {
                    handle.complete();
                }
            }
            Message::ParallelFor {
                handler,
                payload,
                count,
                reply,
                completion,
            } => {
                let result = self.run_parallel(&handler, payload, count).await;

                match (reply, result) {
                    (Some(tx), result) => {
                        let _ = tx.send(result);
                    }
                    (None, Ok(())) => {}
                    (None, Err(e)) => {
                        tracing::error!(
                            "locality {}: parallel loop '{}' failed: {:#}",
                            self.id,
                            handler,
                            e
                        );
                    }
                }

                if let Some(handle) = completion {
                    handle.complete();
                }
            }
        }
    }

    /// Runs a registered iteration handler over `[0, count)`, chunked across
    /// worker tasks.
    async fn run_parallel(&self, handler: &str, payload: Value, count: usize) -> Result<()> {
        let Some(iter_fn) = self.handlers.get_iter(handler) else {
            tracing::error!(
                "locality {}: unknown iteration handler '{}'",
                self.id,
                handler
            );
            anyhow::bail!("unknown iteration handler: {}", handler);
        };

        if count == 0 {
            return Ok(());
        }

        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(count);
        let chunk = count.div_ceil(workers);
        let payload = Arc::new(payload);

        let mut tasks = JoinSet::new();
        for worker in 0..workers {
            let start = worker * chunk;
            let end = ((worker + 1) * chunk).min(count);
            if start >= end {
                break;
            }

            let iter_fn = iter_fn.clone();
            let payload = payload.clone();
            tasks.spawn(async move {
                for index in start..end {
                    iter_fn(index, &payload)?;
                }
                Ok::<(), anyhow::Error>(())
            });
        }

        while let Some(joined) = tasks.join_next().await {
            joined??;
        }

        Ok(())
    }
}

/// The locality mesh: a fixed set of localities plus the dispatch primitives
/// that move named operations between them.
///
/// Each locality drains its inbox on a dedicated task and runs every message
/// concurrently, so a handler that dispatches back into the mesh (including to
/// its own locality) cannot deadlock the loop.
pub struct ClusterService {
    localities: Vec<Arc<Locality>>,
}

impl ClusterService {
    /// Starts a mesh of `num_localities` localities. The count is fixed for
    /// the lifetime of the service.
    pub fn start(num_localities: usize) -> Result<Arc<Self>> {
        if num_localities == 0 {
            anyhow::bail!("a mesh needs at least one locality");
        }

        let mut localities = Vec::with_capacity(num_localities);
        let mut inboxes = Vec::with_capacity(num_localities);

        for id in 0..num_localities {
            let (tx, rx) = mpsc::unbounded_channel();
            localities.push(Arc::new(Locality {
                id: LocalityId(id as u32),
                handlers: HandlerRegistry::new(),
                objects: ObjectRegistry::new(),
                inbox: tx,
            }));
            inboxes.push(rx);
        }

        let service = Arc::new(Self { localities });

        for (locality, mut inbox) in service.localities.iter().cloned().zip(inboxes) {
            tokio::spawn(async move {
                while let Some(message) = inbox.recv().await {
                    let locality = locality.clone();
                    tokio::spawn(async move {
                        locality.process(message).await;
                    });
                }
                tracing::debug!("locality {}: dispatch loop stopped", locality.id);
            });
        }

        tracing::info!("cluster mesh started with {} localities", num_localities);

        Ok(service)
    }

    pub fn num_localities(&self) -> usize {
        self.localities.len()
    }

    /// Ordered list of every locality in the mesh.
    pub fn localities(&self) -> Vec<LocalityId> {
        (0..self.localities.len())
            .map(|id| LocalityId(id as u32))
            .collect()
    }

    pub fn register_handler<F, Fut>(&self, loc: LocalityId, name: &str, handler: F) -> Result<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.locality(loc)?.handlers.register(name, handler);
        Ok(())
    }

    pub fn register_iter_handler<F>(&self, loc: LocalityId, name: &str, handler: F) -> Result<()>
    where
        F: Fn(usize, &Value) -> Result<()> + Send + Sync + 'static,
    {
        self.locality(loc)?.handlers.register_iter(name, handler);
        Ok(())
    }

    /// Unregisters every handler on `loc` whose name starts with `prefix`.
    pub fn remove_handlers(&self, loc: LocalityId, prefix: &str) -> Result<()> {
        self.locality(loc)?.handlers.remove_prefix(prefix);
        Ok(())
    }

    pub fn register_object(
        &self,
        loc: LocalityId,
        oid: ObjectId,
        object: Arc<dyn Any + Send + Sync>,
    ) -> Result<()> {
        self.locality(loc)?.objects.insert(oid, object);
        Ok(())
    }

    /// Resolves the representative registered under `oid` on `loc`.
    pub fn object<T: Send + Sync + 'static>(&self, loc: LocalityId, oid: ObjectId) -> Option<Arc<T>> {
        self.localities
            .get(loc.0 as usize)
            .and_then(|locality| locality.objects.get(oid))
    }

    pub fn remove_object(&self, loc: LocalityId, oid: ObjectId) -> Result<()> {
        self.locality(loc)?.objects.remove(oid);
        Ok(())
    }

    /// Runs `handler` on `loc` and blocks for the reply.
    pub async fn execute_at(&self, loc: LocalityId, handler: &str, payload: Value) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        self.send(
            loc,
            Message::Invoke {
                handler: handler.to_string(),
                payload,
                reply: Some(tx),
                sink: None,
                completion: None,
            },
        )?;

        rx.await
            .map_err(|_| anyhow::anyhow!("locality {} dropped the reply", loc))?
    }

    /// As [`execute_at`](Self::execute_at), decoding the reply into `R`.
    pub async fn execute_at_with_ret<R: DeserializeOwned>(
        &self,
        loc: LocalityId,
        handler: &str,
        payload: Value,
    ) -> Result<R> {
        let value = self.execute_at(loc, handler, payload).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Ships `handler` to `loc` without waiting; completion is tracked by
    /// `handle`.
    pub fn async_execute_at(
        &self,
        handle: &Handle,
        loc: LocalityId,
        handler: &str,
        payload: Value,
    ) -> Result<()> {
        handle.attach();
        let message = Message::Invoke {
            handler: handler.to_string(),
            payload,
            reply: None,
            sink: None,
            completion: Some(handle.clone()),
        };
        self.send(loc, message).inspect_err(|_| handle.complete())
    }

    /// Asynchronous dispatch with a return value: the decoded reply is
    /// deposited into `slot` before `handle` observes the completion, so the
    /// slot is valid once [`Handle::wait`] returns.
    pub fn async_execute_at_with_ret<R>(
        &self,
        handle: &Handle,
        loc: LocalityId,
        handler: &str,
        payload: Value,
        slot: ReturnSlot<R>,
    ) -> Result<()>
    where
        R: DeserializeOwned + Send + Sync + 'static,
    {
        handle.attach();
        let sink: ReturnSink = Box::new(move |value: Value| {
            match serde_json::from_value::<R>(value) {
                Ok(ret) => slot.set(ret),
                Err(e) => tracing::error!("failed to decode async return value: {}", e),
            }
        });
        let message = Message::Invoke {
            handler: handler.to_string(),
            payload,
            reply: None,
            sink: Some(sink),
            completion: Some(handle.clone()),
        };
        self.send(loc, message).inspect_err(|_| handle.complete())
    }

    /// Collective fan-out: runs `handler` on every locality, blocking until
    /// each has replied.
    pub async fn execute_on_all(&self, handler: &str, payload: Value) -> Result<()> {
        for loc in self.localities() {
            self.execute_at(loc, handler, payload.clone()).await?;
        }
        Ok(())
    }

    pub fn async_execute_on_all(&self, handle: &Handle, handler: &str, payload: Value) -> Result<()> {
        for loc in self.localities() {
            self.async_execute_at(handle, loc, handler, payload.clone())?;
        }
        Ok(())
    }

    /// Parallel loop: runs the registered iteration handler for every index in
    /// `[0, count)` on `loc`, blocking until the loop has finished.
    pub async fn for_each_at(
        &self,
        loc: LocalityId,
        handler: &str,
        payload: Value,
        count: usize,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(
            loc,
            Message::ParallelFor {
                handler: handler.to_string(),
                payload,
                count,
                reply: Some(tx),
                completion: None,
            },
        )?;

        rx.await
            .map_err(|_| anyhow::anyhow!("locality {} dropped the reply", loc))?
    }

    pub fn async_for_each_at(
        &self,
        handle: &Handle,
        loc: LocalityId,
        handler: &str,
        payload: Value,
        count: usize,
    ) -> Result<()> {
        handle.attach();
        let message = Message::ParallelFor {
            handler: handler.to_string(),
            payload,
            count,
            reply: None,
            completion: Some(handle.clone()),
        };
        self.send(loc, message).inspect_err(|_| handle.complete())
    }

    fn locality(&self, loc: LocalityId) -> Result<&Arc<Locality>> {
        self.localities
            .get(loc.0 as usize)
            .ok_or_else(|| anyhow::anyhow!("unknown locality: {}", loc))
    }

    fn send(&self, loc: LocalityId, message: Message) -> Result<()> {
        self.locality(loc)?
            .inbox
            .send(message)
            .map_err(|_| anyhow::anyhow!("locality {} is down", loc))
    }
}
