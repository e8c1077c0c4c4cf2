use super::types::ObjectId;

use anyhow::Result;
use dashmap::DashMap;
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type HandlerFn =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// Iteration handler invoked once per index by `for_each_at`.
pub type IterFn = Arc<dyn Fn(usize, &Value) -> Result<()> + Send + Sync>;

/// Per-locality table of named operation handlers.
///
/// A handler is the registered-operation rendition of a remote closure: the
/// name identifies the code on every locality, the payload carries the
/// value-copyable arguments.
pub struct HandlerRegistry {
    handlers: DashMap<String, HandlerFn>,
    iter_handlers: DashMap<String, IterFn>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
            iter_handlers: DashMap::new(),
        }
    }

    pub fn register<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: HandlerFn = Arc::new(move |payload: Value| {
            Box::pin(handler(payload)) as Pin<Box<dyn Future<Output = Result<Value>> + Send>>
        });

        self.handlers.insert(name.to_string(), handler);

        tracing::debug!("registered handler: {}", name);
    }

    pub fn register_iter<F>(&self, name: &str, handler: F)
    where
        F: Fn(usize, &Value) -> Result<()> + Send + Sync + 'static,
    {
        self.iter_handlers.insert(name.to_string(), Arc::new(handler));

        tracing::debug!("registered iteration handler: {}", name);
    }

    pub fn get(&self, name: &str) -> Option<HandlerFn> {
        self.handlers.get(name).map(|entry| entry.value().clone())
    }

    pub fn get_iter(&self, name: &str) -> Option<IterFn> {
        self.iter_handlers
            .get(name)
            .map(|entry| entry.value().clone())
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Drops every handler whose name starts with `prefix`. Used by the
    /// collective release to unregister one object's operation set.
    pub fn remove_prefix(&self, prefix: &str) {
        self.handlers.retain(|name, _| !name.starts_with(prefix));
        self.iter_handlers.retain(|name, _| !name.starts_with(prefix));
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-locality table mapping object ids to local representatives.
pub struct ObjectRegistry {
    objects: DashMap<ObjectId, Arc<dyn Any + Send + Sync>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
        }
    }

    pub fn insert(&self, oid: ObjectId, object: Arc<dyn Any + Send + Sync>) {
        self.objects.insert(oid, object);
    }

    /// Resolves the local representative registered under `oid`, downcast to
    /// its concrete type. Returns `None` if the id is unknown on this
    /// locality or registered with a different type.
    pub fn get<T: Send + Sync + 'static>(&self, oid: ObjectId) -> Option<Arc<T>> {
        let object = self.objects.get(&oid)?.value().clone();
        object.downcast::<T>().ok()
    }

    pub fn remove(&self, oid: ObjectId) {
        self.objects.remove(&oid);
    }
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}
