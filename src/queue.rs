use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::Value;

use crate::codec::{Codec, JsonCodec};
use crate::envelope::{Args, Envelope, Kwargs};
use crate::store::{self, Store};
use crate::{Error, Result};

/// What a task invocation resolves to. The value is logged by the consumer,
/// never transported back to the producer.
pub type TaskResult = std::result::Result<Value, TaskError>;

/// Any error a task wants to raise. Failures are retried in-process up to
/// the envelope's `max_retry_count`.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed future returned by [`TaskFn::invoke`].
pub type TaskFuture = Pin<Box<dyn Future<Output = TaskResult> + Send>>;

/// A registered task: anything invocable with `(args, kwargs)`.
pub trait TaskFn: Send + Sync + 'static {
    fn invoke(&self, args: Args, kwargs: Kwargs) -> TaskFuture;
}

impl<F, Fut> TaskFn for F
where
    F: Fn(Args, Kwargs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    fn invoke(&self, args: Args, kwargs: Kwargs) -> TaskFuture {
        Box::pin(self(args, kwargs))
    }
}

/// Per-queue configuration.
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Queue name; forms the storage keys of the message list and the
    /// in-flight hash.
    pub name: String,
    /// When false, the ack protocol is disabled end-to-end and the in-flight
    /// hash stays empty.
    pub ack_enabled: bool,
    /// Default ack timeout in seconds for messages produced without a
    /// per-task override.
    pub ack_timeout: u64,
    /// Default in-process retry bound for messages produced without a
    /// per-task override.
    pub max_retry_count: u32,
    /// How often the reaper scans the in-flight hash.
    pub check_interval: Duration,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ack_enabled: false,
            ack_timeout: 30 * 60,
            max_retry_count: 3,
            check_interval: Duration::from_secs(10),
        }
    }
}

struct QueueInner {
    config: QueueConfig,
    store: Arc<dyn Store>,
    codec: Arc<dyn Codec>,
    list_key: String,
    ack_hash_key: String,
    registry: RwLock<HashMap<String, Arc<dyn TaskFn>>>,
}

/// A named message channel backed by the store.
///
/// Owns the codec pair, the store handle, the handler registry, and the ack
/// policy settings. Cheap to clone; clones share all of the above.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl Queue {
    pub fn new(config: QueueConfig, store: Arc<dyn Store>) -> Self {
        Self::with_codec(config, store, Arc::new(JsonCodec))
    }

    pub fn with_codec(config: QueueConfig, store: Arc<dyn Store>, codec: Arc<dyn Codec>) -> Self {
        let list_key = store::list_key(&config.name);
        let ack_hash_key = store::ack_hash_key(&config.name);
        Self {
            inner: Arc::new(QueueInner {
                config,
                store,
                codec,
                list_key,
                ack_hash_key,
                registry: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn ack_enabled(&self) -> bool {
        self.inner.config.ack_enabled
    }

    pub fn ack_timeout(&self) -> u64 {
        self.inner.config.ack_timeout
    }

    pub fn max_retry_count(&self) -> u32 {
        self.inner.config.max_retry_count
    }

    pub fn check_interval(&self) -> Duration {
        self.inner.config.check_interval
    }

    pub(crate) fn store(&self) -> &dyn Store {
        &*self.inner.store
    }

    pub(crate) fn codec(&self) -> &dyn Codec {
        &*self.inner.codec
    }

    pub(crate) fn ack_hash_key(&self) -> &str {
        &self.inner.ack_hash_key
    }

    /// Serialize `envelope` and append it to the head of the message list.
    pub async fn push(&self, envelope: &Envelope) -> Result<()> {
        let bytes = self.inner.codec.encode(envelope)?;
        self.inner
            .store
            .list_push_left(&self.inner.list_key, bytes)
            .await
    }

    /// Block until a message is available, then pop and decode it.
    pub async fn pop(&self) -> Result<Envelope> {
        let bytes = self
            .inner
            .store
            .list_pop_right_blocking(&self.inner.list_key)
            .await?;
        self.inner.codec.decode(&bytes)
    }

    /// Number of messages currently queued (not counting in-flight ones).
    pub async fn size(&self) -> Result<usize> {
        self.inner.store.list_length(&self.inner.list_key).await
    }

    /// Registered task identifiers, sorted for stable reporting.
    pub fn task_idents(&self) -> Vec<String> {
        let mut idents: Vec<_> = self
            .inner
            .registry
            .read()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        idents.sort();
        idents
    }

    pub(crate) fn register(&self, ident: String, task: Arc<dyn TaskFn>) -> Result<()> {
        let mut registry = self.inner.registry.write().unwrap();
        if registry.contains_key(&ident) {
            return Err(Error::Configuration(format!(
                "task `{ident}` is already registered"
            )));
        }
        registry.insert(ident, task);
        Ok(())
    }

    pub(crate) fn task(&self, ident: &str) -> Option<Arc<dyn TaskFn>> {
        self.inner.registry.read().unwrap().get(ident).cloned()
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.inner.config.name)
            .field("ack_enabled", &self.inner.config.ack_enabled)
            .finish()
    }
}
