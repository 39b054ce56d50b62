//! A Redis-backed distributed task queue with at-least-once delivery.
//!
//! Producers register named tasks against a [`Queue`] and enqueue invocations
//! through the returned [`TaskHandle`]. Consumer processes pop envelopes off
//! the shared list, run the registered task, and acknowledge completion.
//! When acks are enabled, popped messages are tracked in a per-queue
//! in-flight hash and a background reaper re-enqueues any entry that is not
//! acknowledged within the queue's timeout, so a crashed consumer never loses
//! work. Handlers must tolerate duplicate delivery.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use taskq::{store::RedisStore, Producer, Queue, QueueConfig};
//!
//! # async fn example() -> taskq::Result<()> {
//! let store = Arc::new(RedisStore::connect("redis://localhost", 8).await?);
//! let queue = Queue::new(QueueConfig::new("emails"), store);
//!
//! let producer = Producer::new(queue.clone());
//! let send = producer.register_task("send", |args, _kwargs| async move {
//!     println!("sending {}", args[0]);
//!     Ok(json!("sent"))
//! })?;
//! send.delay(vec![json!("hi")], Default::default()).await?;
//!
//! // Elsewhere, typically in a dedicated process:
//! taskq::Consumer::new(queue).run().await?;
//! # Ok(())
//! # }
//! ```

use std::error::Error as StdError;

mod ack;
pub mod cli;
mod codec;
mod consumer;
mod envelope;
mod producer;
mod queue;
pub mod store;

pub use ack::{AckTracker, ReaperHandle};
pub use codec::{Codec, JsonCodec};
pub use consumer::Consumer;
pub use envelope::{Args, Envelope, Kwargs};
pub use producer::{Producer, TaskHandle, TaskOptions};
pub use queue::{Queue, QueueConfig, TaskError, TaskFn, TaskFuture, TaskResult};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backing store could not be reached, or an operation against it
    /// failed mid-flight.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] Box<dyn StdError + Send + Sync>),

    /// An envelope failed to encode or decode.
    #[error("serialization error: {0}")]
    Serialization(#[source] Box<dyn StdError + Send + Sync>),

    /// A received `callable_func_ident` has no task registered under it.
    #[error("no task registered under `{0}`")]
    UnknownHandler(String),

    /// A registration-time condition was violated. Never raised from the
    /// dispatch loop.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    pub fn store(e: impl StdError + Send + Sync + 'static) -> Self {
        Self::StoreUnavailable(Box::new(e))
    }

    pub fn serialization(e: impl StdError + Send + Sync + 'static) -> Self {
        Self::Serialization(Box::new(e))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
