use std::future::Future;
use std::sync::Arc;

use tracing::trace;

use crate::envelope::{Args, Envelope, Kwargs};
use crate::queue::{Queue, TaskResult};
use crate::{Error, Result};

/// Registers tasks against a queue and hands out submit handles.
pub struct Producer {
    queue: Queue,
}

/// Per-task overrides applied at registration. A field left unset falls back
/// to the queue default.
#[derive(Clone, Copy, Debug, Default)]
pub struct TaskOptions {
    pub ack_timeout: Option<u64>,
    pub max_retry_count: Option<u32>,
}

impl Producer {
    pub fn new(queue: Queue) -> Self {
        Self { queue }
    }

    /// Register `task` under `<queue_name>:<name>` with the queue's default
    /// ack settings.
    ///
    /// The ident must match on the consuming side: consumers dispatch by the
    /// same key, and a mismatch shows up there as an unknown-handler error.
    pub fn register_task<F, Fut>(&self, name: &str, task: F) -> Result<TaskHandle>
    where
        F: Fn(Args, Kwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        self.register_task_with(name, TaskOptions::default(), task)
    }

    /// Register `task` with per-task ack settings.
    pub fn register_task_with<F, Fut>(
        &self,
        name: &str,
        options: TaskOptions,
        task: F,
    ) -> Result<TaskHandle>
    where
        F: Fn(Args, Kwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        if name.is_empty() {
            return Err(Error::Configuration("task name must not be empty".into()));
        }
        let callable_ident = format!("{}:{name}", self.queue.name());
        self.queue.register(callable_ident.clone(), Arc::new(task))?;
        Ok(TaskHandle {
            queue: self.queue.clone(),
            callable_ident,
            ack_timeout: options.ack_timeout.unwrap_or(self.queue.ack_timeout()),
            max_retry_count: options
                .max_retry_count
                .unwrap_or(self.queue.max_retry_count()),
        })
    }
}

/// Submit handle returned by registration: invoking [`delay`](Self::delay)
/// builds a fresh envelope and pushes it onto the queue.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    queue: Queue,
    callable_ident: String,
    ack_timeout: u64,
    max_retry_count: u32,
}

impl TaskHandle {
    /// Enqueue one invocation of the task. Returns the generated message id.
    pub async fn delay(&self, args: Args, kwargs: Kwargs) -> Result<String> {
        let envelope = Envelope::new(
            self.callable_ident.clone(),
            args,
            kwargs,
            self.ack_timeout,
            self.max_retry_count,
        );
        self.queue.push(&envelope).await?;
        trace!(id = %envelope.id, ident = %self.callable_ident, "message enqueued");
        Ok(envelope.id)
    }

    pub fn callable_ident(&self) -> &str {
        &self.callable_ident
    }
}
