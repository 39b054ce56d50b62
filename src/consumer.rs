use std::sync::Arc;

use tracing::{error, info, warn};

use crate::ack::AckTracker;
use crate::envelope::Envelope;
use crate::queue::{Queue, TaskFn};
use crate::{Error, Result};

/// Blocking receive loop plus the per-message dispatch state machine.
pub struct Consumer {
    queue: Queue,
    ack: AckTracker,
}

impl Consumer {
    pub fn new(queue: Queue) -> Self {
        let ack = AckTracker::new(queue.clone());
        Self { queue, ack }
    }

    /// Run the receive loop.
    ///
    /// Task failures never end the loop; it returns only when the store
    /// becomes unavailable, leaving the restart policy to the embedder. The
    /// reaper runs for as long as the loop does.
    pub async fn run(&self) -> Result<()> {
        info!(queue = %self.queue.name(), "consumer starting");
        for ident in self.queue.task_idents() {
            info!(task = %ident, "registered task");
        }

        let _reaper = self
            .queue
            .ack_enabled()
            .then(|| self.ack.spawn_reaper());

        loop {
            let envelope = match self.queue.pop().await {
                Ok(envelope) => envelope,
                Err(err @ Error::StoreUnavailable(_)) => return Err(err),
                // Undecodable message: drop it, there is nothing to ack.
                Err(err) => {
                    error!("dropping undecodable message: {err}");
                    continue;
                }
            };
            info!(id = %envelope.id, ident = %envelope.callable_ident, "got message");

            let Some(task) = self.queue.task(&envelope.callable_ident) else {
                self.unknown_handler(envelope).await;
                continue;
            };
            if let Err(err) = self.run_task(envelope, task).await {
                // Store trouble mid-dispatch. The message was either pushed
                // back or left in-flight for the reaper, so it is not lost.
                error!("dispatch failed: {err}");
            }
        }
    }

    /// No task is registered under the envelope's ident.
    ///
    /// The message is recorded in-flight and never acked, so the reaper keeps
    /// re-enqueuing it; the repeating log line is the operator's cue that the
    /// producing and consuming deployments disagree about the task set.
    async fn unknown_handler(&self, mut envelope: Envelope) {
        error!(
            id = %envelope.id,
            "{}",
            Error::UnknownHandler(envelope.callable_ident.clone())
        );
        if let Err(err) = self.ack.entry(&mut envelope).await {
            error!("could not record unknown message as in-flight: {err}");
        }
    }

    /// Dispatch one envelope: record it in-flight, invoke the task, and
    /// drive the ack / retry / no-ack transition.
    async fn run_task(&self, mut envelope: Envelope, task: Arc<dyn TaskFn>) -> Result<()> {
        if let Err(err) = self.ack.entry(&mut envelope).await {
            // The pop was destructive and there is no in-flight record yet,
            // so the reaper cannot recover this envelope. Hand it straight
            // back to the list instead of invoking the task.
            envelope.start_time = None;
            self.queue.push(&envelope).await?;
            return Err(err);
        }
        let (args, kwargs) = envelope.message.clone();
        loop {
            match task.invoke(args.clone(), kwargs.clone()).await {
                Ok(result) => {
                    info!(
                        id = %envelope.id,
                        ident = %envelope.callable_ident,
                        "task result: {result}"
                    );
                    return self.ack.ack(&envelope.id).await;
                }
                Err(err) => {
                    // Retry in place, without re-stamping the in-flight
                    // entry; a long enough chain may still be reaped.
                    envelope.retry_count += 1;
                    if envelope.retry_count <= envelope.max_retry_count {
                        warn!(
                            id = %envelope.id,
                            retry_count = envelope.retry_count,
                            "task failed, retrying: {err}"
                        );
                        continue;
                    }
                    error!(
                        id = %envelope.id,
                        retry_count = envelope.retry_count,
                        "task failed, retries exhausted: {err}"
                    );
                    if self.queue.ack_enabled() {
                        // Another consumer gets it, retry counter intact.
                        return self.ack.no_ack(&envelope).await;
                    }
                    return Ok(());
                }
            }
        }
    }
}
