use std::time::{SystemTime, UNIX_EPOCH};

use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

use crate::envelope::Envelope;
use crate::queue::Queue;
use crate::Result;

fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Book-keeping for one queue's in-flight set, plus the timeout reaper.
///
/// Every operation is a no-op when the queue has acks disabled; the hash of
/// such a queue stays empty.
pub struct AckTracker {
    queue: Queue,
}

impl AckTracker {
    pub fn new(queue: Queue) -> Self {
        Self { queue }
    }

    /// Move `envelope` into the in-flight set, stamping `start_time` with the
    /// current wall-clock second. Stale stamps from prior lives are always
    /// overwritten.
    pub async fn entry(&self, envelope: &mut Envelope) -> Result<()> {
        if !self.queue.ack_enabled() {
            return Ok(());
        }
        envelope.start_time = Some(now_seconds());
        let bytes = self.queue.codec().encode(envelope)?;
        self.queue
            .store()
            .hash_set(self.queue.ack_hash_key(), &envelope.id, bytes)
            .await
    }

    /// Drop `id` from the in-flight set. Idempotent: deleting an id the
    /// reaper already removed does nothing.
    pub async fn ack(&self, id: &str) -> Result<()> {
        if !self.queue.ack_enabled() {
            return Ok(());
        }
        trace!(id = %id, "message acked");
        self.queue
            .store()
            .hash_delete(self.queue.ack_hash_key(), id)
            .await
    }

    /// Hand `envelope` back to the queue for another consumer.
    ///
    /// Push first, delete second: a crash between the two yields at worst a
    /// duplicate delivery, never a lost message.
    pub async fn no_ack(&self, envelope: &Envelope) -> Result<()> {
        if !self.queue.ack_enabled() {
            return Ok(());
        }
        self.queue.push(envelope).await?;
        self.queue
            .store()
            .hash_delete(self.queue.ack_hash_key(), &envelope.id)
            .await
    }

    /// Start the reaper for this tracker's queue. The loop ends when the
    /// returned handle is dropped.
    ///
    /// At most one reaper may run against a queue's hash; deployments give
    /// each consumer process its own queue-tracker pair.
    pub fn spawn_reaper(&self) -> ReaperHandle {
        ReaperHandle(tokio::spawn(reaper_loop(self.queue.clone())))
    }
}

/// Abort-on-drop guard for the reaper task.
pub struct ReaperHandle(JoinHandle<()>);

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn reaper_loop(queue: Queue) {
    if !queue.ack_enabled() {
        return;
    }
    loop {
        tokio::time::sleep(queue.check_interval()).await;
        if let Err(err) = reap_expired(&queue).await {
            error!("reaper pass failed: {err}");
        }
    }
}

/// One reaper pass: re-enqueue every in-flight envelope whose `start_time`
/// is more than the queue's ack timeout in the past.
async fn reap_expired(queue: &Queue) -> Result<()> {
    let hash_key = queue.ack_hash_key();
    if !queue.store().key_exists(hash_key).await? {
        return Ok(());
    }

    let entries = queue.store().hash_get_all(hash_key).await?;
    if entries.is_empty() {
        return Ok(());
    }
    info!(pending = entries.len(), "messages awaiting ack");

    let now = now_seconds();
    for (id, bytes) in entries {
        let mut envelope = match queue.codec().decode(&bytes) {
            Ok(envelope) => envelope,
            // Do not delete: a later entry for the same id may repair it.
            Err(err) => {
                warn!(id = %id, "skipping undecodable in-flight entry: {err}");
                continue;
            }
        };
        let Some(start_time) = envelope.start_time else {
            continue;
        };
        if now.saturating_sub(start_time) > queue.ack_timeout() {
            error!(
                id = %envelope.id,
                timeout = queue.ack_timeout(),
                "message not acked within timeout, reposting to queue"
            );
            envelope.start_time = None;
            // Same push-before-delete ordering as `no_ack`.
            queue.push(&envelope).await?;
            queue.store().hash_delete(hash_key, &id).await?;
        }
    }
    Ok(())
}
