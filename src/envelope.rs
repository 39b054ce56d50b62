use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use svix_ksuid::{KsuidLike as _, KsuidMs};

/// Positional arguments of a task invocation.
pub type Args = Vec<Value>;

/// Keyword arguments of a task invocation.
pub type Kwargs = Map<String, Value>;

/// One task invocation in transit.
///
/// The wire representation is a JSON object with fixed field names, so
/// envelopes interoperate with other implementations sharing the same store
/// keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique, time-sortable id. Sortability is for debugging only; delivery
    /// order is whatever the list gives us.
    pub id: String,

    /// `<queue_name>:<task_name>`; selects the receiving task.
    #[serde(rename = "callable_func_ident")]
    pub callable_ident: String,

    /// Positional and keyword arguments, a two-element array on the wire.
    pub message: (Args, Kwargs),

    /// Incremented by the consumer on each in-process retry. Preserved, not
    /// reset, when the envelope is re-enqueued.
    #[serde(default)]
    pub retry_count: u32,

    /// Upper bound on in-process retries per consumer attempt.
    pub max_retry_count: u32,

    /// Seconds a message may sit in the in-flight set before the reaper
    /// re-enqueues it. Carried for operator visibility; the reaper compares
    /// against the queue-level timeout.
    pub ack_timeout: u64,

    /// Unix seconds at which the message last entered the in-flight set.
    /// Absent while queued; re-stamped on every entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
}

impl Envelope {
    pub fn new(
        callable_ident: String,
        args: Args,
        kwargs: Kwargs,
        ack_timeout: u64,
        max_retry_count: u32,
    ) -> Self {
        Self {
            id: new_id(),
            callable_ident,
            message: (args, kwargs),
            retry_count: 0,
            max_retry_count,
            ack_timeout,
            start_time: None,
        }
    }

    pub fn args(&self) -> &Args {
        &self.message.0
    }

    pub fn kwargs(&self) -> &Kwargs {
        &self.message.1
    }
}

/// Generate a fresh message id.
///
/// Collisions within one ack-timeout window would silently overwrite the
/// earlier in-flight entry, so ksuids (128 bits, millisecond-stamped) keep
/// that vanishingly rare.
pub(crate) fn new_id() -> String {
    KsuidMs::new(None, None).to_string()
}
