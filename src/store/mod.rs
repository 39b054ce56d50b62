//! Narrow adapter over the external key-value store.
//!
//! Anything providing atomic per-key list push/blocking-pop and hash
//! set/get/delete can back a queue; no cross-key atomicity is assumed.

use async_trait::async_trait;

use crate::Result;

mod mem;
mod redis;

pub use self::mem::MemoryStore;
pub use self::redis::RedisStore;

/// Storage key of a queue's message list.
pub fn list_key(queue_name: &str) -> String {
    format!("message-queue-{queue_name}")
}

/// Storage key of a queue's in-flight hash.
pub fn ack_hash_key(queue_name: &str) -> String {
    format!("async_message_ack_queue:{queue_name}")
}

/// The capability set the queue needs from the backing store.
///
/// Every operation fails with [`Error::StoreUnavailable`](crate::Error) when
/// the connection cannot be established or is lost mid-operation; callers
/// propagate.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Append to the head of the list.
    async fn list_push_left(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Block until an element is available, then remove and return the tail.
    /// FIFO with respect to [`list_push_left`](Store::list_push_left).
    async fn list_pop_right_blocking(&self, key: &str) -> Result<Vec<u8>>;

    async fn list_length(&self, key: &str) -> Result<usize>;

    async fn hash_set(&self, key: &str, field: &str, value: Vec<u8>) -> Result<()>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>>;

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Deleting an absent field is permitted and does nothing.
    async fn hash_delete(&self, key: &str, field: &str) -> Result<()>;

    async fn key_exists(&self, key: &str) -> Result<bool>;
}
