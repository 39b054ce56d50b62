use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::Store;
use crate::Result;

/// In-process store with the same semantics as the Redis adapter.
///
/// Useful for tests and for embedders that want the queue protocol without a
/// server. Share one instance (behind an `Arc`) between the producing and
/// consuming sides.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    pushed: Notify,
}

#[derive(Default)]
struct Inner {
    lists: HashMap<String, VecDeque<Vec<u8>>>,
    hashes: HashMap<String, HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_pop(&self, key: &str) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        let list = inner.lists.get_mut(key)?;
        let value = list.pop_back();
        // Empty containers do not exist, as in Redis.
        if list.is_empty() {
            inner.lists.remove(key);
        }
        value
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_push_left(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .lists
            .entry(key.to_owned())
            .or_default()
            .push_front(value);
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn list_pop_right_blocking(&self, key: &str) -> Result<Vec<u8>> {
        loop {
            let pushed = self.pushed.notified();
            tokio::pin!(pushed);
            // A `Notified` only registers once polled; enable it before
            // checking, so a push landing in between cannot be missed.
            pushed.as_mut().enable();
            if let Some(value) = self.try_pop(key) {
                return Ok(value);
            }
            pushed.await;
        }
    }

    async fn list_length(&self, key: &str) -> Result<usize> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .lists
            .get(key)
            .map(VecDeque::len)
            .unwrap_or(0))
    }

    async fn hash_set(&self, key: &str, field: &str, value: Vec<u8>) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .hashes
            .entry(key.to_owned())
            .or_default()
            .insert(field.to_owned(), value);
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned())
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .hashes
            .get(key)
            .map(|hash| {
                hash.iter()
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(hash) = inner.hashes.get_mut(key) {
            hash.remove(field);
            if hash.is_empty() {
                inner.hashes.remove(key);
            }
        }
        Ok(())
    }

    async fn key_exists(&self, key: &str) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.lists.contains_key(key) || inner.hashes.contains_key(key))
    }
}
