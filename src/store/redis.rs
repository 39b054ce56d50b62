use std::collections::HashMap;

use async_trait::async_trait;
use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use redis::AsyncCommands;

use super::Store;
use crate::{Error, Result};

/// Store adapter over a pool of Redis connections.
pub struct RedisStore {
    pool: Pool<RedisConnectionManager>,
}

impl RedisStore {
    /// Connect to `dsn` (e.g. `redis://localhost`) with at most
    /// `max_connections` pooled connections.
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self> {
        let manager = RedisConnectionManager::new(dsn).map_err(Error::store)?;
        let pool = Pool::builder()
            .max_size(max_connections)
            .build(manager)
            .await
            .map_err(Error::store)?;
        Ok(Self::from_pool(pool))
    }

    /// Reuse an existing pool, e.g. one shared with the rest of the
    /// embedding application.
    pub fn from_pool(pool: Pool<RedisConnectionManager>) -> Self {
        Self { pool }
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish()
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn list_push_left(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.pool
            .get()
            .await
            .map_err(Error::store)?
            .lpush(key, value)
            .await
            .map_err(Error::store)
    }

    async fn list_pop_right_blocking(&self, key: &str) -> Result<Vec<u8>> {
        // A zero timeout makes BRPOP block until an element arrives.
        let (_, value): (String, Vec<u8>) = self
            .pool
            .get()
            .await
            .map_err(Error::store)?
            .brpop(key, 0.0)
            .await
            .map_err(Error::store)?;
        Ok(value)
    }

    async fn list_length(&self, key: &str) -> Result<usize> {
        self.pool
            .get()
            .await
            .map_err(Error::store)?
            .llen(key)
            .await
            .map_err(Error::store)
    }

    async fn hash_set(&self, key: &str, field: &str, value: Vec<u8>) -> Result<()> {
        self.pool
            .get()
            .await
            .map_err(Error::store)?
            .hset(key, field, value)
            .await
            .map_err(Error::store)
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        self.pool
            .get()
            .await
            .map_err(Error::store)?
            .hget(key, field)
            .await
            .map_err(Error::store)
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let entries: HashMap<String, Vec<u8>> = self
            .pool
            .get()
            .await
            .map_err(Error::store)?
            .hgetall(key)
            .await
            .map_err(Error::store)?;
        Ok(entries.into_iter().collect())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<()> {
        self.pool
            .get()
            .await
            .map_err(Error::store)?
            .hdel(key, field)
            .await
            .map_err(Error::store)
    }

    async fn key_exists(&self, key: &str) -> Result<bool> {
        self.pool
            .get()
            .await
            .map_err(Error::store)?
            .exists(key)
            .await
            .map_err(Error::store)
    }
}
