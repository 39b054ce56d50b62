//! Consume the demo queue:
//!
//! ```sh
//! cargo run --example worker -- --queue test-queue-1 consumer
//! cargo run --example worker -- --queue test-queue-1 queue-info
//! ```

use std::sync::Arc;

use serde_json::json;
use taskq::store::RedisStore;
use taskq::{cli, Producer, Queue, QueueConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::init_logging();

    let store = Arc::new(RedisStore::connect("redis://localhost", 8).await?);
    let mut config = QueueConfig::new("test-queue-1");
    config.ack_enabled = true;
    let queue = Queue::new(config, store);

    // The consumer dispatches by the same idents the producing side uses.
    let producer = Producer::new(queue.clone());
    producer.register_task("async_add", |args, _kwargs| async move {
        let a = args[0].as_i64().unwrap_or(0);
        let b = args[1].as_i64().unwrap_or(0);
        Ok(json!(a + b))
    })?;
    producer.register_task("async_reduce", |args, _kwargs| async move {
        let a = args[0].as_i64().unwrap_or(0);
        let b = args[1].as_i64().unwrap_or(0);
        Ok(json!(a - b))
    })?;

    cli::run([queue]).await?;
    Ok(())
}
