//! Produce demo tasks onto a local Redis queue, forever:
//!
//! ```sh
//! cargo run --example tasks
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use taskq::store::RedisStore;
use taskq::{Producer, Queue, QueueConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskq::cli::init_logging();

    let store = Arc::new(RedisStore::connect("redis://localhost", 8).await?);
    let queue = Queue::new(QueueConfig::new("test-queue-1"), store);
    let producer = Producer::new(queue);

    let add = producer.register_task("async_add", |args, _kwargs| async move {
        let a = args[0].as_i64().unwrap_or(0);
        let b = args[1].as_i64().unwrap_or(0);
        Ok(json!(a + b))
    })?;
    let reduce = producer.register_task("async_reduce", |args, _kwargs| async move {
        let a = args[0].as_i64().unwrap_or(0);
        let b = args[1].as_i64().unwrap_or(0);
        Ok(json!(a - b))
    })?;

    loop {
        tokio::time::sleep(Duration::from_secs(fastrand::u64(1..=3))).await;
        add.delay(vec![json!(1), json!(2)], Default::default()).await?;
        reduce.delay(vec![json!(2), json!(1)], Default::default()).await?;
    }
}
