//! End-to-end scenarios over the in-memory store: the full
//! produce / consume / ack / reap protocol without a server.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;

use taskq::store::{ack_hash_key, MemoryStore, Store};
use taskq::{Consumer, Envelope, Error, Kwargs, Producer, Queue, QueueConfig, Result, TaskOptions};

const WAIT: Duration = Duration::from_secs(10);

fn no_kwargs() -> Kwargs {
    Map::new()
}

fn queue_with(name: &str, configure: impl FnOnce(&mut QueueConfig)) -> (Queue, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let mut config = QueueConfig::new(name);
    configure(&mut config);
    (Queue::new(config, store.clone()), store)
}

async fn wait_for_calls(calls: &AtomicU32, at_least: u32) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while calls.load(Ordering::SeqCst) < at_least {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {at_least} task invocations"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_queue_size(queue: &Queue, size: usize) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while queue.size().await.unwrap() != size {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for queue size {size}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_hash_len(store: &MemoryStore, key: &str, len: usize) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while store.hash_get_all(key).await.unwrap().len() != len {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {len} in-flight entries"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn happy_path_without_ack() {
    let (queue, store) = queue_with("q1", |_| {});
    let producer = Producer::new(queue.clone());

    let calls = Arc::new(AtomicU32::new(0));
    let observed = Arc::new(std::sync::Mutex::new(None));
    let add = {
        let calls = calls.clone();
        let observed = observed.clone();
        producer
            .register_task("add", move |args, _kwargs| {
                let calls = calls.clone();
                let observed = observed.clone();
                async move {
                    let sum = args[0].as_i64().unwrap() + args[1].as_i64().unwrap();
                    *observed.lock().unwrap() = Some(sum);
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(sum))
                }
            })
            .unwrap()
    };

    add.delay(vec![json!(1), json!(2)], no_kwargs()).await.unwrap();

    let consumer = Consumer::new(queue.clone());
    let worker = tokio::spawn(async move { consumer.run().await });

    wait_for_calls(&calls, 1).await;
    assert_eq!(*observed.lock().unwrap(), Some(3));
    assert_eq!(queue.size().await.unwrap(), 0);
    // Acks disabled: the in-flight hash never exists.
    assert!(!store.key_exists(&ack_hash_key("q1")).await.unwrap());

    worker.abort();
}

#[tokio::test]
async fn ack_lifecycle_on_success() {
    let (queue, store) = queue_with("q2", |config| {
        config.ack_enabled = true;
        config.ack_timeout = 60;
    });
    let producer = Producer::new(queue.clone());

    let gate = Arc::new(Semaphore::new(0));
    let echo = {
        let gate = gate.clone();
        producer
            .register_task("echo", move |args, _kwargs| {
                let gate = gate.clone();
                async move {
                    gate.acquire().await.unwrap().forget();
                    Ok(args[0].clone())
                }
            })
            .unwrap()
    };

    let id = echo.delay(vec![json!("hi")], no_kwargs()).await.unwrap();
    let consumer = Consumer::new(queue.clone());
    let worker = tokio::spawn(async move { consumer.run().await });

    // Between entry and ack there is exactly one in-flight record, keyed by
    // the message id, with a parseable start_time.
    wait_for_hash_len(&store, &ack_hash_key("q2"), 1).await;
    let entries = store.hash_get_all(&ack_hash_key("q2")).await.unwrap();
    let (field, bytes) = &entries[0];
    assert_eq!(field, &id);
    let entry: Value = serde_json::from_slice(bytes).unwrap();
    assert_eq!(entry["id"], json!(id));
    assert!(entry["start_time"].as_u64().is_some());

    gate.add_permits(1);
    wait_for_hash_len(&store, &ack_hash_key("q2"), 0).await;
    assert_eq!(queue.size().await.unwrap(), 0);

    worker.abort();
}

#[tokio::test]
async fn retry_then_succeed() {
    let (queue, store) = queue_with("q3", |config| {
        config.ack_enabled = true;
    });
    let producer = Producer::new(queue.clone());

    let calls = Arc::new(AtomicU32::new(0));
    let flaky = {
        let calls = calls.clone();
        producer
            .register_task_with(
                "flaky",
                TaskOptions {
                    max_retry_count: Some(3),
                    ..Default::default()
                },
                move |_args, _kwargs| {
                    let calls = calls.clone();
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) + 1 < 3 {
                            Err("not yet".into())
                        } else {
                            Ok(json!("done"))
                        }
                    }
                },
            )
            .unwrap()
    };

    flaky.delay(vec![], no_kwargs()).await.unwrap();
    let consumer = Consumer::new(queue.clone());
    let worker = tokio::spawn(async move { consumer.run().await });

    wait_for_calls(&calls, 3).await;
    wait_for_hash_len(&store, &ack_hash_key("q3"), 0).await;
    assert_eq!(queue.size().await.unwrap(), 0);

    // One pop, three invocations, no re-enqueue.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    worker.abort();
}

#[tokio::test]
async fn exhausted_retries_requeue_with_the_incremented_counter() {
    let (queue, store) = queue_with("q4", |config| {
        config.ack_enabled = true;
    });
    let producer = Producer::new(queue.clone());

    let calls = Arc::new(AtomicU32::new(0));
    let gate = Arc::new(Semaphore::new(0));
    let failing = {
        let calls = calls.clone();
        let gate = gate.clone();
        producer
            .register_task_with(
                "failing",
                TaskOptions {
                    max_retry_count: Some(1),
                    ..Default::default()
                },
                move |_args, _kwargs| {
                    let calls = calls.clone();
                    let gate = gate.clone();
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) + 1 <= 2 {
                            Err("always".into())
                        } else {
                            // Third invocation is the redelivered copy; park
                            // it so the in-flight record can be inspected.
                            gate.acquire().await.unwrap().forget();
                            Ok(json!(null))
                        }
                    }
                },
            )
            .unwrap()
    };

    failing.delay(vec![], no_kwargs()).await.unwrap();
    let consumer = Consumer::new(queue.clone());
    let worker = tokio::spawn(async move { consumer.run().await });

    // Two invocations exhaust max_retry_count = 1; no_ack then requeues and
    // the next pop re-dispatches.
    wait_for_calls(&calls, 3).await;
    wait_for_hash_len(&store, &ack_hash_key("q4"), 1).await;

    let entries = store.hash_get_all(&ack_hash_key("q4")).await.unwrap();
    let entry: Value = serde_json::from_slice(&entries[0].1).unwrap();
    assert_eq!(entry["retry_count"], json!(2));
    assert_eq!(queue.size().await.unwrap(), 0);

    worker.abort();
}

#[tokio::test]
async fn single_attempt_when_max_retry_count_is_zero() {
    let (queue, store) = queue_with("q4a", |config| {
        config.ack_enabled = true;
    });
    let producer = Producer::new(queue.clone());

    let calls = Arc::new(AtomicU32::new(0));
    let gate = Arc::new(Semaphore::new(0));
    let task = {
        let calls = calls.clone();
        let gate = gate.clone();
        producer
            .register_task_with(
                "once",
                TaskOptions {
                    max_retry_count: Some(0),
                    ..Default::default()
                },
                move |_args, _kwargs| {
                    let calls = calls.clone();
                    let gate = gate.clone();
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) + 1 == 1 {
                            Err("boom".into())
                        } else {
                            gate.acquire().await.unwrap().forget();
                            Ok(json!(null))
                        }
                    }
                },
            )
            .unwrap()
    };

    task.delay(vec![], no_kwargs()).await.unwrap();
    let consumer = Consumer::new(queue.clone());
    let worker = tokio::spawn(async move { consumer.run().await });

    // One failed attempt, immediate no_ack, one redelivery.
    wait_for_calls(&calls, 2).await;
    wait_for_hash_len(&store, &ack_hash_key("q4a"), 1).await;
    let entries = store.hash_get_all(&ack_hash_key("q4a")).await.unwrap();
    let entry: Value = serde_json::from_slice(&entries[0].1).unwrap();
    assert_eq!(entry["retry_count"], json!(1));

    worker.abort();
}

#[tokio::test]
async fn exhausted_retries_without_ack_drop_the_message() {
    let (queue, store) = queue_with("q4b", |_| {});
    let producer = Producer::new(queue.clone());

    let calls = Arc::new(AtomicU32::new(0));
    let failing = {
        let calls = calls.clone();
        producer
            .register_task_with(
                "failing",
                TaskOptions {
                    max_retry_count: Some(1),
                    ..Default::default()
                },
                move |_args, _kwargs| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err::<Value, _>("always".into())
                    }
                },
            )
            .unwrap()
    };

    failing.delay(vec![], no_kwargs()).await.unwrap();
    let consumer = Consumer::new(queue.clone());
    let worker = tokio::spawn(async move { consumer.run().await });

    wait_for_calls(&calls, 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // No redelivery with acks disabled; the message is gone.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(queue.size().await.unwrap(), 0);
    assert!(!store.key_exists(&ack_hash_key("q4b")).await.unwrap());

    worker.abort();
}

#[tokio::test]
async fn reaper_redelivers_while_a_slow_task_still_runs() {
    let (queue, store) = queue_with("q5", |config| {
        config.ack_enabled = true;
        config.ack_timeout = 1;
        config.check_interval = Duration::from_secs(1);
    });
    let producer = Producer::new(queue.clone());

    let calls = Arc::new(AtomicU32::new(0));
    let gate = Arc::new(Semaphore::new(0));
    let slow = {
        let calls = calls.clone();
        let gate = gate.clone();
        producer
            .register_task("slow", move |_args, _kwargs| {
                let calls = calls.clone();
                let gate = gate.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    gate.acquire().await.unwrap().forget();
                    Ok(json!("finally"))
                }
            })
            .unwrap()
    };

    slow.delay(vec![], no_kwargs()).await.unwrap();
    let consumer = Consumer::new(queue.clone());
    let worker = tokio::spawn(async move { consumer.run().await });

    wait_for_calls(&calls, 1).await;

    // While the first execution is still parked, the reaper times the entry
    // out and a second copy of the envelope lands on the list.
    wait_for_queue_size(&queue, 1).await;
    wait_for_hash_len(&store, &ack_hash_key("q5"), 0).await;

    // Let both executions finish. Duplicate execution is the documented
    // at-least-once outcome; the late ack hits an already-absent field.
    gate.add_permits(2);
    wait_for_calls(&calls, 2).await;
    wait_for_queue_size(&queue, 0).await;
    wait_for_hash_len(&store, &ack_hash_key("q5"), 0).await;

    worker.abort();
}

#[tokio::test]
async fn crash_between_entry_and_completion_is_recovered() {
    let (queue, store) = queue_with("q6", |config| {
        config.ack_enabled = true;
        config.ack_timeout = 1;
        config.check_interval = Duration::from_secs(1);
    });
    let producer = Producer::new(queue.clone());

    let calls = Arc::new(AtomicU32::new(0));
    let wedged = Arc::new(AtomicBool::new(true));
    let task = {
        let calls = calls.clone();
        let wedged = wedged.clone();
        producer
            .register_task("recoverable", move |_args, _kwargs| {
                let calls = calls.clone();
                let wedged = wedged.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if wedged.load(Ordering::SeqCst) {
                        std::future::pending::<()>().await;
                    }
                    Ok(json!("recovered"))
                }
            })
            .unwrap()
    };

    task.delay(vec![], no_kwargs()).await.unwrap();

    let first = Consumer::new(queue.clone());
    let worker = tokio::spawn(async move { first.run().await });
    wait_for_calls(&calls, 1).await;
    wait_for_hash_len(&store, &ack_hash_key("q6"), 1).await;

    // Kill the consumer mid-execution; the in-flight entry survives it.
    worker.abort();
    wedged.store(false, Ordering::SeqCst);

    let second = Consumer::new(queue.clone());
    let worker = tokio::spawn(async move { second.run().await });

    // The replacement's reaper redelivers within ack_timeout + interval.
    wait_for_calls(&calls, 2).await;
    wait_for_hash_len(&store, &ack_hash_key("q6"), 0).await;
    assert_eq!(queue.size().await.unwrap(), 0);

    worker.abort();
}

#[tokio::test]
async fn unknown_handler_is_kept_in_flight_for_the_reaper() {
    let (queue, store) = queue_with("q7", |config| {
        config.ack_enabled = true;
        config.ack_timeout = 60;
    });

    // Nothing registered under this ident on the consuming side.
    let envelope = Envelope::new("q7:missing".to_owned(), vec![], no_kwargs(), 60, 0);
    queue.push(&envelope).await.unwrap();

    let consumer = Consumer::new(queue.clone());
    let worker = tokio::spawn(async move { consumer.run().await });

    wait_for_hash_len(&store, &ack_hash_key("q7"), 1).await;
    assert_eq!(queue.size().await.unwrap(), 0);

    worker.abort();
}

/// Delegates to a [`MemoryStore`], failing the first `failures` calls to
/// `hash_set` as if the connection dropped.
struct FlakyStore {
    inner: MemoryStore,
    hash_set_failures: AtomicU32,
}

impl FlakyStore {
    fn new(failures: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            hash_set_failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn list_push_left(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.inner.list_push_left(key, value).await
    }

    async fn list_pop_right_blocking(&self, key: &str) -> Result<Vec<u8>> {
        self.inner.list_pop_right_blocking(key).await
    }

    async fn list_length(&self, key: &str) -> Result<usize> {
        self.inner.list_length(key).await
    }

    async fn hash_set(&self, key: &str, field: &str, value: Vec<u8>) -> Result<()> {
        if self.hash_set_failures.load(Ordering::SeqCst) > 0 {
            self.hash_set_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::store(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "injected hash_set failure",
            )));
        }
        self.inner.hash_set(key, field, value).await
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        self.inner.hash_get(key, field).await
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.inner.hash_get_all(key).await
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<()> {
        self.inner.hash_delete(key, field).await
    }

    async fn key_exists(&self, key: &str) -> Result<bool> {
        self.inner.key_exists(key).await
    }
}

#[tokio::test]
async fn entry_failure_requeues_the_popped_message() {
    let store = Arc::new(FlakyStore::new(1));
    let mut config = QueueConfig::new("q9");
    config.ack_enabled = true;
    let queue = Queue::new(config, store.clone());
    let producer = Producer::new(queue.clone());

    let calls = Arc::new(AtomicU32::new(0));
    let task = {
        let calls = calls.clone();
        producer
            .register_task("steady", move |_args, _kwargs| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(null))
                }
            })
            .unwrap()
    };

    task.delay(vec![], no_kwargs()).await.unwrap();
    let consumer = Consumer::new(queue.clone());
    let worker = tokio::spawn(async move { consumer.run().await });

    // The first dispatch pops the message but cannot record it in-flight;
    // it must land back on the list and succeed on redelivery.
    wait_for_calls(&calls, 1).await;
    wait_for_queue_size(&queue, 0).await;
    assert!(!store.key_exists(&ack_hash_key("q9")).await.unwrap());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    worker.abort();
}

#[tokio::test]
async fn pop_blocks_on_an_empty_list() {
    let (queue, _store) = queue_with("q8", |_| {});
    let blocked = tokio::time::timeout(Duration::from_millis(200), queue.pop()).await;
    assert!(blocked.is_err());
}
