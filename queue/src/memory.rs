use crate::{Broker, Delivery};
use async_trait::async_trait;
use dashmap::DashMap;
use errors::Result;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

const POP_WAIT: Duration = Duration::from_secs(1);

struct QueueState {
    items: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
}

/// In-process FIFO queue for single-worker deployments. No locking
/// against other processes is needed because there are none.
pub struct MemoryBroker {
    queues: DashMap<String, Arc<QueueState>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        MemoryBroker {
            queues: DashMap::new(),
        }
    }

    fn state(&self, queue: &str) -> Arc<QueueState> {
        self.queues
            .entry(queue.to_string())
            .or_insert_with(|| {
                Arc::new(QueueState {
                    items: Mutex::new(VecDeque::new()),
                    notify: Notify::new(),
                })
            })
            .value()
            .clone()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn push(&self, queue: &str, payload: &[u8]) -> Result<Option<String>> {
        let state = self.state(queue);
        state.items.lock().await.push_front(payload.to_vec());
        state.notify.notify_one();
        Ok(Some(Uuid::new_v4().to_string()))
    }

    async fn pop(&self, queue: &str, wait: bool) -> Result<Option<Delivery>> {
        let state = self.state(queue);

        if let Some(payload) = state.items.lock().await.pop_back() {
            return Ok(Some(Delivery { payload, tag: None }));
        }
        if !wait {
            return Ok(None);
        }

        let popped = tokio::time::timeout(POP_WAIT, async {
            loop {
                state.notify.notified().await;
                if let Some(payload) = state.items.lock().await.pop_back() {
                    return payload;
                }
            }
        })
        .await;

        Ok(popped.ok().map(|payload| Delivery { payload, tag: None }))
    }

    async fn llen(&self, queue: &str) -> Result<u64> {
        Ok(self.state(queue).items.lock().await.len() as u64)
    }

    async fn purge(&self, queue: &str) -> Result<()> {
        self.state(queue).items.lock().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let broker = MemoryBroker::new();
        broker.push("task", b"first").await.unwrap();
        broker.push("task", b"second").await.unwrap();
        broker.push("task", b"third").await.unwrap();

        assert_eq!(broker.llen("task").await.unwrap(), 3);
        let a = broker.pop("task", false).await.unwrap().unwrap();
        let b = broker.pop("task", false).await.unwrap().unwrap();
        let c = broker.pop("task", false).await.unwrap().unwrap();
        assert_eq!(a.payload, b"first");
        assert_eq!(b.payload, b"second");
        assert_eq!(c.payload, b"third");
        assert!(broker.pop("task", false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pop_wait_sees_concurrent_push() {
        let broker = Arc::new(MemoryBroker::new());
        let pusher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            pusher.push("task", b"late").await.unwrap();
        });
        let delivery = broker.pop("task", true).await.unwrap();
        assert_eq!(delivery.unwrap().payload, b"late");
    }

    #[tokio::test]
    async fn test_purge() {
        let broker = MemoryBroker::new();
        broker.push("task", b"x").await.unwrap();
        broker.push("task", b"y").await.unwrap();
        broker.purge("task").await.unwrap();
        assert_eq!(broker.llen("task").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_queues_are_independent() {
        let broker = MemoryBroker::new();
        broker.push("task", b"a").await.unwrap();
        assert_eq!(broker.llen("other").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_acknowledge_is_noop() {
        let broker = MemoryBroker::new();
        broker.acknowledge("task", "tag").await.unwrap();
    }
}
