use crate::context::WorkerContext;
use async_trait::async_trait;
use common::model::task::{Task, validate_url};
use common::sink::TaskSink;
use lock::simple::KeyGuard;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

/// Key every producer contends on when admission is lock-protected.
pub const ADMISSION_LOCK_KEY: &str = "pushtask";

const OVERFLOW_BACKOFF: Duration = Duration::from_millis(500);
const LOCK_WAIT: Duration = Duration::from_secs(5);

/// Queue admission. `create_task` is the single gate every new task
/// passes through: URL validation, queue-length cap, optional lock
/// serialization, dedup, then push.
///
/// No error crosses this boundary. Every failure, infrastructure ones
/// included, is logged and collapses to `None`.
pub struct Admission {
    ctx: Arc<WorkerContext>,
}

impl Admission {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Admission { ctx }
    }

    pub async fn create_task(&self, task: Task) -> Option<Uuid> {
        if !validate_url(&task.url) {
            info!("rejecting task with invalid url: {}", task.url);
            return None;
        }

        if self.over_length().await {
            // Back off so a hot producer loop does not hammer the
            // length check.
            sleep(OVERFLOW_BACKOFF).await;
            warn!("queue at capacity, rejecting {}", task.url);
            return None;
        }

        // Length re-check and dedup-then-push only race across
        // processes, so the lock is only taken when more than one
        // worker is configured.
        let guard = if self.ctx.config.crawl.worker_count > 1 {
            match self.ctx.lock.acquire(ADMISSION_LOCK_KEY, LOCK_WAIT).await {
                Ok(guard) => Some(guard),
                Err(e) => {
                    warn!("admission lock unavailable: {e}");
                    return None;
                }
            }
        } else {
            None
        };

        let locked = guard.is_some();
        let admitted = self.admit(task, locked).await;
        self.release(guard).await;
        admitted
    }

    async fn admit(&self, mut task: Task, locked: bool) -> Option<Uuid> {
        if locked && self.over_length().await {
            sleep(OVERFLOW_BACKOFF).await;
            warn!("queue reached capacity under lock, rejecting {}", task.url);
            return None;
        }

        if !task.dedup_disabled() {
            match self.ctx.dedup.has(&task.url).await {
                Ok(true) => {
                    debug!("duplicate url rejected: {}", task.url);
                    metrics::counter!("admission_duplicates_total").increment(1);
                    return None;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("dedup check failed for {}: {e}", task.url);
                    return None;
                }
            }
            if let Err(e) = self.ctx.dedup.add(&task.url).await {
                warn!("dedup mark failed for {}: {e}", task.url);
                return None;
            }
        }

        task.id = Uuid::new_v4();
        let payload = match serde_json::to_vec(&task) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("task serialization failed: {e}");
                return None;
            }
        };

        match self
            .ctx
            .broker
            .push(self.ctx.queue_name(), &payload)
            .await
        {
            Ok(Some(_)) => {
                metrics::counter!("admission_tasks_total").increment(1);
                debug!("task {} admitted for {}", task.id, task.url);
                Some(task.id)
            }
            Ok(None) => {
                warn!("broker rejected task for {}", task.url);
                None
            }
            Err(e) => {
                warn!("push failed for {}: {e}", task.url);
                None
            }
        }
    }

    async fn over_length(&self) -> bool {
        let max = self.ctx.config.queue.max_queue_length;
        if max == 0 {
            return false;
        }
        match self.ctx.broker.llen(self.ctx.queue_name()).await {
            Ok(len) => len >= max,
            Err(e) => {
                warn!("queue length check failed: {e}");
                true
            }
        }
    }

    async fn release(&self, guard: Option<KeyGuard>) {
        if let Some(guard) = guard
            && let Err(e) = self.ctx.lock.release(guard).await
        {
            warn!("admission lock release failed: {e}");
        }
    }
}

#[async_trait]
impl TaskSink for Admission {
    async fn create_task(&self, task: Task) -> Option<Uuid> {
        Admission::create_task(self, task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::model::config::Config;
    use dedup::MemoryBloom;
    use queue::MemoryBroker;

    fn context(config: Config) -> Arc<WorkerContext> {
        let mut ctx = WorkerContext::from_config(config).unwrap();
        ctx = ctx
            .with_broker(Arc::new(MemoryBroker::new()))
            .with_dedup(Arc::new(MemoryBloom::new(1 << 16, 4).unwrap()));
        Arc::new(ctx)
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let admission = Admission::new(context(Config::default()));
        assert!(admission.create_task(Task::new("not-a-url")).await.is_none());
        assert!(admission.create_task(Task::new("ftp://x.com/")).await.is_none());
    }

    #[tokio::test]
    async fn test_admission_pushes_decodable_payload() {
        let ctx = context(Config::default());
        let admission = Admission::new(ctx.clone());

        let id = admission
            .create_task(Task::new("http://example.com/a"))
            .await
            .unwrap();
        assert_eq!(ctx.broker.llen("arachne").await.unwrap(), 1);

        let delivery = ctx.broker.pop("arachne", false).await.unwrap().unwrap();
        let task: Task = serde_json::from_slice(&delivery.payload).unwrap();
        assert_eq!(task.id, id);
        assert_eq!(task.url, "http://example.com/a");
    }

    #[tokio::test]
    async fn test_duplicate_url_rejected() {
        let admission = Admission::new(context(Config::default()));
        assert!(
            admission
                .create_task(Task::new("http://example.com/dup"))
                .await
                .is_some()
        );
        assert!(
            admission
                .create_task(Task::new("http://example.com/dup"))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_dedup_opt_out() {
        let admission = Admission::new(context(Config::default()));
        let task = Task::new("http://example.com/again").add_context("do_dedup", false);
        assert!(admission.create_task(task.clone()).await.is_some());
        assert!(admission.create_task(task).await.is_some());
    }

    #[tokio::test]
    async fn test_max_length_stops_admission() {
        let mut config = Config::default();
        config.queue.max_queue_length = 2;
        let ctx = context(config);
        let admission = Admission::new(ctx.clone());

        assert!(admission.create_task(Task::new("http://e.com/1")).await.is_some());
        assert!(admission.create_task(Task::new("http://e.com/2")).await.is_some());
        assert!(admission.create_task(Task::new("http://e.com/3")).await.is_none());
        assert_eq!(ctx.broker.llen("arachne").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_lock_protected_admission() {
        let mut config = Config::default();
        config.crawl.worker_count = 4;
        let admission = Admission::new(context(config));
        assert!(
            admission
                .create_task(Task::new("http://example.com/locked"))
                .await
                .is_some()
        );
    }
}
