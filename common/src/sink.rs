use crate::model::task::Task;
use async_trait::async_trait;
use uuid::Uuid;

/// Admission seam between the parser and whatever owns the queue.
///
/// `create_task` never fails loudly: a rejected or failed admission is
/// `None`, logged by the implementor. The parser drops such sub-tasks
/// without retrying.
#[async_trait]
pub trait TaskSink: Send + Sync {
    async fn create_task(&self, task: Task) -> Option<Uuid>;
}
