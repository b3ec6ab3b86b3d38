use crate::model::task::Task;

/// User extension points, registered on the worker context before start.
///
/// Returning `false` from a hook is the only cancellation signal the
/// pipeline understands; panics and other failures inside user code must
/// not cross this boundary.
pub trait Hooks: Send + Sync {
    /// Called after a task is dequeued, before download. `false` drops it.
    fn on_start_task(&self, _task: &Task) -> bool {
        true
    }

    /// Called right before the fetch collaborator runs. `false` skips the
    /// download and discards the task.
    fn before_download(&self, _task: &Task) -> bool {
        true
    }

    /// Called with the downloaded body before forwarding. `false` drops
    /// the result instead of forwarding it to the parser.
    fn after_download(&self, _task: &Task, _data: &[u8]) -> bool {
        true
    }

    /// Called for every normalized sub-URL the parser discovered.
    /// `false` rejects the URL before dedup and admission run.
    fn on_discover_url(&self, _task: &Task, _url: &str) -> bool {
        true
    }
}

/// Default hook set: accepts everything.
pub struct NoopHooks;

impl Hooks for NoopHooks {}
