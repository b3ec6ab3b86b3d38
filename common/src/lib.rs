pub mod hooks;
pub mod model;
pub mod sink;

pub use hooks::{Hooks, NoopHooks};
pub use sink::TaskSink;
pub use model::config::Config;
pub use model::frame::{BinaryType, Frame};
pub use model::task::{FieldRule, Task, validate_url};
