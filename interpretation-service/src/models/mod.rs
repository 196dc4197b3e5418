pub mod listing;
pub mod task;

pub use listing::{PageRequest, TaskFilter, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use task::{
    generate_task_id, FenceState, Progress, ProgressParseError, Task, TaskContext, TaskStatus,
    TaskWrite, UpsertPolicy, WriteOutcome,
};
