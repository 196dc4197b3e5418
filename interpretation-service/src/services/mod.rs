pub mod database;
pub mod lifecycle;
pub mod memory;
pub mod metrics;
pub mod storage;
pub mod store;

pub use database::PgTaskStore;
pub use lifecycle::LifecycleService;
pub use memory::MemoryTaskStore;
pub use storage::{LocalStorage, Storage};
pub use store::TaskStore;
