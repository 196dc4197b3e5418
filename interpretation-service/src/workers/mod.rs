pub mod interpreter;
pub mod job;
pub mod orchestrator;
pub mod retry;

pub use interpreter::{Interpreter, MockInterpreter, StepOutcome};
pub use job::{Delivery, InterpretationJob};
pub use orchestrator::{JobQueue, RunOutcome, WorkerOrchestrator};
pub use retry::RetryPolicy;
