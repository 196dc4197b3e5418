use crate::models::TaskContext;

/// Work item enqueued by a submission. Paths are storage keys relative to the
/// storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpretationJob {
    pub task_id: String,
    pub context: TaskContext,
    pub contract_path: Option<String>,
    pub image_paths: Vec<String>,
}

impl InterpretationJob {
    pub fn input_keys(&self) -> impl Iterator<Item = &str> {
        self.contract_path
            .iter()
            .chain(self.image_paths.iter())
            .map(String::as_str)
    }
}

/// One delivery of a job. `attempt` counts from 0; each redelivery after a
/// retryable failure increments it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub job: InterpretationJob,
    pub attempt: u32,
}

impl Delivery {
    pub fn first(job: InterpretationJob) -> Self {
        Self { job, attempt: 0 }
    }

    pub fn next(&self) -> Self {
        Self {
            job: self.job.clone(),
            attempt: self.attempt + 1,
        }
    }
}
