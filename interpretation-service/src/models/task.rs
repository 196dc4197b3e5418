//! Task model: one row per interpretation request.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
}

impl TaskStatus {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Localized label shown by the client UI.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending | Self::Processing => "解读中",
            Self::Succeeded => "完成",
            Self::Failed => "失败",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "succeeded" | "完成" => Ok(Self::Succeeded),
            "failed" | "失败" => Ok(Self::Failed),
            other => Err(format!("Invalid task status: {}", other)),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProgressParseError {
    #[error("progress must look like \"42%\", got {0:?}")]
    Malformed(String),
    #[error("progress {0}% is above 100%")]
    OutOfRange(u32),
}

/// Completion percentage, stored and rendered as `"NN%"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Progress(u8);

impl Progress {
    pub const ZERO: Progress = Progress(0);
    pub const COMPLETE: Progress = Progress(100);

    pub fn new(percent: u8) -> Option<Self> {
        (percent <= 100).then_some(Self(percent))
    }

    /// Progress after `step` of `total` steps, rounded down.
    pub fn from_step(step: u32, total: u32) -> Self {
        if total == 0 {
            return Self::COMPLETE;
        }
        let pct = (u64::from(step.min(total)) * 100) / u64::from(total);
        Self(pct as u8)
    }

    pub fn percent(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

impl FromStr for Progress {
    type Err = ProgressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .trim()
            .strip_suffix('%')
            .ok_or_else(|| ProgressParseError::Malformed(s.to_string()))?;
        let value: u32 = digits
            .trim()
            .parse()
            .map_err(|_| ProgressParseError::Malformed(s.to_string()))?;
        if value > 100 {
            return Err(ProgressParseError::OutOfRange(value));
        }
        Ok(Self(value as u8))
    }
}

impl TryFrom<String> for Progress {
    type Error = ProgressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Serialize for Progress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Progress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Classification fields supplied at submission and carried by every
/// lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContext {
    pub task_name: String,
    pub company: String,
    pub scene: String,
}

/// Persisted task row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub task_name: String,
    pub company: String,
    pub scene: String,
    #[sqlx(try_from = "String")]
    pub progress: Progress,
    pub status: TaskStatus,
    pub result_content: Option<String>,
    pub edited_content: Option<String>,
    pub attempt: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Build a row from a write, as it looks right after insertion.
    pub fn from_write(write: &TaskWrite, now: DateTime<Utc>) -> Self {
        Self {
            task_id: write.task_id.clone(),
            task_name: write.context.task_name.clone(),
            company: write.context.company.clone(),
            scene: write.context.scene.clone(),
            progress: write.progress,
            status: write.status,
            result_content: write.result_content.clone(),
            edited_content: None,
            attempt: write.attempt,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn context(&self) -> TaskContext {
        TaskContext {
            task_name: self.task_name.clone(),
            company: self.company.clone(),
            scene: self.scene.clone(),
        }
    }

    pub fn fence(&self) -> FenceState {
        FenceState {
            attempt: self.attempt,
            status: self.status,
            progress: self.progress,
        }
    }

    /// Overwrite the lifecycle fields. `edited_content` and `created_at` are
    /// never touched by lifecycle writes.
    pub fn apply(&mut self, write: &TaskWrite, now: DateTime<Utc>) {
        self.task_name = write.context.task_name.clone();
        self.company = write.context.company.clone();
        self.scene = write.context.scene.clone();
        self.status = write.status;
        self.progress = write.progress;
        if let Some(result) = &write.result_content {
            self.result_content = Some(result.clone());
        }
        self.attempt = write.attempt;
        self.updated_at = now;
    }
}

/// The part of a row the fencing rule looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub struct FenceState {
    pub attempt: i32,
    pub status: TaskStatus,
    #[sqlx(try_from = "String")]
    pub progress: Progress,
}

/// Lifecycle fields written by one transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskWrite {
    pub task_id: String,
    pub context: TaskContext,
    pub status: TaskStatus,
    pub progress: Progress,
    /// `None` leaves the stored result untouched.
    pub result_content: Option<String>,
    /// Worker attempt that issued the write; `0` for submissions.
    pub attempt: i32,
}

impl TaskWrite {
    /// Whether this write may replace `current`.
    ///
    /// A newer attempt always wins. Within the same attempt a succeeded row is
    /// final and progress may not go backwards. Older attempts are stale.
    pub fn is_admitted_over(&self, current: &FenceState) -> bool {
        if self.attempt != current.attempt {
            return self.attempt > current.attempt;
        }
        if current.status == TaskStatus::Succeeded {
            return self.status == TaskStatus::Succeeded && self.progress == current.progress;
        }
        self.progress >= current.progress
    }
}

/// How an upsert treats a missing row and the fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertPolicy {
    /// Insert or overwrite unconditionally.
    Reset,
    /// Update an existing, admitted row; never insert.
    Fenced,
    /// Update an admitted row, or insert when missing.
    FencedOrInsert,
}

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    Updated,
    Missing,
    Stale,
}

impl WriteOutcome {
    pub fn is_applied(self) -> bool {
        matches!(self, Self::Inserted | Self::Updated)
    }
}

/// Generates `T<YYYYMMDDHHMMSS><4 uppercase hex chars>`.
///
/// The timestamp alone is not unique within a second; the suffix makes a
/// collision unlikely but not impossible.
pub fn generate_task_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..4].to_uppercase();
    format!("T{}{}", Local::now().format("%Y%m%d%H%M%S"), suffix)
}
