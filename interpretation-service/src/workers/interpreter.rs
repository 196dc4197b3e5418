//! Interpretation step function and its mocked implementation.

use crate::config::WorkerConfig;
use crate::models::Progress;
use crate::services::Storage;
use crate::workers::job::InterpretationJob;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Result of one interpretation step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// More steps follow; the task has reached this progress.
    Continue(Progress),
    /// Interpretation finished with this result document.
    Succeeded(Value),
    Failed { reason: String, retryable: bool },
    /// The step reached `progress`, then hit a retryable fault.
    Faulted { progress: Progress, reason: String },
}

impl StepOutcome {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            retryable: true,
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            retryable: false,
        }
    }
}

/// Interprets a job one step at a time. Steps are numbered from 1; the runner
/// keeps calling until an outcome other than `Continue` comes back.
#[async_trait]
pub trait Interpreter: Send + Sync {
    async fn step(&self, job: &InterpretationJob, step: u32) -> StepOutcome;
}

/// Stand-in for the document model: sleeps through `total_steps` steps,
/// occasionally faults, then returns a synthetic policy summary.
pub struct MockInterpreter {
    storage: Arc<dyn Storage>,
    total_steps: u32,
    step_delay: (Duration, Duration),
    fault_rate: f64,
}

impl MockInterpreter {
    pub fn new(config: &WorkerConfig, storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            total_steps: config.total_steps.max(1),
            step_delay: config.step_delay_range(),
            fault_rate: config.fault_rate.clamp(0.0, 1.0),
        }
    }

    async fn check_inputs(&self, job: &InterpretationJob) -> Option<StepOutcome> {
        for key in job.input_keys() {
            match self.storage.exists(key).await {
                Ok(true) => {}
                Ok(false) => return Some(StepOutcome::fatal(format!("Uploaded file {} is missing", key))),
                Err(e) => return Some(StepOutcome::retryable(format!("Failed to read {}: {}", key, e))),
            }
        }
        None
    }

    fn step_delay(&self) -> Duration {
        let (min, max) = self.step_delay;
        if max <= min {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }

    fn faulted(&self) -> bool {
        self.fault_rate > 0.0 && rand::thread_rng().gen_bool(self.fault_rate)
    }
}

#[async_trait]
impl Interpreter for MockInterpreter {
    async fn step(&self, job: &InterpretationJob, step: u32) -> StepOutcome {
        if step == 1 {
            if let Some(failure) = self.check_inputs(job).await {
                return failure;
            }
        }

        if step > self.total_steps {
            return StepOutcome::Succeeded(mock_result(job));
        }

        let delay = self.step_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let progress = Progress::from_step(step, self.total_steps);
        if self.faulted() {
            return StepOutcome::Faulted {
                progress,
                reason: format!("Simulated processing error at step {}", step),
            };
        }

        StepOutcome::Continue(progress)
    }
}

fn mock_result(job: &InterpretationJob) -> Value {
    let mut rng = rand::thread_rng();

    let insured_count: u32 = rng.gen_range(50..=500);
    let premium: u64 = rng.gen_range(100_000..=500_000);
    let main_coverage = ["门诊医疗", "住院医疗", "重疾保障", "意外伤害"]
        .choose(&mut rng)
        .copied()
        .unwrap_or("住院医疗");
    let deductible = [0u64, 100, 500, 1000].choose(&mut rng).copied().unwrap_or(0);
    let reimbursement = [80u32, 90, 100].choose(&mut rng).copied().unwrap_or(100);
    let processing_secs: f64 = rng.gen_range(2.5..5.1);
    let confidence: f64 = rng.gen_range(85.0..98.0);

    json!({
        "task_id": job.task_id,
        "task_name": job.context.task_name,
        "company": job.context.company,
        "scene": job.context.scene,
        "interpretation_result": {
            "policy_info": {
                "policy_number": format!("POL-{}", job.task_id),
                "policy_type": job.context.scene,
                "effective_date": "2025-01-01",
                "expiry_date": "2026-01-01",
                "insured_count": insured_count,
                "premium_amount": format!("¥{}", group_thousands(premium)),
            },
            "coverage_details": {
                "main_coverage": main_coverage,
                "additional_coverage": ["就医绿通", "第二诊疗意见", "健康管理服务"],
                "deductible": format!("¥{}", group_thousands(deductible)),
                "reimbursement_ratio": format!("{}%", reimbursement),
            },
            "special_terms": [
                "等待期：30天",
                "医院范围：二级及以上公立医院",
                "理赔方式：先垫付后报销",
            ],
            "exclusions": ["既往症不保", "美容整形相关费用", "非治疗性体检费用"],
        },
        "processing_time": format!("{:.1}秒", processing_secs),
        "confidence_score": format!("{:.1}%", confidence),
        "recommendations": [
            "建议补充补充医疗保险",
            "可考虑增加重疾保额",
            "建议定期更新员工名单",
        ],
    })
}

/// `1234567` -> `"1,234,567"`.
fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
