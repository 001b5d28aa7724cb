use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::orchestrator::{build_tool_args, determine_tool};
use crate::planning::Plan;
use crate::schemas::Principal;
use crate::tools::ToolRegistry;
use crate::utils::truncate_chars;

use super::{StepExecution, WorkflowError};

/// Opaque pre-execution snapshots. What a snapshot covers is the store's
/// concern; the executor only needs an id it can restore by.
#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn snapshot(&self, session_id: &str) -> Result<String, WorkflowError>;

    async fn restore(&self, backup_id: &str) -> Result<(), WorkflowError>;
}

/// Backup store that snapshots the filesystem-tool sandbox by copying it
/// aside, the only mutable surface the engine owns.
pub struct DirBackupStore {
    sandbox_root: PathBuf,
    backup_root: PathBuf,
}

impl DirBackupStore {
    pub fn new(sandbox_root: impl Into<PathBuf>, backup_root: impl Into<PathBuf>) -> Self {
        Self {
            sandbox_root: sandbox_root.into(),
            backup_root: backup_root.into(),
        }
    }

    fn copy_dir(from: &std::path::Path, to: &std::path::Path) -> std::io::Result<()> {
        std::fs::create_dir_all(to)?;
        for entry in std::fs::read_dir(from)? {
            let entry = entry?;
            let target = to.join(entry.file_name());
            if entry.file_type()?.is_dir() {
                Self::copy_dir(&entry.path(), &target)?;
            } else {
                std::fs::copy(entry.path(), target)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BackupStore for DirBackupStore {
    async fn snapshot(&self, session_id: &str) -> Result<String, WorkflowError> {
        let backup_id = format!("backup_{session_id}_{}", &Uuid::new_v4().simple().to_string()[..8]);
        let source = self.sandbox_root.clone();
        let target = self.backup_root.join(&backup_id);

        tokio::task::spawn_blocking(move || {
            if source.exists() {
                Self::copy_dir(&source, &target)
            } else {
                std::fs::create_dir_all(&target)
            }
        })
        .await
        .map_err(|e| WorkflowError::Backup(e.to_string()))?
        .map_err(|e| WorkflowError::Backup(e.to_string()))?;

        log::info!("Created backup: {backup_id}");
        Ok(backup_id)
    }

    async fn restore(&self, backup_id: &str) -> Result<(), WorkflowError> {
        let source = self.backup_root.join(backup_id);
        let target = self.sandbox_root.clone();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            if target.exists() {
                std::fs::remove_dir_all(&target)?;
            }
            Self::copy_dir(&source, &target)
        })
        .await
        .map_err(|e| WorkflowError::Backup(e.to_string()))?
        .map_err(|e| WorkflowError::Backup(e.to_string()))?;

        log::info!("Restored backup: {backup_id}");
        Ok(())
    }
}

/// In-memory backup store for tests and stateless deployments: snapshots
/// are ids only, restores are recorded.
#[derive(Default)]
pub struct RecordingBackupStore {
    pub snapshots: Mutex<Vec<String>>,
    pub restores: Mutex<Vec<String>>,
    pub fail_restore: std::sync::atomic::AtomicBool,
}

impl RecordingBackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_restores(self) -> Self {
        self.fail_restore
            .store(true, std::sync::atomic::Ordering::Relaxed);
        self
    }
}

#[async_trait]
impl BackupStore for RecordingBackupStore {
    async fn snapshot(&self, session_id: &str) -> Result<String, WorkflowError> {
        let backup_id = format!("backup_{session_id}_{}", &Uuid::new_v4().simple().to_string()[..8]);
        self.snapshots.lock().await.push(backup_id.clone());
        Ok(backup_id)
    }

    async fn restore(&self, backup_id: &str) -> Result<(), WorkflowError> {
        if self.fail_restore.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(WorkflowError::Backup(format!(
                "restore of {backup_id} failed"
            )));
        }
        self.restores.lock().await.push(backup_id.to_string());
        Ok(())
    }
}

/// What a full plan execution produced, and whether it ended fatally.
pub struct PlanRunOutcome {
    pub results: Vec<StepExecution>,
    /// True when a backup restore itself failed; the session must error.
    pub fatal: bool,
}

/// Executes workflow plans step by step with snapshot, verification and
/// rollback around every tool invocation.
pub struct WorkflowExecutor {
    registry: Arc<ToolRegistry>,
    backups: Arc<dyn BackupStore>,
}

impl WorkflowExecutor {
    pub fn new(registry: Arc<ToolRegistry>, backups: Arc<dyn BackupStore>) -> Self {
        Self { registry, backups }
    }

    pub fn backups(&self) -> &Arc<dyn BackupStore> {
        &self.backups
    }

    /// Steps run strictly in order. A failed step whose backup restored
    /// cleanly is non-fatal; a failed restore stops the run.
    pub async fn execute_plan(
        &self,
        plan: &Plan,
        session_id: &str,
        principal: &Principal,
        cancel: &CancellationToken,
    ) -> Result<PlanRunOutcome, WorkflowError> {
        log::info!(
            "Executing plan with {} steps for session {session_id}",
            plan.steps.len()
        );
        let mut results = Vec::new();

        for id in plan.execution_order() {
            let Some(step) = plan.step(id) else {
                continue;
            };
            if cancel.is_cancelled() {
                return Err(WorkflowError::Cancelled);
            }

            let result = self.execute_step(step, session_id, principal, cancel).await?;
            let fatal = !result.success && !result.backup_restored;
            results.push(result);

            if fatal {
                log::error!("Step {id} failed fatally, stopping execution");
                return Ok(PlanRunOutcome {
                    results,
                    fatal: true,
                });
            }
        }

        Ok(PlanRunOutcome {
            results,
            fatal: false,
        })
    }

    async fn execute_step(
        &self,
        step: &crate::planning::Step,
        session_id: &str,
        principal: &Principal,
        cancel: &CancellationToken,
    ) -> Result<StepExecution, WorkflowError> {
        let started = Instant::now();
        let backup_id = self.backups.snapshot(session_id).await?;

        let tool_name = if step.tool == "auto" {
            determine_tool(&step.action).to_string()
        } else {
            step.tool.clone()
        };
        log::info!("Step {}: using tool {tool_name}", step.id);

        let args = build_tool_args(&tool_name, &step.action);
        let result = self
            .registry
            .execute_tool(&tool_name, principal, args, cancel)
            .await;

        let elapsed = started.elapsed().as_millis() as u64;

        if !result.success {
            let restored = self.try_restore(&backup_id).await;
            return Ok(StepExecution {
                step_id: step.id,
                tool: tool_name,
                success: false,
                output: None,
                error: result.error,
                backup_id,
                backup_restored: restored,
                verification_passed: false,
                execution_time_ms: elapsed,
            });
        }

        let output_text = match &result.output {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        if let Err(reason) = Self::verify_output(&result.output, &step.expected_outcome) {
            log::warn!("Verification failed for step {}: {reason}", step.id);
            let restored = self.try_restore(&backup_id).await;
            return Ok(StepExecution {
                step_id: step.id,
                tool: tool_name,
                success: false,
                output: Some(truncate_chars(&output_text, 500).to_string()),
                error: Some(format!("Verification failed: {reason}")),
                backup_id,
                backup_restored: restored,
                verification_passed: false,
                execution_time_ms: elapsed,
            });
        }

        Ok(StepExecution {
            step_id: step.id,
            tool: tool_name,
            success: true,
            output: Some(truncate_chars(&output_text, 500).to_string()),
            error: None,
            backup_id,
            backup_restored: false,
            verification_passed: true,
            execution_time_ms: elapsed,
        })
    }

    async fn try_restore(&self, backup_id: &str) -> bool {
        match self.backups.restore(backup_id).await {
            Ok(()) => true,
            Err(e) => {
                log::error!("Backup restore failed: {e}");
                false
            }
        }
    }

    /// Output must exist and be error-free to count as verified.
    fn verify_output(output: &Value, _expected_outcome: &str) -> Result<(), String> {
        match output {
            Value::Null => Err("No output generated".into()),
            Value::String(s) if s.trim().is_empty() => Err("No output generated".into()),
            Value::Object(map) => match map.get("error") {
                Some(Value::Null) | None => Ok(()),
                Some(error) => Err(format!("Tool returned error: {error}")),
            },
            _ => Ok(()),
        }
    }
}
