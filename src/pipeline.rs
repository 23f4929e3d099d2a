//! Sequential pipeline orchestration.
//!
//! Steps execute strictly one at a time in catalog order; a step never starts
//! before the previous one reached a terminal state. Completed steps leave a
//! marker under `.sbas/` so a re-invocation skips them instead of repeating
//! hours of interferometry, which makes "retry the whole run" the caller's
//! cheap recovery policy.
use crate::config::ConfigStore;
use crate::error::StepError;
use crate::steps::{registry, Invocation, StepContract};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{error, info, warn};

const MARKER_DIR: &str = ".sbas";
const CANCEL_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Skipped,
    Succeeded,
    Failed,
    NotAttempted,
}

#[derive(Debug, Serialize)]
pub struct StepResult {
    pub name: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StepResult {
    fn terminal(name: &str, status: StepStatus, detail: Option<String>) -> StepResult {
        StepResult {
            name: name.to_string(),
            status,
            started_at: None,
            ended_at: None,
            detail,
        }
    }
}

/// Per-run outcome log, owned by the orchestrator for one invocation.
#[derive(Debug, Default, Serialize)]
pub struct RunRecord {
    pub steps: Vec<StepResult>,
}

impl RunRecord {
    pub fn succeeded(&self) -> bool {
        !self
            .steps
            .iter()
            .any(|step| step.status == StepStatus::Failed)
    }

    pub fn failed_step(&self) -> Option<&StepResult> {
        self.steps
            .iter()
            .find(|step| step.status == StepStatus::Failed)
    }
}

#[derive(Debug, Default)]
pub struct RunOptions {
    /// Run exactly one named step, skipping the rest.
    pub only_step: Option<String>,
    pub dry_run: bool,
    pub resume: bool,
}

pub struct Orchestrator<'a> {
    cfg: &'a ConfigStore,
    workdir: PathBuf,
    steps: Vec<Box<dyn StepContract>>,
    cancel: Arc<AtomicBool>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(cfg: &'a ConfigStore, workdir: &Path) -> Orchestrator<'a> {
        Orchestrator {
            cfg,
            workdir: workdir.to_path_buf(),
            steps: registry(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    #[cfg(test)]
    fn with_steps(mut self, steps: Vec<Box<dyn StepContract>>) -> Orchestrator<'a> {
        self.steps = steps;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Orchestrator<'a> {
        self.cancel = cancel;
        self
    }

    fn marker_path(&self, step: &str) -> PathBuf {
        self.workdir.join(MARKER_DIR).join(format!("{step}.done"))
    }

    fn write_marker(&self, step: &str) -> Result<()> {
        let path = self.marker_path(step);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, format!("{}\n", Utc::now().to_rfc3339()))
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    fn log_dir(&self) -> Result<PathBuf> {
        let rel = self
            .cfg
            .get_opt_str("logging.log_dir")?
            .unwrap_or_else(|| "logs".to_string());
        Ok(self.workdir.join(rel))
    }

    /// Execute the run. Configuration resolution errors abort before any
    /// step; per-step failures land in the returned `RunRecord`.
    pub fn run(&self, opts: &RunOptions) -> Result<RunRecord> {
        if let Some(name) = &opts.only_step {
            if !self.steps.iter().any(|step| step.name() == name) {
                return Err(StepError::UnknownStep(name.clone()).into());
            }
        }

        // Resolve the whole enable set up front: malformed flags fail fast
        // before anything runs.
        let mut enabled = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            enabled.push(self.cfg.get_flag(&step.enabled_key())?);
        }
        let dry_run = opts.dry_run || self.cfg.get_flag("runtime.dry_run")?;
        let resume = opts.resume || self.cfg.get_flag("runtime.resume")?;
        let start_from = self.cfg.get_opt_str("runtime.start_from_step")?;
        let mut reached_start = !(resume && start_from.is_some());

        info!("pipeline run started in {}", self.workdir.display());
        let mut record = RunRecord::default();
        let mut aborted = false;
        for (step, step_enabled) in self.steps.iter().zip(enabled) {
            let name = step.name();
            if aborted {
                record.steps.push(StepResult::terminal(
                    name,
                    StepStatus::NotAttempted,
                    Some("upstream step failed".to_string()),
                ));
                continue;
            }
            if let Some(only) = &opts.only_step {
                if only != name {
                    record.steps.push(StepResult::terminal(
                        name,
                        StepStatus::Skipped,
                        Some("not selected (--step)".to_string()),
                    ));
                    continue;
                }
            }
            if !step_enabled {
                info!("skipping {name} (disabled in config)");
                record.steps.push(StepResult::terminal(
                    name,
                    StepStatus::Skipped,
                    Some("disabled in config".to_string()),
                ));
                continue;
            }
            if !reached_start {
                if start_from.as_deref() == Some(name) {
                    reached_start = true;
                } else {
                    info!("resuming: skipping {name}");
                    record.steps.push(StepResult::terminal(
                        name,
                        StepStatus::Skipped,
                        Some("before runtime.start_from_step".to_string()),
                    ));
                    continue;
                }
            }

            let artifacts = step.produces(self.cfg)?;
            if self.marker_path(name).is_file() {
                let stale: Vec<String> = artifacts
                    .iter()
                    .filter(|spec| !spec.is_satisfied(&self.workdir))
                    .map(|spec| spec.describe())
                    .collect();
                if stale.is_empty() {
                    info!("skipping {name} (already complete)");
                    record.steps.push(StepResult::terminal(
                        name,
                        StepStatus::Skipped,
                        Some("already complete".to_string()),
                    ));
                    continue;
                }
                // Marker without valid artifacts means a stale or tampered
                // working directory; rerun rather than falsely skip.
                warn!(
                    "{name}: completion marker present but {} invalid; re-running",
                    stale.join(", ")
                );
                fs::remove_file(self.marker_path(name)).ok();
            }

            if self.cancel.load(Ordering::SeqCst) {
                record.steps.push(StepResult::terminal(
                    name,
                    StepStatus::Failed,
                    Some("cancelled before invocation".to_string()),
                ));
                aborted = true;
                continue;
            }

            if dry_run {
                let invocation = step.build_invocation(self.cfg, &self.workdir);
                let detail = match invocation {
                    Ok(inv) => format!("dry-run: would execute\n{}", inv.script),
                    Err(err) => format!("dry-run: invocation would fail: {err}"),
                };
                info!("[dry-run] would execute {name}");
                record
                    .steps
                    .push(StepResult::terminal(name, StepStatus::Skipped, Some(detail)));
                continue;
            }

            info!("=== running {name} ===");
            let started_at = Utc::now();
            let outcome = self.execute_step(step.as_ref(), &artifacts);
            let ended_at = Utc::now();
            match outcome {
                Ok(()) => {
                    info!("completed {name}");
                    record.steps.push(StepResult {
                        name: name.to_string(),
                        status: StepStatus::Succeeded,
                        started_at: Some(started_at),
                        ended_at: Some(ended_at),
                        detail: None,
                    });
                }
                Err(err) => {
                    error!("step {name} failed: {err}");
                    record.steps.push(StepResult {
                        name: name.to_string(),
                        status: StepStatus::Failed,
                        started_at: Some(started_at),
                        ended_at: Some(ended_at),
                        detail: Some(err.to_string()),
                    });
                    aborted = true;
                }
            }
        }
        if record.succeeded() {
            info!("pipeline finished");
        }
        Ok(record)
    }

    fn execute_step(
        &self,
        step: &dyn StepContract,
        artifacts: &[crate::steps::ArtifactSpec],
    ) -> Result<(), StepError> {
        let name = step.name();
        for key in step.required_inputs() {
            if !self.cfg.contains(key) {
                return Err(StepError::MissingInput {
                    step: name.to_string(),
                    detail: format!("config key {key} is not set"),
                });
            }
        }
        step.prepare(self.cfg, &self.workdir)?;
        let invocation = step.build_invocation(self.cfg, &self.workdir)?;
        self.supervise(name, &invocation)?;
        for spec in artifacts {
            if !spec.is_satisfied(&self.workdir) {
                return Err(StepError::MissingArtifact {
                    step: name.to_string(),
                    artifact: spec.describe(),
                });
            }
        }
        self.write_marker(name)
            .map_err(|err| StepError::Invocation {
                step: name.to_string(),
                detail: format!("completion marker: {err}"),
            })?;
        Ok(())
    }

    /// Run the invocation under bash with output captured to its log file,
    /// polling the cancellation flag while the child runs.
    fn supervise(&self, name: &str, invocation: &Invocation) -> Result<(), StepError> {
        let io_err = |source: std::io::Error| StepError::Io {
            step: name.to_string(),
            source,
        };
        let log_dir = self.log_dir().map_err(|err| StepError::Invocation {
            step: name.to_string(),
            detail: err.to_string(),
        })?;
        fs::create_dir_all(&log_dir).map_err(io_err)?;
        let log_path = log_dir.join(&invocation.log_name);
        let log_file = fs::File::create(&log_path).map_err(io_err)?;
        let log_clone = log_file.try_clone().map_err(io_err)?;

        fs::create_dir_all(&self.workdir).map_err(io_err)?;
        let mut child = Command::new("bash")
            .arg("-c")
            .arg(&invocation.script)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_clone))
            .spawn()
            .map_err(|err| StepError::Invocation {
                step: name.to_string(),
                detail: format!("failed to spawn bash: {err}"),
            })?;

        let status = loop {
            if self.cancel.load(Ordering::SeqCst) {
                child.kill().ok();
                child.wait().ok();
                return Err(StepError::Cancelled {
                    step: name.to_string(),
                    detail: "terminated by operator signal".to_string(),
                });
            }
            match child.try_wait().map_err(io_err)? {
                Some(status) => break status,
                None => std::thread::sleep(CANCEL_POLL),
            }
        };
        if !status.success() {
            return Err(StepError::Invocation {
                step: name.to_string(),
                detail: format!("exited with {status} (see {})", log_path.display()),
            });
        }
        Ok(())
    }
}

static CANCEL_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn on_signal(_signum: libc::c_int) {
    if let Some(flag) = CANCEL_FLAG.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

/// Install SIGINT/SIGTERM handlers that request cancellation of the current
/// run. Already-succeeded steps keep their artifacts for a later resume.
pub fn install_cancel_handler() -> Arc<AtomicBool> {
    let flag = CANCEL_FLAG
        .get_or_init(|| Arc::new(AtomicBool::new(false)))
        .clone();
    unsafe {
        libc::signal(libc::SIGINT, on_signal as usize);
        libc::signal(libc::SIGTERM, on_signal as usize);
    }
    flag
}
