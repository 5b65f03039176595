//! Ordered stage execution with entry and exit gates.
//!
//! A stage runs only when its precondition holds and the run continues only
//! when its postcondition holds. Nothing is retried here; the one retry-like
//! path is the fallback chain inside artifact assembly.

use anyhow::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::checks::Check;
use super::context::BuildContext;
use crate::error::{BuildError, ExhaustedFallbackError, StageError};
use crate::mounts::ResourceGuard;
use crate::process::CommandError;
use crate::timing::Timer;

/// One step of the build.
pub trait Stage {
    fn name(&self) -> &'static str;

    /// Whether the action needs pseudo-filesystems bound into the root.
    fn needs_mounts(&self) -> bool {
        false
    }

    fn precondition(&self, ctx: &BuildContext) -> Check;

    fn run(&self, ctx: &BuildContext, record: &mut BuildRecord) -> Result<()>;

    fn postcondition(&self, ctx: &BuildContext, record: &BuildRecord) -> Check;
}

/// Facts gathered while building, written next to the artifact.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildRecord {
    pub release: String,
    pub arch: String,
    pub timestamp: String,
    pub volume_label: String,
    pub kernel_version: Option<String>,
    pub package_count: Option<usize>,
    pub root_size_bytes: Option<u64>,
    pub squashfs_bytes: Option<u64>,
    pub assembly: Option<AssemblyRecord>,
    pub artifact: Option<ArtifactRecord>,
}

impl BuildRecord {
    pub fn new(ctx: &BuildContext) -> Self {
        Self {
            release: ctx.release.clone(),
            arch: ctx.arch.clone(),
            timestamp: ctx.timestamp.clone(),
            volume_label: ctx.volume_label.clone(),
            ..Self::default()
        }
    }
}

/// Which assembly option produced the artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssemblyRecord {
    pub option: String,
    /// 1-based position in the fallback order.
    pub position: usize,
    /// Options tried and rejected before this one.
    pub rejected: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRecord {
    pub name: String,
    pub bytes: u64,
    pub sha256: Option<String>,
}

/// A stage that finished, and how long it took.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub name: &'static str,
    pub elapsed: Duration,
}

pub struct StageRunner {
    stages: Vec<Box<dyn Stage>>,
    interrupt: Arc<AtomicBool>,
}

impl StageRunner {
    pub fn new(stages: Vec<Box<dyn Stage>>, interrupt: Arc<AtomicBool>) -> Self {
        Self { stages, interrupt }
    }

    /// Run every stage in order.
    ///
    /// Binds are acquired before a mount-bound stage and released before
    /// the next stage that is not. On error the guard may still hold binds;
    /// releasing them is teardown's job.
    pub fn run(
        &self,
        ctx: &BuildContext,
        guard: &mut ResourceGuard,
        record: &mut BuildRecord,
    ) -> Result<Vec<StageReport>, BuildError> {
        let mut reports = Vec::with_capacity(self.stages.len());
        let mut previous: Option<&'static str> = None;

        for stage in &self.stages {
            let name = stage.name();
            if self.interrupted() {
                return Err(BuildError::Interrupted { stage: previous });
            }

            if stage.needs_mounts() {
                guard.acquire()?;
            } else if guard.is_bound() {
                release_between_stages(guard);
            }

            stage
                .precondition(ctx)
                .map_err(|unmet| StageError::Precondition {
                    stage: name,
                    check: unmet.0,
                })?;

            let timer = Timer::start(name);
            if let Err(err) = stage.run(ctx, record) {
                // A child killed by the same SIGINT fails its stage; report
                // the interrupt instead.
                if self.interrupted() {
                    debug!("stage '{}' failed after interrupt: {:#}", name, err);
                    return Err(BuildError::Interrupted { stage: Some(name) });
                }
                return Err(classify(name, err).into());
            }

            stage
                .postcondition(ctx, record)
                .map_err(|unmet| StageError::Postcondition {
                    stage: name,
                    check: unmet.0,
                })?;

            reports.push(StageReport {
                name,
                elapsed: timer.finish(),
            });
            previous = Some(name);
        }

        if guard.is_bound() {
            release_between_stages(guard);
        }
        Ok(reports)
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }
}

fn release_between_stages(guard: &mut ResourceGuard) {
    let problems = guard.release();
    if !problems.is_empty() {
        warn!("{} bind(s) could not be released", problems.len());
    }
}

/// Turn a failed action into a [`StageError`], keeping the diagnostic tail
/// of the external command that failed, if any.
pub fn classify(stage: &'static str, err: anyhow::Error) -> StageError {
    match err.downcast::<ExhaustedFallbackError>() {
        Ok(source) => StageError::Exhausted { stage, source },
        Err(err) => {
            let diagnostics = err
                .chain()
                .find_map(|cause| cause.downcast_ref::<CommandError>())
                .map(|cmd| cmd.diagnostics.clone());
            StageError::Action {
                stage,
                message: format!("{:#}", err),
                diagnostics,
            }
        }
    }
}
