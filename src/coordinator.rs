//! Lifecycle owner for one build.
//!
//! [`Coordinator`] owns the context, the bind guard and the run state, and
//! drives teardown (release binds, then remove the working directory).
//! Teardown is claimed through [`CleanupState`], so it runs exactly once no
//! matter whether it is reached by normal return, a failure, an interrupt
//! or `Drop`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::build::context::unsafe_work_dir;
use crate::build::{BuildContext, BuildRecord, Stage, StageReport, StageRunner};
use crate::error::{BuildError, ResourceError};
use crate::lifecycle::{validate_transition, RunState};
use crate::lock::WorkDirLock;
use crate::mounts::{mounts_under, standard_mounts, MountPoint, ResourceGuard};
use crate::privilege::Privileged;
use crate::process::Cmd;

/// "Teardown already executed". Set once, never cleared.
#[derive(Debug, Default)]
pub struct CleanupState {
    done: AtomicBool,
}

impl CleanupState {
    /// True for exactly one caller.
    pub fn claim(&self) -> bool {
        !self.done.swap(true, Ordering::SeqCst)
    }
}

/// What happened to the working directory during teardown.
#[derive(Debug)]
pub enum Removal {
    Removed,
    /// Kept because preservation was requested.
    Preserved,
    Absent,
    /// This run never took the directory's lock; it may belong to another.
    NotOwned,
    Refused(ResourceError),
    Failed(ResourceError),
}

#[derive(Debug)]
pub struct TeardownReport {
    pub unbind_problems: Vec<ResourceError>,
    pub removal: Removal,
}

pub struct Coordinator {
    ctx: BuildContext,
    exec: Arc<dyn Privileged>,
    guard: ResourceGuard,
    state: RunState,
    cleanup: CleanupState,
    interrupt: Arc<AtomicBool>,
    lock: Option<WorkDirLock>,
    record: BuildRecord,
}

impl Coordinator {
    pub fn new(ctx: BuildContext, exec: Arc<dyn Privileged>) -> Self {
        let guard = ResourceGuard::new(
            &ctx.chroot_dir,
            standard_mounts(),
            exec.clone(),
            ctx.unmount_timeout,
        );
        Self {
            record: BuildRecord::new(&ctx),
            ctx,
            exec,
            guard,
            state: RunState::Idle,
            cleanup: CleanupState::default(),
            interrupt: Arc::new(AtomicBool::new(false)),
            lock: None,
        }
    }

    /// Replace the bind set (default: [`standard_mounts`]).
    pub fn with_mounts(mut self, mounts: Vec<MountPoint>) -> Self {
        self.guard = ResourceGuard::new(
            &self.ctx.chroot_dir,
            mounts,
            self.exec.clone(),
            self.ctx.unmount_timeout,
        );
        self
    }

    /// Flag the signal handler sets; checked at stage boundaries.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn context(&self) -> &BuildContext {
        &self.ctx
    }

    pub fn record(&self) -> &BuildRecord {
        &self.record
    }

    pub fn guard(&self) -> &ResourceGuard {
        &self.guard
    }

    pub fn guard_mut(&mut self) -> &mut ResourceGuard {
        &mut self.guard
    }

    fn transition(&mut self, to: RunState) -> Result<(), BuildError> {
        validate_transition(self.state, to)?;
        debug!("run state: {} -> {}", self.state, to);
        self.state = to;
        Ok(())
    }

    /// Run `stages` against the working directory.
    ///
    /// Leaves the coordinator in `Completed`, `Failed` or `Interrupted`.
    /// Teardown is not part of this call.
    pub fn run(&mut self, stages: Vec<Box<dyn Stage>>) -> Result<Vec<StageReport>, BuildError> {
        self.transition(RunState::Running)?;
        let result = self.run_stages(stages);

        let next = match &result {
            Ok(_) => RunState::Completed,
            Err(BuildError::Interrupted { .. }) => RunState::Interrupted,
            Err(_) if self.interrupt.load(Ordering::SeqCst) => RunState::Interrupted,
            Err(_) => RunState::Failed,
        };
        self.transition(next)?;
        result
    }

    fn run_stages(
        &mut self,
        stages: Vec<Box<dyn Stage>>,
    ) -> Result<Vec<StageReport>, BuildError> {
        self.lock = Some(WorkDirLock::try_acquire(&self.ctx.work_dir)?);

        for dir in self.ctx.scaffold_dirs() {
            fs::create_dir_all(&dir).map_err(|source| ResourceError::Io {
                path: dir.clone(),
                source,
            })?;
        }

        info!(
            "Building {} ({}) in {}",
            self.ctx.release,
            self.ctx.arch,
            self.ctx.work_dir.display()
        );
        let runner = StageRunner::new(stages, self.interrupt.clone());
        runner.run(&self.ctx, &mut self.guard, &mut self.record)
    }

    /// Release binds, then remove the working directory unless it is to be
    /// kept or is unsafe to remove.
    ///
    /// Returns `None` on every call after the first.
    pub fn teardown(&mut self) -> Option<TeardownReport> {
        if !self.cleanup.claim() {
            debug!("teardown already done");
            return None;
        }
        info!("Tearing down ({})", self.state);

        let unbind_problems = self.guard.release();
        let removal = self.remove_work_dir(!unbind_problems.is_empty());
        match &removal {
            Removal::Removed => info!("Removed {}", self.ctx.work_dir.display()),
            Removal::Preserved => {
                info!("Working directory kept at {}", self.ctx.work_dir.display())
            }
            Removal::Absent | Removal::NotOwned => {}
            Removal::Refused(e) => warn!("{}", e),
            Removal::Failed(e) => error!("{}", e),
        }
        self.lock = None;

        if let Err(e) = self.transition(RunState::TornDown) {
            // reached from Drop while still running (panic unwinding)
            debug!("{}", e);
            self.state = RunState::TornDown;
        }

        Some(TeardownReport {
            unbind_problems,
            removal,
        })
    }

    fn remove_work_dir(&self, binds_left: bool) -> Removal {
        let work_dir = &self.ctx.work_dir;
        if self.ctx.keep_work_dir {
            return Removal::Preserved;
        }
        if !work_dir.exists() {
            return Removal::Absent;
        }
        let canonical = match check_removable(work_dir) {
            Ok(path) => path,
            Err(e) => return Removal::Refused(e),
        };
        if self.lock.is_none() {
            return Removal::NotOwned;
        }

        if binds_left {
            return Removal::Refused(ResourceError::UnsafeRemoval {
                path: canonical,
                reason: "some binds could not be released".to_string(),
            });
        }
        let remaining = mounts_under(&canonical);
        if !remaining.is_empty() {
            return Removal::Refused(ResourceError::UnsafeRemoval {
                path: canonical,
                reason: format!("{} mount(s) still active beneath it", remaining.len()),
            });
        }

        let cmd = Cmd::new("rm")
            .args(["-rf", "--one-file-system"])
            .arg_path(&canonical);
        match self.exec.run(cmd) {
            Ok(_) => Removal::Removed,
            Err(e) => Removal::Failed(ResourceError::Removal {
                path: canonical,
                detail: format!("{:#}", e),
            }),
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Resolve `path` and refuse the filesystem root and the caller's home
/// directory (or anything containing it).
pub fn check_removable(path: &Path) -> Result<PathBuf, ResourceError> {
    let canonical = fs::canonicalize(path).map_err(|source| ResourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let refuse = |reason: &str| ResourceError::UnsafeRemoval {
        path: canonical.clone(),
        reason: reason.to_string(),
    };

    if let Some(reason) = unsafe_work_dir(&canonical) {
        return Err(refuse(reason));
    }
    Ok(canonical)
}

/// Route SIGINT/SIGTERM into `flag`. The build stops at the next stage
/// boundary and tears down on the main thread; later signals only log.
pub fn install_signal_handler(flag: Arc<AtomicBool>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            warn!("Already stopping, waiting for the current step to finish");
        } else {
            warn!("Interrupt received, stopping after the current step");
        }
    })
}
