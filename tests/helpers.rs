//! Shared test utilities for liveforge tests.
#![allow(dead_code)]

use anyhow::Result;
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use liveforge::build::checks::{Check, Unmet};
use liveforge::build::{BuildContext, BuildRecord, Stage};
use liveforge::config::Config;
use liveforge::mounts::MountPoint;
use liveforge::privilege::Privileged;
use liveforge::process::{Cmd, CommandResult};

pub const TIMESTAMP: &str = "20240301-093000";

/// Temporary project directory with work and output locations.
pub struct TestEnv {
    /// Kept alive for the lifetime of the TestEnv.
    pub _temp_dir: TempDir,
    pub base_dir: PathBuf,
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base_dir = temp_dir.path().to_path_buf();
        Self {
            work_dir: base_dir.join("work"),
            output_dir: base_dir.join("out"),
            base_dir,
            _temp_dir: temp_dir,
        }
    }

    /// Context for this environment; `extra` are additional long flags.
    pub fn context(&self, extra: &[&str]) -> BuildContext {
        let work = self.work_dir.to_string_lossy().into_owned();
        let out = self.output_dir.to_string_lossy().into_owned();
        let mut args = vec![
            "liveforge",
            "--work-dir",
            work.as_str(),
            "--output-dir",
            out.as_str(),
        ];
        args.extend_from_slice(extra);
        let config = Config::try_parse_from(args).expect("valid test config");
        BuildContext::resolve(&config, &self.base_dir, TIMESTAMP.to_string())
            .expect("valid test context")
    }

    /// Host directories to bind in place of /dev, /proc, ... Names ending
    /// in `slow` make the scripted executor time out their graceful unmount.
    pub fn mount_sources(&self, names: &[&str]) -> Vec<MountPoint> {
        names
            .iter()
            .map(|name| {
                let source = self.base_dir.join("host").join(name);
                fs::create_dir_all(&source).expect("Failed to create mount source");
                MountPoint::bind(source, true)
            })
            .collect()
    }
}

type Hook = Box<dyn Fn(&Cmd) + Send + Sync>;

/// Privileged executor double.
///
/// Records every command. `rm` and `install` run for real (unelevated) so
/// filesystem effects are observable; everything else succeeds without
/// doing anything unless scripted otherwise.
#[derive(Default)]
pub struct ScriptedExec {
    log: Mutex<Vec<String>>,
    failures: Vec<(String, String)>,
    hooks: Vec<(String, Hook)>,
    slow_suffix: Option<String>,
}

const REAL_PROGRAMS: &[&str] = &["rm", "install"];

impl ScriptedExec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `program` exit 1 with `stderr`.
    pub fn fail(mut self, program: &str, stderr: &str) -> Self {
        self.failures.push((program.to_string(), stderr.to_string()));
        self
    }

    /// Run `hook` whenever `program` is invoked.
    pub fn on(mut self, program: &str, hook: impl Fn(&Cmd) + Send + Sync + 'static) -> Self {
        self.hooks.push((program.to_string(), Box::new(hook)));
        self
    }

    /// Graceful unmounts of targets ending in `suffix` time out.
    pub fn slow_umount(mut self, suffix: &str) -> Self {
        self.slow_suffix = Some(suffix.to_string());
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Commands whose program is exactly `program`.
    pub fn commands_of(&self, program: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.split(' ').next() == Some(program))
            .collect()
    }

    pub fn ran(&self, program: &str) -> bool {
        !self.commands_of(program).is_empty()
    }

    fn record(&self, cmd: &Cmd) {
        self.log.lock().unwrap().push(cmd.to_string());
        for (program, hook) in &self.hooks {
            if program == cmd.program() {
                hook(cmd);
            }
        }
    }
}

impl Privileged for ScriptedExec {
    fn run(&self, cmd: Cmd) -> Result<CommandResult> {
        self.record(&cmd);
        if let Some((_, stderr)) = self.failures.iter().find(|(p, _)| p == cmd.program()) {
            return cmd.check(CommandResult::failed(1, stderr.clone()));
        }
        if REAL_PROGRAMS.contains(&cmd.program()) {
            return cmd.run();
        }
        cmd.check(CommandResult::ok(""))
    }

    fn run_bounded(&self, cmd: Cmd, _limit: Duration) -> Result<Option<CommandResult>> {
        self.record(&cmd);
        let slow = match &self.slow_suffix {
            Some(suffix) => cmd.to_string().ends_with(suffix.as_str()),
            None => false,
        };
        if slow {
            Ok(None)
        } else {
            Ok(Some(CommandResult::ok("")))
        }
    }
}

/// Targets of `umount` commands (graceful and lazy), in call order.
pub fn umount_targets(exec: &ScriptedExec) -> Vec<String> {
    exec.commands_of("umount")
        .iter()
        .filter_map(|c| c.rsplit(' ').next().map(str::to_string))
        .collect()
}

/// Targets of `mount --bind`, in call order.
pub fn mount_targets(exec: &ScriptedExec) -> Vec<String> {
    exec.commands_of("mount")
        .iter()
        .filter_map(|c| c.rsplit(' ').next().map(str::to_string))
        .collect()
}

type Action = Box<dyn Fn(&BuildContext, &mut BuildRecord) -> Result<()>>;

/// A stage assembled from closures.
pub struct TestStage {
    name: &'static str,
    mounts: bool,
    action: Action,
    post_ok: bool,
    trace: Arc<Mutex<Vec<&'static str>>>,
}

impl TestStage {
    pub fn new(name: &'static str, trace: &Arc<Mutex<Vec<&'static str>>>) -> Self {
        Self {
            name,
            mounts: false,
            action: Box::new(|_, _| Ok(())),
            post_ok: true,
            trace: trace.clone(),
        }
    }

    pub fn with_mounts(mut self) -> Self {
        self.mounts = true;
        self
    }

    pub fn action(
        mut self,
        action: impl Fn(&BuildContext, &mut BuildRecord) -> Result<()> + 'static,
    ) -> Self {
        self.action = Box::new(action);
        self
    }

    pub fn failing_postcondition(mut self) -> Self {
        self.post_ok = false;
        self
    }

    pub fn boxed(self) -> Box<dyn Stage> {
        Box::new(self)
    }
}

impl Stage for TestStage {
    fn name(&self) -> &'static str {
        self.name
    }

    fn needs_mounts(&self) -> bool {
        self.mounts
    }

    fn precondition(&self, _ctx: &BuildContext) -> Check {
        Ok(())
    }

    fn run(&self, ctx: &BuildContext, record: &mut BuildRecord) -> Result<()> {
        self.trace.lock().unwrap().push(self.name);
        (self.action)(ctx, record)
    }

    fn postcondition(&self, _ctx: &BuildContext, _record: &BuildRecord) -> Check {
        if self.post_ok {
            Ok(())
        } else {
            Err(Unmet::new(format!("{} output missing", self.name)))
        }
    }
}

pub fn trace() -> Arc<Mutex<Vec<&'static str>>> {
    Arc::new(Mutex::new(Vec::new()))
}

/// Lay out the image tree the assemble stage expects.
pub fn populate_image_tree(ctx: &BuildContext) {
    for dir in ctx.scaffold_dirs() {
        fs::create_dir_all(dir).expect("Failed to create scaffold dir");
    }
    fs::write(ctx.squashfs_path(), vec![0u8; 4096]).unwrap();
    fs::write(ctx.live_dir().join("vmlinuz"), "kernel").unwrap();
    fs::write(ctx.live_dir().join("initrd"), "initrd").unwrap();
    fs::write(ctx.grub_dir().join("grub.cfg"), "menuentry").unwrap();
}

/// Write a fake kernel into `root/boot`.
pub fn fake_kernel(root: &Path, version: &str) {
    let boot = root.join("boot");
    fs::create_dir_all(&boot).unwrap();
    fs::write(boot.join(format!("vmlinuz-{}", version)), "kernel").unwrap();
    fs::write(boot.join(format!("initrd.img-{}", version)), "initrd").unwrap();
}

pub fn assert_file_exists(path: &Path) {
    assert!(path.is_file(), "Expected file to exist: {}", path.display());
}
