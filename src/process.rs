//! Centralized command execution with consistent error handling.
//!
//! Every external tool the build touches (debootstrap, mksquashfs,
//! grub-mkrescue, mount/umount) goes through [`Cmd`], so output is always
//! captured and a failure always carries the tail of what the tool printed.

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

/// Number of trailing output lines kept as diagnostics on failure.
pub const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit code, or -1 if terminated by signal.
    pub code: i32,
    /// Captured stdout as a string.
    pub stdout: String,
    /// Captured stderr as a string.
    pub stderr: String,
}

impl CommandResult {
    fn from_output(status: ExitStatus, stdout: &[u8], stderr: &[u8]) -> Self {
        Self {
            code: status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(stdout).into_owned(),
            stderr: String::from_utf8_lossy(stderr).into_owned(),
        }
    }

    /// A successful result with the given stdout. Used by executors that
    /// synthesize results instead of spawning a process.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed result with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Get stderr, trimmed of whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }

    /// Last lines of stderr, falling back to stdout when stderr is empty.
    pub fn diagnostics(&self) -> String {
        if self.stderr_trimmed().is_empty() {
            tail(&self.stdout, DIAGNOSTIC_TAIL_LINES)
        } else {
            tail(&self.stderr, DIAGNOSTIC_TAIL_LINES)
        }
    }
}

/// A command exited non-zero.
///
/// Kept as a concrete type inside `anyhow` errors so the stage runner can
/// recover the diagnostic tail for the user.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{prefix} (exit code {code})")]
pub struct CommandError {
    pub program: String,
    pub prefix: String,
    pub code: i32,
    pub diagnostics: String,
}

/// Builder for configuring command execution.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<OsString>,
    /// If true, don't fail on non-zero exit.
    allow_fail: bool,
    /// Custom error message prefix.
    error_prefix: Option<String>,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            allow_fail: false,
            error_prefix: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().into());
        }
        self
    }

    /// Add a path as an argument. Non-UTF-8 paths are passed through intact.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.as_os_str().to_owned());
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Set a custom error message prefix.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    /// Wrap this command so it runs through an elevation program
    /// (`sudo chroot ...` instead of `chroot ...`).
    pub fn elevated(mut self, via: &str) -> Self {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(OsString::from(&self.program));
        args.append(&mut self.args);
        self.args = args;
        self.program = via.to_string();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments as lossy strings, for logging and inspection.
    pub fn arg_strings(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn std_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    /// Turn a finished result into an error if it failed and failure
    /// is not allowed.
    pub fn check(&self, result: CommandResult) -> Result<CommandResult> {
        if self.allow_fail || result.success() {
            return Ok(result);
        }
        let prefix = self
            .error_prefix
            .clone()
            .unwrap_or_else(|| format!("'{}' failed", self.program));
        Err(CommandError {
            program: self.program.clone(),
            prefix,
            code: result.code,
            diagnostics: result.diagnostics(),
        }
        .into())
    }

    /// Run the command and capture output.
    pub fn run(self) -> Result<CommandResult> {
        let output = self
            .std_command()
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", self.program))?;

        let result = CommandResult::from_output(output.status, &output.stdout, &output.stderr);
        self.check(result)
    }

    /// Run the command, giving up after `limit`.
    ///
    /// Returns `Ok(None)` when the limit elapsed; the child is killed in
    /// that case. A non-zero exit is returned as a result, never as an
    /// error, so the caller can pick its own fallback.
    pub fn run_bounded(self, limit: Duration) -> Result<Option<CommandResult>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start runtime for bounded command")?;

        let mut cmd = tokio::process::Command::from(self.std_command());
        cmd.stdin(Stdio::null()).kill_on_drop(true);

        let program = self.program.clone();
        runtime.block_on(async move {
            match tokio::time::timeout(limit, cmd.output()).await {
                Ok(output) => {
                    let output = output.with_context(|| {
                        format!("Failed to execute '{}'. Is it installed?", program)
                    })?;
                    Ok(Some(CommandResult::from_output(
                        output.status,
                        &output.stdout,
                        &output.stderr,
                    )))
                }
                Err(_) => Ok(None),
            }
        })
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Last `lines` lines of `text`, trimmed.
pub fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

/// Check if a program exists in PATH.
///
/// Returns the full path if found, None otherwise.
pub fn which(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}
