//! Privileged execution as an explicit capability.
//!
//! The build process itself runs unprivileged. Anything that needs root
//! (binding pseudo-filesystems, writing into the root-owned chroot,
//! removing it) is requested through a [`Privileged`] executor handed to
//! the component that needs it.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::process::{Cmd, CommandResult};

pub trait Privileged: Send + Sync {
    /// Run `cmd` with elevated privileges. Honors the command's
    /// `allow_fail` / error prefix like [`Cmd::run`].
    fn run(&self, cmd: Cmd) -> Result<CommandResult>;

    /// Run `cmd` elevated, giving up after `limit`. `Ok(None)` means the
    /// limit elapsed.
    fn run_bounded(&self, cmd: Cmd, limit: Duration) -> Result<Option<CommandResult>>;
}

/// Elevates each call through an external program such as `sudo` or `doas`.
#[derive(Debug, Clone)]
pub struct Elevated {
    via: String,
}

impl Elevated {
    pub fn new(via: impl Into<String>) -> Self {
        Self { via: via.into() }
    }

    pub fn program(&self) -> &str {
        &self.via
    }
}

impl Privileged for Elevated {
    fn run(&self, cmd: Cmd) -> Result<CommandResult> {
        let cmd = cmd.elevated(&self.via);
        debug!(command = %cmd, "privileged");
        cmd.run()
    }

    fn run_bounded(&self, cmd: Cmd, limit: Duration) -> Result<Option<CommandResult>> {
        let cmd = cmd.elevated(&self.via);
        debug!(command = %cmd, timeout_secs = limit.as_secs(), "privileged (bounded)");
        cmd.run_bounded(limit)
    }
}

/// Write `contents` to a root-owned `dest` with the given mode.
///
/// The content is staged in an unprivileged temp file and moved into place
/// with `install -D`, so no text is ever interpolated into a command.
pub fn install_file(
    exec: &dyn Privileged,
    dest: &Path,
    contents: &str,
    mode: u32,
) -> Result<()> {
    let mut staged = tempfile::NamedTempFile::new().context("Failed to create staging file")?;
    staged
        .write_all(contents.as_bytes())
        .and_then(|_| staged.flush())
        .context("Failed to write staging file")?;

    exec.run(
        Cmd::new("install")
            .arg("-D")
            .args(["-m", &format!("{:o}", mode)])
            .arg_path(staged.path())
            .arg_path(dest)
            .error_msg(format!("Failed to install {}", dest.display())),
    )?;
    Ok(())
}

/// Copy an existing file to `dest` with the given mode.
pub fn install_copy(exec: &dyn Privileged, src: &Path, dest: &Path, mode: u32) -> Result<()> {
    exec.run(
        Cmd::new("install")
            .arg("-D")
            .args(["-m", &format!("{:o}", mode)])
            .arg_path(src)
            .arg_path(dest)
            .error_msg(format!("Failed to copy {}", src.display())),
    )?;
    Ok(())
}

/// Run a command inside `root` via `chroot`.
pub fn chroot(exec: &dyn Privileged, root: &Path, args: &[&str]) -> Result<CommandResult> {
    let cmd = Cmd::new("chroot").arg_path(root).args(args).error_msg(format!(
        "'{}' failed inside chroot",
        args.first().copied().unwrap_or("command")
    ));
    exec.run(cmd)
}
