//! Populate a fresh root with debootstrap.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::build::checks::{absent_or_empty, require_dir, require_kernel, Check};
use crate::build::profile;
use crate::build::{BuildContext, BuildRecord, Stage};
use crate::privilege::Privileged;
use crate::process::Cmd;

pub struct Bootstrap {
    exec: Arc<dyn Privileged>,
}

impl Bootstrap {
    pub fn new(exec: Arc<dyn Privileged>) -> Self {
        Self { exec }
    }
}

/// The debootstrap invocation for `ctx`.
pub fn debootstrap_command(ctx: &BuildContext) -> Cmd {
    Cmd::new("debootstrap")
        .arg(format!("--arch={}", ctx.arch))
        .arg("--variant=minbase")
        .arg(format!("--include={}", profile::bootstrap_includes(ctx)))
        .arg(&ctx.release)
        .arg_path(&ctx.chroot_dir)
        .arg(&ctx.mirror)
        .error_msg(format!("debootstrap of '{}' failed", ctx.release))
}

impl Stage for Bootstrap {
    fn name(&self) -> &'static str {
        "bootstrap"
    }

    fn precondition(&self, ctx: &BuildContext) -> Check {
        for dir in ctx.scaffold_dirs() {
            require_dir(&dir)?;
        }
        // never bootstrap over a root kept from an earlier run
        absent_or_empty(&ctx.chroot_dir)
    }

    fn run(&self, ctx: &BuildContext, _record: &mut BuildRecord) -> Result<()> {
        self.exec
            .run(debootstrap_command(ctx))
            .with_context(|| format!("Bootstrapping {} ({})", ctx.release, ctx.arch))?;
        Ok(())
    }

    fn postcondition(&self, ctx: &BuildContext, _record: &BuildRecord) -> Check {
        require_kernel(&ctx.chroot_dir)
    }
}
