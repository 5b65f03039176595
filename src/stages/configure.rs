//! Customize the bootstrapped root: packages, system files, live account.
//!
//! Runs with /dev, /proc, /sys bound into the root. Every file is written
//! through [`install_file`], every in-root command through `chroot` with
//! structured arguments.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::build::checks::{require_file, Check};
use crate::build::profile::{self, LIVE_USER};
use crate::build::{BuildContext, BuildRecord, Stage};
use crate::privilege::{chroot, install_file, Privileged};
use crate::process::{Cmd, CommandResult};

/// Environment for in-root package tooling. `sudo` resets the caller's
/// environment, so it is passed through `env` inside the root.
const APT_ENV: &[&str] = &["env", "DEBIAN_FRONTEND=noninteractive", "LC_ALL=C"];

const MANIFEST_NAME: &str = "filesystem.packages";

pub struct Configure {
    exec: Arc<dyn Privileged>,
}

impl Configure {
    pub fn new(exec: Arc<dyn Privileged>) -> Self {
        Self { exec }
    }

    fn in_root(&self, ctx: &BuildContext, args: &[&str]) -> Result<CommandResult> {
        chroot(&*self.exec, &ctx.chroot_dir, args)
    }

    fn apt(&self, ctx: &BuildContext, args: &[&str]) -> Result<CommandResult> {
        let mut full: Vec<&str> = APT_ENV.to_vec();
        full.push("apt-get");
        full.extend_from_slice(args);
        self.in_root(ctx, &full)
    }

    fn write(&self, ctx: &BuildContext, relative: &str, contents: &str, mode: u32) -> Result<()> {
        install_file(&*self.exec, &ctx.chroot_dir.join(relative), contents, mode)
    }

    fn install_packages(&self, ctx: &BuildContext) -> Result<()> {
        self.write(ctx, "etc/apt/sources.list", &profile::sources_list(ctx), 0o644)?;
        self.apt(ctx, &["update"]).context("Refreshing package lists")?;

        let packages = profile::live_packages(ctx);
        info!("Installing {} packages", packages.len());
        let mut args = vec!["install", "-y", "--no-install-recommends"];
        args.extend(packages.iter().map(String::as_str));
        self.apt(ctx, &args).context("Installing live packages")?;
        Ok(())
    }

    fn write_system_files(&self, ctx: &BuildContext) -> Result<()> {
        self.write(ctx, "etc/hostname", &profile::hostname(), 0o644)?;
        self.write(ctx, "etc/hosts", &profile::hosts(), 0o644)?;
        self.write(ctx, "etc/default/locale", &profile::locale_conf(), 0o644)?;
        self.write(ctx, "etc/locale.gen", &profile::locale_gen(), 0o644)?;
        self.write(ctx, profile::NETWORK_UNIT_PATH, profile::NETWORK_UNIT, 0o644)?;
        self.write(ctx, "etc/motd", &profile::motd(ctx), 0o644)?;
        self.write(ctx, profile::AUTOLOGIN_PATH, &profile::autologin_override(), 0o644)?;
        self.write(ctx, &format!("etc/sudoers.d/{}", LIVE_USER), &profile::sudoers(), 0o440)?;

        self.in_root(ctx, &["locale-gen"])?;
        self.in_root(ctx, &["systemctl", "enable", "systemd-networkd"])?;
        Ok(())
    }

    fn create_live_user(&self, ctx: &BuildContext) -> Result<()> {
        self.in_root(ctx, &["useradd", "-m", "-s", "/bin/bash", "-G", "sudo", LIVE_USER])
            .with_context(|| format!("Creating user '{}'", LIVE_USER))?;
        self.in_root(ctx, &["passwd", "-d", LIVE_USER])?;
        Ok(())
    }

    /// Each boot of the image must generate its own machine-id.
    fn reset_machine_id(&self, ctx: &BuildContext) -> Result<()> {
        self.write(ctx, "etc/machine-id", "", 0o444)?;
        self.exec.run(
            Cmd::new("rm")
                .arg("-f")
                .arg_path(&ctx.chroot_dir.join("var/lib/dbus/machine-id")),
        )?;
        Ok(())
    }

    fn write_manifest(&self, ctx: &BuildContext, record: &mut BuildRecord) -> Result<()> {
        let result = self.in_root(
            ctx,
            &["dpkg-query", "-W", "--showformat=${Package} ${Version}\\n"],
        )?;
        let path = manifest_path(ctx);
        fs::write(&path, &result.stdout)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        let count = result.stdout.lines().filter(|l| !l.trim().is_empty()).count();
        info!("Package manifest: {} packages", count);
        record.package_count = Some(count);
        Ok(())
    }
}

pub fn manifest_path(ctx: &BuildContext) -> PathBuf {
    ctx.live_dir().join(MANIFEST_NAME)
}

impl Stage for Configure {
    fn name(&self) -> &'static str {
        "configure"
    }

    fn needs_mounts(&self) -> bool {
        true
    }

    fn precondition(&self, ctx: &BuildContext) -> Check {
        require_file(&ctx.chroot_dir.join("usr/bin/apt-get"), 1)?;
        require_file(&ctx.chroot_dir.join("usr/bin/dpkg-query"), 1)
    }

    fn run(&self, ctx: &BuildContext, record: &mut BuildRecord) -> Result<()> {
        self.install_packages(ctx)?;
        self.write_system_files(ctx)?;
        self.create_live_user(ctx)?;
        self.reset_machine_id(ctx)?;
        self.apt(ctx, &["clean"])?;
        self.write_manifest(ctx, record)
    }

    fn postcondition(&self, ctx: &BuildContext, _record: &BuildRecord) -> Check {
        require_file(&manifest_path(ctx), 1)?;
        require_file(&ctx.chroot_dir.join("etc/hostname"), 1)?;
        require_file(&ctx.chroot_dir.join(profile::AUTOLOGIN_PATH), 1)
    }
}
