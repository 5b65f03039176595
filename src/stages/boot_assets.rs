//! Copy kernel and initrd out of the root and write the boot menu.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::build::checks::{kernel_images, require_file, require_kernel, Check};
use crate::build::profile;
use crate::build::{BuildContext, BuildRecord, Stage};
use crate::privilege::{install_copy, Privileged};

pub struct ExtractBootAssets {
    exec: Arc<dyn Privileged>,
}

impl ExtractBootAssets {
    pub fn new(exec: Arc<dyn Privileged>) -> Self {
        Self { exec }
    }
}

/// Newest kernel in the root and the initrd built for it.
pub fn select_kernel(root: &Path) -> Result<(String, PathBuf, PathBuf)> {
    let Some(kernel) = kernel_images(root).pop() else {
        bail!("No kernel image under {}", root.join("boot").display());
    };
    let version = kernel
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix("vmlinuz-"))
        .map(str::to_string)
        .with_context(|| format!("Unexpected kernel file name {}", kernel.display()))?;

    let initrd = root.join("boot").join(format!("initrd.img-{}", version));
    if !initrd.exists() {
        bail!(
            "Kernel {} has no initrd at {} (is live-boot installed?)",
            version,
            initrd.display()
        );
    }
    Ok((version, kernel, initrd))
}

impl Stage for ExtractBootAssets {
    fn name(&self) -> &'static str {
        "extract-boot-assets"
    }

    fn precondition(&self, ctx: &BuildContext) -> Check {
        require_kernel(&ctx.chroot_dir)
    }

    fn run(&self, ctx: &BuildContext, record: &mut BuildRecord) -> Result<()> {
        let (version, kernel, initrd) = select_kernel(&ctx.chroot_dir)?;
        info!("Using kernel {}", version);

        // Debian installs kernels 0600 root; copy them out readable.
        let live = ctx.live_dir();
        install_copy(&*self.exec, &kernel, &live.join("vmlinuz"), 0o644)?;
        install_copy(&*self.exec, &initrd, &live.join("initrd"), 0o644)?;

        let grub_cfg = ctx.grub_dir().join("grub.cfg");
        fs::write(&grub_cfg, profile::grub_cfg(ctx))
            .with_context(|| format!("Failed to write {}", grub_cfg.display()))?;

        record.kernel_version = Some(version);
        Ok(())
    }

    fn postcondition(&self, ctx: &BuildContext, _record: &BuildRecord) -> Check {
        require_file(&ctx.live_dir().join("vmlinuz"), 1)?;
        require_file(&ctx.live_dir().join("initrd"), 1)?;
        require_file(&ctx.grub_dir().join("grub.cfg"), 1)
    }
}
