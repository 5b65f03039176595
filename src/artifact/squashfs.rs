//! Compress the finished root into `live/filesystem.squashfs`.
//!
//! The root must be free of binds first: a bound /proc or /sys inside the
//! tree would be archived along with it.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::checksum::{write_tree_checksums, TREE_CHECKSUMS};
use crate::build::checks::{require_dir, require_file, Check, Unmet};
use crate::build::profile::SQUASHFS_EXCLUDES;
use crate::build::{BuildContext, BuildRecord, Stage};
use crate::mounts::mounts_under;
use crate::privilege::Privileged;
use crate::process::Cmd;

/// Smallest compressed root accepted.
pub const MIN_SQUASHFS_BYTES: u64 = 1024 * 1024;

pub struct CompressRoot {
    exec: Arc<dyn Privileged>,
}

impl CompressRoot {
    pub fn new(exec: Arc<dyn Privileged>) -> Self {
        Self { exec }
    }

    /// Apparent size of the root in bytes, written to `live/filesystem.size`.
    fn record_size(&self, ctx: &BuildContext) -> Result<u64> {
        let result = self.exec.run(
            Cmd::new("du")
                .args(["-s", "-b"])
                .arg_path(&ctx.chroot_dir)
                .error_msg("Failed to measure root size"),
        )?;
        let bytes = parse_du(&result.stdout)
            .with_context(|| format!("Unexpected du output: {}", result.stdout_trimmed()))?;

        let path = ctx.live_dir().join("filesystem.size");
        fs::write(&path, format!("{}\n", bytes))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(bytes)
    }
}

/// The mksquashfs invocation for `ctx`.
pub fn mksquashfs_command(ctx: &BuildContext) -> Cmd {
    Cmd::new("mksquashfs")
        .arg_path(&ctx.chroot_dir)
        .arg_path(&ctx.squashfs_path())
        .arg("-noappend")
        .args(["-comp", &ctx.root_compression.to_string()])
        .args(["-b", &ctx.block_size.to_string()])
        .args(["-processors", &ctx.threads.to_string()])
        .arg("-wildcards")
        .arg("-e")
        .args(SQUASHFS_EXCLUDES)
        .error_msg("mksquashfs failed")
}

/// First field of `du -s -b` output.
fn parse_du(output: &str) -> Option<u64> {
    output.split_whitespace().next()?.parse().ok()
}

impl Stage for CompressRoot {
    fn name(&self) -> &'static str {
        "compress-root"
    }

    fn precondition(&self, ctx: &BuildContext) -> Check {
        require_dir(&ctx.chroot_dir)?;
        require_dir(&ctx.live_dir())?;
        let bound = mounts_under(&ctx.chroot_dir);
        if !bound.is_empty() {
            return Err(Unmet::new(format!(
                "{} mount(s) still active under {} (first: {})",
                bound.len(),
                ctx.chroot_dir.display(),
                bound[0].display()
            )));
        }
        Ok(())
    }

    fn run(&self, ctx: &BuildContext, record: &mut BuildRecord) -> Result<()> {
        let root_size = self.record_size(ctx)?;
        info!("Root filesystem: {} MB", root_size / 1024 / 1024);
        record.root_size_bytes = Some(root_size);

        info!(
            "Creating squashfs ({} compression, {} byte blocks, {} threads)",
            ctx.root_compression, ctx.block_size, ctx.threads
        );
        self.exec.run(mksquashfs_command(ctx))?;

        let squashfs = ctx.squashfs_path();
        let size = fs::metadata(&squashfs)
            .with_context(|| format!("mksquashfs left no {}", squashfs.display()))?
            .len();
        info!("Squashfs created: {} MB", size / 1024 / 1024);
        record.squashfs_bytes = Some(size);

        let hashed = write_tree_checksums(&ctx.image_dir)?;
        info!("Checksummed {} files in the image tree", hashed);
        Ok(())
    }

    fn postcondition(&self, ctx: &BuildContext, _record: &BuildRecord) -> Check {
        let squashfs = ctx.squashfs_path();
        require_file(&squashfs, MIN_SQUASHFS_BYTES)?;
        verify_squashfs(&squashfs)?;
        require_file(&ctx.image_dir.join(TREE_CHECKSUMS), 1)
    }
}

/// `unsquashfs -s` reads the superblock; a truncated image fails it.
fn verify_squashfs(path: &Path) -> Check {
    match Cmd::new("unsquashfs").arg("-s").arg_path(path).allow_fail().run() {
        Ok(result) if result.success() => Ok(()),
        Ok(result) => Err(Unmet::new(format!(
            "{} failed integrity check: {}",
            path.display(),
            result.diagnostics()
        ))),
        Err(e) => Err(Unmet::new(format!("cannot run unsquashfs: {:#}", e))),
    }
}
