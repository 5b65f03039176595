//! Master the bootable image with grub-mkrescue.
//!
//! Three invocations are tried in order, each assuming less about the
//! mastering tool than the one before:
//!
//! 1. custom volume id and file compression
//! 2. file compression only
//! 3. bare `-o <out> <tree>`
//!
//! Mastering runs unprivileged so the image belongs to the invoking user.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::build::checks::{require_file, Check, Unmet};
use crate::build::runner::{ArtifactRecord, AssemblyRecord};
use crate::build::{BuildContext, BuildRecord, Stage};
use crate::config::ArtifactCompression;
use crate::fallback::{Accepted, FallbackExecutor, Outcome, Strategy, Validator};
use crate::process::Cmd;

/// One grub-mkrescue parameterization.
#[derive(Debug, Clone)]
pub struct GrubRescue {
    name: &'static str,
    image_dir: PathBuf,
    volume_label: Option<String>,
    compression: Option<ArtifactCompression>,
}

impl GrubRescue {
    pub fn new(name: &'static str, image_dir: &Path) -> Self {
        Self {
            name,
            image_dir: image_dir.to_path_buf(),
            volume_label: None,
            compression: None,
        }
    }

    pub fn volume_label(mut self, label: &str) -> Self {
        self.volume_label = Some(label.to_string());
        self
    }

    pub fn compression(mut self, compression: ArtifactCompression) -> Self {
        self.compression = Some(compression);
        self
    }

    pub fn command(&self, candidate: &Path) -> Cmd {
        let mut cmd = Cmd::new("grub-mkrescue").arg("-o").arg_path(candidate);
        if let Some(compression) = self.compression {
            cmd = cmd.arg(format!("--compress={}", compression));
        }
        cmd = cmd.arg_path(&self.image_dir);
        // everything after `--` goes to xorriso
        if let Some(label) = &self.volume_label {
            cmd = cmd.args(["--", "-volid", label]);
        }
        cmd.allow_fail()
    }
}

impl Strategy for GrubRescue {
    fn name(&self) -> &str {
        self.name
    }

    fn produce(&self, candidate: &Path) -> Outcome {
        match self.command(candidate).run() {
            Ok(result) if result.success() => Outcome::Produced {
                artifact: candidate.to_path_buf(),
                diagnostics: result.diagnostics(),
            },
            Ok(result) => Outcome::Failed {
                diagnostics: result.diagnostics(),
            },
            Err(e) => Outcome::Failed {
                diagnostics: format!("{:#}", e),
            },
        }
    }
}

/// The standard fallback order for `ctx`.
pub fn grub_rescue_options(ctx: &BuildContext) -> Vec<Box<dyn Strategy>> {
    vec![
        Box::new(
            GrubRescue::new("grub-mkrescue (label, compressed)", &ctx.image_dir)
                .volume_label(&ctx.volume_label)
                .compression(ctx.artifact_compression),
        ),
        Box::new(
            GrubRescue::new("grub-mkrescue (compressed)", &ctx.image_dir)
                .compression(ctx.artifact_compression),
        ),
        Box::new(GrubRescue::new("grub-mkrescue (minimal)", &ctx.image_dir)),
    ]
}

type OptionFactory = Box<dyn Fn(&BuildContext) -> Vec<Box<dyn Strategy>>>;

pub struct AssembleArtifact {
    options: OptionFactory,
}

impl AssembleArtifact {
    pub fn new() -> Self {
        Self::with_options(grub_rescue_options)
    }

    /// Use a different set of strategies.
    pub fn with_options(
        options: impl Fn(&BuildContext) -> Vec<Box<dyn Strategy>> + 'static,
    ) -> Self {
        Self {
            options: Box::new(options),
        }
    }
}

impl Default for AssembleArtifact {
    fn default() -> Self {
        Self::new()
    }
}

/// Move the accepted candidate to its final name, readable by everyone.
fn publish(accepted: &Accepted, dest: &Path) -> Result<()> {
    if fs::rename(&accepted.artifact, dest).is_err() {
        // work and output directories may be on different filesystems
        fs::copy(&accepted.artifact, dest).with_context(|| {
            format!(
                "Failed to copy {} to {}",
                accepted.artifact.display(),
                dest.display()
            )
        })?;
        if let Err(e) = fs::remove_file(&accepted.artifact) {
            warn!("Could not remove {}: {}", accepted.artifact.display(), e);
        }
    }
    fs::set_permissions(dest, fs::Permissions::from_mode(0o644))
        .with_context(|| format!("Failed to set permissions on {}", dest.display()))?;
    Ok(())
}

impl Stage for AssembleArtifact {
    fn name(&self) -> &'static str {
        "assemble-artifact"
    }

    fn precondition(&self, ctx: &BuildContext) -> Check {
        require_file(&ctx.squashfs_path(), 1)?;
        require_file(&ctx.live_dir().join("vmlinuz"), 1)?;
        require_file(&ctx.live_dir().join("initrd"), 1)?;
        require_file(&ctx.grub_dir().join("grub.cfg"), 1)?;
        let dest = ctx.artifact_path();
        if dest.exists() {
            return Err(Unmet::new(format!("{} already exists", dest.display())));
        }
        Ok(())
    }

    fn run(&self, ctx: &BuildContext, record: &mut BuildRecord) -> Result<()> {
        let executor = FallbackExecutor::new(
            (self.options)(ctx),
            Validator::new(ctx.min_artifact_bytes),
            &ctx.work_dir,
        );
        let accepted = executor.run()?;

        let dest = ctx.artifact_path();
        publish(&accepted, &dest)?;
        info!(
            "Image written by option {} ({}): {} ({} MB)",
            accepted.index + 1,
            accepted.name,
            dest.display(),
            accepted.size / 1024 / 1024
        );

        record.assembly = Some(AssemblyRecord {
            option: accepted.name.clone(),
            position: accepted.index + 1,
            rejected: accepted.rejected.iter().map(|a| a.option.clone()).collect(),
        });
        record.artifact = Some(ArtifactRecord {
            name: ctx.artifact_name(),
            bytes: accepted.size,
            sha256: None,
        });
        Ok(())
    }

    fn postcondition(&self, ctx: &BuildContext, _record: &BuildRecord) -> Check {
        require_file(&ctx.artifact_path(), ctx.min_artifact_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_drop_assumptions_in_order() {
        let image = Path::new("/w/image");
        let out = Path::new("/w/candidate-0.iso");

        let full = GrubRescue::new("a", image)
            .volume_label("LIVE_BOOKWORM")
            .compression(ArtifactCompression::Xz)
            .command(out);
        assert_eq!(
            full.arg_strings(),
            vec![
                "-o",
                "/w/candidate-0.iso",
                "--compress=xz",
                "/w/image",
                "--",
                "-volid",
                "LIVE_BOOKWORM"
            ]
        );

        let compressed = GrubRescue::new("b", image)
            .compression(ArtifactCompression::Gz)
            .command(out);
        assert_eq!(
            compressed.arg_strings(),
            vec!["-o", "/w/candidate-0.iso", "--compress=gz", "/w/image"]
        );

        let minimal = GrubRescue::new("c", image).command(out);
        assert_eq!(minimal.arg_strings(), vec!["-o", "/w/candidate-0.iso", "/w/image"]);
    }

    #[test]
    fn publish_sets_world_readable() {
        let dir = tempfile::tempdir().unwrap();
        let candidate = dir.path().join("candidate-2.iso");
        fs::write(&candidate, "iso").unwrap();
        fs::set_permissions(&candidate, fs::Permissions::from_mode(0o600)).unwrap();
        let dest = dir.path().join("live.iso");

        let accepted = Accepted {
            index: 2,
            name: "minimal".into(),
            artifact: candidate.clone(),
            size: 3,
            rejected: Vec::new(),
        };
        publish(&accepted, &dest).unwrap();

        assert!(!candidate.exists());
        let mode = fs::metadata(&dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}
