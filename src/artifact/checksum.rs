//! SHA-256 checksums: image tree list, artifact sidecar, build record.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::build::checks::{require_file, Check};
use crate::build::{BuildContext, BuildRecord, Stage};

/// Name of the checksum list written into the image tree.
pub const TREE_CHECKSUMS: &str = "sha256sum.txt";

/// Hex SHA-256 of a file, streamed.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// `<path>.<suffix>`, keeping the full original file name.
pub fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Write `sha256sum`-format lines for every file under `root` to
/// `root/sha256sum.txt`. The list itself is not included. Returns the
/// number of files hashed.
pub fn write_tree_checksums(root: &Path) -> Result<usize> {
    let list = root.join(TREE_CHECKSUMS);
    let mut lines = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() || entry.path() == list {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let hash = sha256_file(entry.path())?;
        lines.push(format!("{}  ./{}", hash, relative.display()));
    }

    let mut text = lines.join("\n");
    text.push('\n');
    fs::write(&list, text).with_context(|| format!("Failed to write {}", list.display()))?;
    Ok(lines.len())
}

/// Final stage: artifact checksum and machine-readable build record.
pub struct ChecksumArtifact;

impl Stage for ChecksumArtifact {
    fn name(&self) -> &'static str {
        "checksum"
    }

    fn precondition(&self, ctx: &BuildContext) -> Check {
        require_file(&ctx.artifact_path(), 1)
    }

    fn run(&self, ctx: &BuildContext, record: &mut BuildRecord) -> Result<()> {
        let artifact = ctx.artifact_path();
        let hash = sha256_file(&artifact)?;

        let sum_path = sidecar(&artifact, "sha256");
        fs::write(&sum_path, format!("{}  {}\n", hash, ctx.artifact_name()))
            .with_context(|| format!("Failed to write {}", sum_path.display()))?;

        if let Some(artifact) = record.artifact.as_mut() {
            artifact.sha256 = Some(hash);
        }

        let json_path = sidecar(&artifact, "json");
        let json = serde_json::to_string_pretty(record).context("Failed to encode build record")?;
        fs::write(&json_path, json + "\n")
            .with_context(|| format!("Failed to write {}", json_path.display()))?;
        Ok(())
    }

    fn postcondition(&self, ctx: &BuildContext, _record: &BuildRecord) -> Check {
        let artifact = ctx.artifact_path();
        require_file(&sidecar(&artifact, "sha256"), 65)?;
        require_file(&sidecar(&artifact, "json"), 2)
    }
}
