//! Build context shared across all stages.
//!
//! Holds the validated configuration and every path a stage needs. Built
//! once from [`Config`] and never mutated afterwards.

use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{ArtifactCompression, Config, RootCompression};
use crate::error::ConfigError;

const MIB: u64 = 1024 * 1024;

/// Shared, immutable context for one build.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub release: String,
    pub arch: String,
    pub mirror: String,
    /// Working directory; everything under it is temporary.
    pub work_dir: PathBuf,
    /// Root filesystem being built (`<work>/chroot`).
    pub chroot_dir: PathBuf,
    /// Tree handed to the mastering tool (`<work>/image`).
    pub image_dir: PathBuf,
    /// Where the finished artifact lands.
    pub output_dir: PathBuf,
    pub threads: usize,
    pub root_compression: RootCompression,
    pub block_size: u32,
    pub artifact_compression: ArtifactCompression,
    pub keep_work_dir: bool,
    pub volume_label: String,
    pub extra_packages: Vec<String>,
    pub min_artifact_bytes: u64,
    pub unmount_timeout: Duration,
    /// Build timestamp, `YYYYmmdd-HHMMSS`.
    pub timestamp: String,
}

impl BuildContext {
    /// Validate `config` and derive all paths. Relative paths are resolved
    /// against the current directory.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir().map_err(ConfigError::CurrentDir)?;
        let timestamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        Self::resolve(config, &cwd, timestamp)
    }

    /// Like [`from_config`](Self::from_config) with an explicit base
    /// directory and timestamp.
    pub fn resolve(config: &Config, base: &Path, timestamp: String) -> Result<Self, ConfigError> {
        let release = non_empty("release", &config.release)?;
        let arch = non_empty("arch", &config.arch)?;
        let mirror = non_empty("mirror", &config.mirror)?;
        if !["http://", "https://", "file://"]
            .iter()
            .any(|scheme| mirror.starts_with(scheme))
        {
            return Err(ConfigError::Invalid {
                name: "mirror",
                value: mirror,
                reason: "expected an http://, https:// or file:// URL".to_string(),
            });
        }

        let threads = match config.threads {
            Some(0) => {
                return Err(ConfigError::Invalid {
                    name: "threads",
                    value: "0".to_string(),
                    reason: "must be at least 1".to_string(),
                })
            }
            Some(n) => n,
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        };

        let block_size = parse_block_size(&config.squashfs_block)?;

        if config.min_iso_mb == 0 {
            return Err(ConfigError::Invalid {
                name: "min_iso_mb",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let volume_label = match &config.volume_label {
            Some(label) => sanitize_label(&non_empty("volume_label", label)?),
            None => default_label(&release),
        };

        // mountinfo lists real paths, so the work dir must be one too
        let work_dir = real_path(&absolute(base, &config.work_dir));
        if let Some(reason) = unsafe_work_dir(&work_dir) {
            return Err(ConfigError::UnsafeWorkDir {
                path: work_dir,
                reason,
            });
        }
        let output_dir = absolute(base, &config.output_dir);
        let extra_packages = config
            .extra_packages
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        Ok(Self {
            chroot_dir: work_dir.join("chroot"),
            image_dir: work_dir.join("image"),
            work_dir,
            output_dir,
            release,
            arch,
            mirror,
            threads,
            root_compression: config.squashfs_comp,
            block_size,
            artifact_compression: config.iso_comp,
            keep_work_dir: config.keep_work_dir,
            volume_label,
            extra_packages,
            min_artifact_bytes: config.min_iso_mb * MIB,
            unmount_timeout: Duration::from_secs(config.unmount_timeout),
            timestamp,
        })
    }

    /// `<image>/live`, holding kernel, initrd and the compressed root.
    pub fn live_dir(&self) -> PathBuf {
        self.image_dir.join("live")
    }

    pub fn squashfs_path(&self) -> PathBuf {
        self.live_dir().join("filesystem.squashfs")
    }

    pub fn grub_dir(&self) -> PathBuf {
        self.image_dir.join("boot/grub")
    }

    /// File name of the finished image, fixed by release, arch and timestamp.
    pub fn artifact_name(&self) -> String {
        format!("live-{}-{}-{}.iso", self.release, self.arch, self.timestamp)
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.output_dir.join(self.artifact_name())
    }

    /// Directories that must exist before the first stage runs. The chroot
    /// itself is created by the bootstrapper.
    pub fn scaffold_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.work_dir.clone(),
            self.live_dir(),
            self.grub_dir(),
            self.output_dir.clone(),
        ]
    }
}

fn non_empty(name: &'static str, value: &str) -> Result<String, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::Empty { name });
    }
    Ok(value.to_string())
}

fn absolute(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Resolve symlinks in the longest existing prefix of `path`. Components
/// that do not exist yet are appended unchanged.
pub fn real_path(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut missing = Vec::new();
    loop {
        if let Ok(canonical) = fs::canonicalize(existing) {
            return missing
                .iter()
                .rev()
                .fold(canonical, |acc, name| acc.join(name));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name);
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

/// Why `path` can never be a working directory: the whole of it is
/// deleted at teardown. Expects a path from [`real_path`].
pub fn unsafe_work_dir(path: &Path) -> Option<&'static str> {
    if path.parent().is_none() {
        return Some("it is the filesystem root");
    }
    let home = real_path(&dirs::home_dir()?);
    if path == home {
        Some("it is the home directory")
    } else if home.starts_with(path) {
        Some("it contains the home directory")
    } else {
        None
    }
}

/// Parse `1M`, `256K` or a plain byte count. mksquashfs accepts powers of
/// two from 4K to 1M.
pub fn parse_block_size(value: &str) -> Result<u32, ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        name: "squashfs_block",
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = value.trim();
    let (digits, multiplier) = match trimmed.chars().last() {
        Some('K' | 'k') => (&trimmed[..trimmed.len() - 1], 1024),
        Some('M' | 'm') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        _ => (trimmed, 1),
    };
    let number: u32 = digits
        .parse()
        .map_err(|_| invalid("expected a number with optional K or M suffix"))?;
    let bytes = number
        .checked_mul(multiplier)
        .ok_or_else(|| invalid("too large"))?;

    if !bytes.is_power_of_two() || !(4096..=1024 * 1024).contains(&bytes) {
        return Err(invalid("must be a power of two between 4K and 1M"));
    }
    Ok(bytes)
}

fn default_label(release: &str) -> String {
    sanitize_label(&format!("LIVE_{}", release))
}

/// ISO 9660 volume ids: uppercase, digits and underscore, 32 characters.
fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            let c = c.to_ascii_uppercase();
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(32)
        .collect()
}
