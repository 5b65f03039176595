//! Configuration for a build run.
//!
//! Every setting is an environment variable with a default (a `.env` file
//! in the current directory is loaded first by `main`; the process
//! environment wins). Each variable also has a long flag.

use clap::{Parser, ValueEnum};
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_RELEASE: &str = "bookworm";
pub const DEFAULT_ARCH: &str = "amd64";
pub const DEFAULT_MIRROR: &str = "http://deb.debian.org/debian";
pub const DEFAULT_WORK_DIR: &str = "liveforge-work";

/// Root filesystem compression understood by mksquashfs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RootCompression {
    Gzip,
    Lzo,
    Lz4,
    Xz,
    Zstd,
}

impl fmt::Display for RootCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gzip => "gzip",
            Self::Lzo => "lzo",
            Self::Lz4 => "lz4",
            Self::Xz => "xz",
            Self::Zstd => "zstd",
        };
        f.write_str(name)
    }
}

/// Compression grub-mkrescue applies to the files it embeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ArtifactCompression {
    No,
    Gz,
    Xz,
    Lzo,
}

impl fmt::Display for ArtifactCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::No => "no",
            Self::Gz => "gz",
            Self::Xz => "xz",
            Self::Lzo => "lzo",
        };
        f.write_str(name)
    }
}

/// Build configuration as read from the environment.
#[derive(Debug, Clone, Parser)]
pub struct Config {
    /// Release to bootstrap
    #[arg(long, env = "LIVEFORGE_RELEASE", default_value = DEFAULT_RELEASE)]
    pub release: String,

    /// Target architecture
    #[arg(long, env = "LIVEFORGE_ARCH", default_value = DEFAULT_ARCH)]
    pub arch: String,

    /// Package mirror URL
    #[arg(long, env = "LIVEFORGE_MIRROR", default_value = DEFAULT_MIRROR)]
    pub mirror: String,

    /// Working directory (created, and removed after the run)
    #[arg(long, env = "LIVEFORGE_WORK_DIR", default_value = DEFAULT_WORK_DIR)]
    pub work_dir: PathBuf,

    /// Directory the finished image is written to
    #[arg(long, env = "LIVEFORGE_OUTPUT_DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Thread hint for the root compressor (default: all CPUs)
    #[arg(long, env = "LIVEFORGE_THREADS")]
    pub threads: Option<usize>,

    /// Root filesystem compression
    #[arg(long, env = "LIVEFORGE_SQUASHFS_COMP", value_enum, default_value_t = RootCompression::Xz)]
    pub squashfs_comp: RootCompression,

    /// Root filesystem block size (e.g. 1M, 256K, 131072)
    #[arg(long, env = "LIVEFORGE_SQUASHFS_BLOCK", default_value = "1M")]
    pub squashfs_block: String,

    /// Compression for files embedded in the image
    #[arg(long, env = "LIVEFORGE_ISO_COMP", value_enum, default_value_t = ArtifactCompression::Xz)]
    pub iso_comp: ArtifactCompression,

    /// Keep the working directory after the run
    #[arg(long, env = "LIVEFORGE_KEEP_WORK_DIR")]
    pub keep_work_dir: bool,

    /// Volume identifier (default: LIVE_<RELEASE>)
    #[arg(long, env = "LIVEFORGE_VOLUME_LABEL")]
    pub volume_label: Option<String>,

    /// Additional packages to install, comma separated
    #[arg(long, env = "LIVEFORGE_EXTRA_PACKAGES", value_delimiter = ',')]
    pub extra_packages: Vec<String>,

    /// Smallest image accepted as a successful build, in MiB
    #[arg(long, env = "LIVEFORGE_MIN_ISO_MB", default_value_t = 10)]
    pub min_iso_mb: u64,

    /// Seconds to wait for a graceful unmount before forcing it
    #[arg(long, env = "LIVEFORGE_UNMOUNT_TIMEOUT", default_value_t = 10)]
    pub unmount_timeout: u64,

    /// Program used to elevate privileged calls
    #[arg(long, env = "LIVEFORGE_ELEVATE", default_value = "sudo")]
    pub elevate: String,
}

impl Config {
    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  LIVEFORGE_RELEASE: {}", self.release);
        println!("  LIVEFORGE_ARCH: {}", self.arch);
        println!("  LIVEFORGE_MIRROR: {}", self.mirror);
        println!("  LIVEFORGE_WORK_DIR: {}", self.work_dir.display());
        println!("  LIVEFORGE_OUTPUT_DIR: {}", self.output_dir.display());
        match self.threads {
            Some(n) => println!("  LIVEFORGE_THREADS: {}", n),
            None => println!("  LIVEFORGE_THREADS: (all CPUs)"),
        }
        println!("  LIVEFORGE_SQUASHFS_COMP: {}", self.squashfs_comp);
        println!("  LIVEFORGE_SQUASHFS_BLOCK: {}", self.squashfs_block);
        println!("  LIVEFORGE_ISO_COMP: {}", self.iso_comp);
        println!("  LIVEFORGE_KEEP_WORK_DIR: {}", self.keep_work_dir);
        if let Some(label) = &self.volume_label {
            println!("  LIVEFORGE_VOLUME_LABEL: {}", label);
        }
        if !self.extra_packages.is_empty() {
            println!("  LIVEFORGE_EXTRA_PACKAGES: {}", self.extra_packages.join(","));
        }
        println!("  LIVEFORGE_MIN_ISO_MB: {}", self.min_iso_mb);
        println!("  LIVEFORGE_UNMOUNT_TIMEOUT: {}", self.unmount_timeout);
        println!("  LIVEFORGE_ELEVATE: {}", self.elevate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_apply_without_environment() {
        for (key, _) in std::env::vars() {
            if key.starts_with("LIVEFORGE_") {
                std::env::remove_var(key);
            }
        }
        let config = Config::try_parse_from(["liveforge"]).unwrap();
        assert_eq!(config.release, DEFAULT_RELEASE);
        assert_eq!(config.arch, DEFAULT_ARCH);
        assert_eq!(config.squashfs_comp, RootCompression::Xz);
        assert_eq!(config.iso_comp, ArtifactCompression::Xz);
        assert!(!config.keep_work_dir);
        assert!(config.extra_packages.is_empty());
        assert_eq!(config.min_iso_mb, 10);
    }

    #[test]
    #[serial]
    fn environment_overrides_defaults() {
        std::env::set_var("LIVEFORGE_RELEASE", "trixie");
        std::env::set_var("LIVEFORGE_SQUASHFS_COMP", "zstd");
        std::env::set_var("LIVEFORGE_KEEP_WORK_DIR", "true");
        std::env::set_var("LIVEFORGE_EXTRA_PACKAGES", "vim,curl");

        let config = Config::try_parse_from(["liveforge"]);

        std::env::remove_var("LIVEFORGE_RELEASE");
        std::env::remove_var("LIVEFORGE_SQUASHFS_COMP");
        std::env::remove_var("LIVEFORGE_KEEP_WORK_DIR");
        std::env::remove_var("LIVEFORGE_EXTRA_PACKAGES");

        let config = config.unwrap();
        assert_eq!(config.release, "trixie");
        assert_eq!(config.squashfs_comp, RootCompression::Zstd);
        assert!(config.keep_work_dir);
        assert_eq!(config.extra_packages, vec!["vim", "curl"]);
    }

    #[test]
    #[serial]
    fn positional_arguments_are_rejected() {
        assert!(Config::try_parse_from(["liveforge", "bookworm"]).is_err());
    }
}
