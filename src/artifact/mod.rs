//! Stages that turn the configured root into the published image.
//!
//! - `squashfs` - compress-root
//! - `iso` - assemble-artifact (grub-mkrescue fallback chain)
//! - `checksum` - checksum sidecars and build record

pub mod checksum;
pub mod iso;
pub mod squashfs;

pub use checksum::{sha256_file, sidecar, ChecksumArtifact};
pub use iso::{grub_rescue_options, AssembleArtifact, GrubRescue};
pub use squashfs::CompressRoot;
