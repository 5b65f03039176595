//! Host tool availability and privilege checks.

use std::fs;
use std::os::unix::fs::MetadataExt;

use crate::process;

use super::types::CheckResult;

/// (tool, Debian package, purpose)
const REQUIRED_TOOLS: &[(&str, &str, &str)] = &[
    ("debootstrap", "debootstrap", "bootstraps the root filesystem"),
    ("mksquashfs", "squashfs-tools", "compresses the root"),
    ("unsquashfs", "squashfs-tools", "verifies the compressed root"),
    ("grub-mkrescue", "grub-common", "masters the bootable image"),
    ("xorriso", "xorriso", "used by grub-mkrescue"),
    ("mformat", "mtools", "used by grub-mkrescue for the EFI image"),
];

/// Check host tools are installed, plus the elevation program.
pub fn check_host_tools(elevate: &str) -> Vec<CheckResult> {
    let mut results: Vec<CheckResult> = REQUIRED_TOOLS
        .iter()
        .map(|(tool, package, purpose)| check_tool(tool, package, purpose))
        .collect();
    results.push(check_tool(elevate, elevate, "elevates privileged steps"));
    results
}

fn check_tool(tool: &str, package: &str, purpose: &str) -> CheckResult {
    match process::which(tool) {
        Some(path) => CheckResult::pass_with(tool, &path.display().to_string()),
        None => CheckResult::fail(
            tool,
            &format!("Not found. Install the '{}' package ({}).", package, purpose),
        ),
    }
}

/// The build must run unprivileged so every elevated call is explicit and
/// the image belongs to the invoking user.
pub fn check_not_root() -> CheckResult {
    match effective_uid() {
        Ok(euid) => check_euid(euid),
        Err(e) => CheckResult::warn(
            "unprivileged user",
            &format!("Cannot determine the effective uid: {}", e),
        ),
    }
}

/// `/proc/self` belongs to the effective uid of the calling process.
fn effective_uid() -> std::io::Result<u32> {
    Ok(fs::metadata("/proc/self")?.uid())
}

fn check_euid(euid: u32) -> CheckResult {
    if euid == 0 {
        CheckResult::fail(
            "unprivileged user",
            "Running as root. Run as a normal user; privileged steps are elevated individually.",
        )
    } else {
        CheckResult::pass_with("unprivileged user", &format!("uid {}", euid))
    }
}
