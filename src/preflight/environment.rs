//! Build environment checks (output directory, disk space).

use std::path::{Path, PathBuf};

use crate::build::BuildContext;
use crate::process::Cmd;

use super::types::CheckResult;

/// A full build (root, compressed root, image) needs roughly this much.
const MIN_FREE_GB: u64 = 8;

/// Check build environment (directories, disk space).
pub fn check_build_environment(ctx: &BuildContext) -> Vec<CheckResult> {
    vec![
        check_output_writable(&ctx.output_dir),
        check_disk_space(&ctx.work_dir),
    ]
}

fn check_output_writable(output_dir: &Path) -> CheckResult {
    let name = "output directory writable";
    if let Err(e) = std::fs::create_dir_all(output_dir) {
        return CheckResult::fail(
            name,
            &format!("Cannot create {}: {}", output_dir.display(), e),
        );
    }
    match tempfile::NamedTempFile::new_in(output_dir) {
        Ok(_) => CheckResult::pass_with(name, &output_dir.display().to_string()),
        Err(e) => CheckResult::fail(
            name,
            &format!("Cannot write to {}: {}", output_dir.display(), e),
        ),
    }
}

/// Closest ancestor of `path` (or `path` itself) that exists.
fn existing_ancestor(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|p| p.exists())
        .unwrap_or_else(|| Path::new("/"))
        .to_path_buf()
}

fn check_disk_space(work_dir: &Path) -> CheckResult {
    let ancestor = existing_ancestor(work_dir);
    // df avoids a statvfs binding
    let result = Cmd::new("df")
        .args(["--output=avail", "-B1"])
        .arg_path(&ancestor)
        .allow_fail()
        .run();

    let avail = result
        .ok()
        .filter(|r| r.success())
        .and_then(|r| parse_df_avail(&r.stdout));
    match avail {
        Some(bytes) => {
            let free_gb = bytes / (1024 * 1024 * 1024);
            if free_gb < MIN_FREE_GB {
                CheckResult::warn(
                    "disk space",
                    &format!("{}GB free - a build needs ~{}GB", free_gb, MIN_FREE_GB),
                )
            } else {
                CheckResult::pass_with("disk space", &format!("{}GB free", free_gb))
            }
        }
        None => CheckResult::warn(
            "disk space",
            &format!("Could not determine free space at {}", ancestor.display()),
        ),
    }
}

/// Available bytes from `df --output=avail -B1` (header line first).
fn parse_df_avail(output: &str) -> Option<u64> {
    output.lines().nth(1)?.trim().parse().ok()
}
