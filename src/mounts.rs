//! Pseudo-filesystem binds into the working root.
//!
//! [`ResourceGuard`] owns the ordered list of [`MountPoint`]s. Acquisition
//! follows that order and release is always its exact reverse, whether an
//! entry comes off gracefully or through a forced lazy unbind.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::ResourceError;
use crate::privilege::Privileged;
use crate::process::Cmd;

/// Grace period between TERM and KILL for processes left in the root.
const HOLDER_GRACE: Duration = Duration::from_secs(2);

/// Host pseudo-filesystems bound into the chroot, in acquisition order.
/// `/dev/pts` must follow `/dev`.
pub const PSEUDO_FILESYSTEMS: &[(&str, bool)] = &[
    ("/dev", true),
    ("/dev/pts", true),
    ("/proc", true),
    ("/sys", true),
    ("/run", false),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    /// Path relative to the working root.
    pub target: PathBuf,
    /// Host path bound at `target`.
    pub source: PathBuf,
    /// A required bind that fails aborts acquisition.
    pub required: bool,
    mounted: bool,
}

impl MountPoint {
    pub fn bind(source: impl Into<PathBuf>, required: bool) -> Self {
        let source = source.into();
        let target = source
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        Self {
            target,
            source,
            required,
            mounted: false,
        }
    }

    /// Absolute location of the bind under `root`.
    pub fn full_target(&self, root: &Path) -> PathBuf {
        root.join(&self.target)
    }
}

/// The standard set of binds for a chroot build.
pub fn standard_mounts() -> Vec<MountPoint> {
    PSEUDO_FILESYSTEMS
        .iter()
        .map(|(source, required)| MountPoint::bind(*source, *required))
        .collect()
}

pub struct ResourceGuard {
    root: PathBuf,
    mounts: Vec<MountPoint>,
    /// Indices into `mounts`, in the order they were bound.
    acquired: Vec<usize>,
    exec: Arc<dyn Privileged>,
    unmount_timeout: Duration,
}

impl ResourceGuard {
    pub fn new(
        root: impl Into<PathBuf>,
        mounts: Vec<MountPoint>,
        exec: Arc<dyn Privileged>,
        unmount_timeout: Duration,
    ) -> Self {
        Self {
            root: root.into(),
            mounts,
            acquired: Vec::new(),
            exec,
            unmount_timeout,
        }
    }

    /// True while any entry is still bound.
    pub fn is_bound(&self) -> bool {
        !self.acquired.is_empty()
    }

    /// Bind every entry in declared order. Entries already bound are left
    /// alone. A failing optional bind is logged and skipped; a failing
    /// required bind stops acquisition (entries bound so far stay recorded
    /// and come off in `release`).
    pub fn acquire(&mut self) -> Result<(), ResourceError> {
        for idx in 0..self.mounts.len() {
            if self.mounts[idx].mounted {
                continue;
            }
            let mount = self.mounts[idx].clone();
            let target = mount.full_target(&self.root);

            if is_mount_point(&target) {
                debug!(target = %target.display(), "already bound, adopting");
                self.mark_bound(idx);
                continue;
            }

            if !mount.source.exists() {
                if mount.required {
                    return Err(ResourceError::Bind {
                        source_path: mount.source,
                        target,
                        detail: "source does not exist on the host".to_string(),
                    });
                }
                debug!(source = %mount.source.display(), "optional bind source missing, skipping");
                continue;
            }

            match self.bind_one(&mount, &target) {
                Ok(()) => {
                    debug!(target = %target.display(), "bound");
                    self.mark_bound(idx);
                }
                Err(detail) if mount.required => {
                    return Err(ResourceError::Bind {
                        source_path: mount.source,
                        target,
                        detail,
                    });
                }
                Err(detail) => {
                    warn!(target = %target.display(), "optional bind failed: {}", detail);
                }
            }
        }
        Ok(())
    }

    fn mark_bound(&mut self, idx: usize) {
        self.mounts[idx].mounted = true;
        self.acquired.push(idx);
    }

    fn bind_one(&self, mount: &MountPoint, target: &Path) -> Result<(), String> {
        self.exec
            .run(Cmd::new("mkdir").arg("-p").arg_path(target))
            .map_err(|e| format!("{:#}", e))?;
        self.exec
            .run(
                Cmd::new("mount")
                    .arg("--bind")
                    .arg_path(&mount.source)
                    .arg_path(target),
            )
            .map_err(|e| format!("{:#}", e))?;
        Ok(())
    }

    /// Unbind everything currently bound, newest first.
    ///
    /// Each entry gets a bounded graceful unmount; on timeout or failure
    /// it falls back to a lazy unmount. Never fails: problems are logged
    /// and returned. Entries that could not be unbound at all stay
    /// recorded so a later call retries them.
    pub fn release(&mut self) -> Vec<ResourceError> {
        let mut problems = Vec::new();
        if self.acquired.is_empty() {
            return problems;
        }

        self.terminate_holders();

        let mut stuck = Vec::new();
        while let Some(idx) = self.acquired.pop() {
            let target = self.mounts[idx].full_target(&self.root);
            match self.unbind_one(&target) {
                Ok(()) => self.mounts[idx].mounted = false,
                Err(detail) => {
                    let err = ResourceError::Unbind {
                        target: target.clone(),
                        detail,
                    };
                    warn!("{}", err);
                    problems.push(err);
                    stuck.push(idx);
                }
            }
        }
        // Keep acquisition order for anything left behind.
        stuck.reverse();
        self.acquired = stuck;
        problems
    }

    fn unbind_one(&self, target: &Path) -> Result<(), String> {
        let graceful = self.exec.run_bounded(
            Cmd::new("umount").arg_path(target).allow_fail(),
            self.unmount_timeout,
        );
        let reason = match graceful {
            Ok(Some(result)) if result.success() => {
                debug!(target = %target.display(), "unbound");
                return Ok(());
            }
            Ok(Some(result)) => result.diagnostics(),
            Ok(None) => format!("timed out after {}s", self.unmount_timeout.as_secs()),
            Err(e) => format!("{:#}", e),
        };

        warn!(
            target = %target.display(),
            "graceful unmount failed ({}), forcing lazy unmount",
            reason
        );
        self.exec
            .run(Cmd::new("umount").arg("-l").arg_path(target))
            .map(|_| ())
            .map_err(|e| format!("{}; lazy unmount: {:#}", reason, e))
    }

    /// Terminate processes whose root directory lies under the working
    /// root. Best effort; returns how many were signalled.
    pub fn terminate_holders(&self) -> usize {
        let pids = self.find_holders();
        if pids.is_empty() {
            return 0;
        }
        info!(count = pids.len(), "terminating processes left in the build root");
        self.signal(&pids, "TERM");
        std::thread::sleep(HOLDER_GRACE);

        let survivors = self.find_holders();
        if !survivors.is_empty() {
            warn!(count = survivors.len(), "processes ignored TERM, sending KILL");
            self.signal(&survivors, "KILL");
        }
        pids.len()
    }

    fn find_holders(&self) -> Vec<u32> {
        let root = escape_glob(&self.root.to_string_lossy());
        let cmd = Cmd::new("find")
            .args(["/proc", "-mindepth", "2", "-maxdepth", "2", "-name", "root"])
            .args(["(", "-lname", &root, "-o", "-lname", &format!("{}/*", root), ")"])
            .allow_fail();
        match self.exec.run(cmd) {
            Ok(result) => parse_holder_pids(&result.stdout),
            Err(e) => {
                warn!("could not enumerate processes in build root: {:#}", e);
                Vec::new()
            }
        }
    }

    fn signal(&self, pids: &[u32], signal: &str) {
        let pids: Vec<String> = pids.iter().map(u32::to_string).collect();
        let cmd = Cmd::new("kill")
            .arg(format!("-{}", signal))
            .args(&pids)
            .allow_fail();
        if let Err(e) = self.exec.run(cmd) {
            warn!("failed to send {} to {:?}: {:#}", signal, pids, e);
        }
    }
}

/// Extract PIDs from `/proc/<pid>/root` lines.
pub fn parse_holder_pids(output: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = output
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("/proc/")?;
            let pid = rest.strip_suffix("/root")?;
            pid.parse().ok()
        })
        .filter(|pid| *pid != std::process::id())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Mount points listed in a mountinfo table.
pub fn parse_mountinfo(text: &str) -> Vec<PathBuf> {
    text.lines()
        .filter_map(|line| line.split(' ').nth(4))
        .map(|field| PathBuf::from(unescape_octal(field)))
        .collect()
}

/// Decode the `\040`-style escapes the kernel uses in mount tables.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn current_mounts() -> Vec<PathBuf> {
    fs::read_to_string("/proc/self/mountinfo")
        .map(|text| parse_mountinfo(&text))
        .unwrap_or_default()
}

/// True if `path` is currently a mount point on this host.
pub fn is_mount_point(path: &Path) -> bool {
    current_mounts().iter().any(|m| m == path)
}

/// Every mount at or below `root`.
pub fn mounts_under(root: &Path) -> Vec<PathBuf> {
    current_mounts()
        .into_iter()
        .filter(|m| m.starts_with(root))
        .collect()
}
