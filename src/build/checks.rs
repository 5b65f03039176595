//! Pre- and postcondition checks shared by stages.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

/// A check that did not hold, with a human-readable description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unmet(pub String);

impl Unmet {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl std::fmt::Display for Unmet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub type Check = Result<(), Unmet>;

pub fn require_dir(path: &Path) -> Check {
    if path.is_dir() {
        Ok(())
    } else {
        Err(Unmet::new(format!("directory {} does not exist", path.display())))
    }
}

/// `path` is a regular file of at least `min_bytes`.
pub fn require_file(path: &Path, min_bytes: u64) -> Check {
    let meta = fs::metadata(path)
        .map_err(|_| Unmet::new(format!("{} does not exist", path.display())))?;
    if !meta.is_file() {
        return Err(Unmet::new(format!("{} is not a regular file", path.display())));
    }
    if meta.len() < min_bytes {
        return Err(Unmet::new(format!(
            "{} is {} bytes, expected at least {}",
            path.display(),
            meta.len(),
            min_bytes
        )));
    }
    Ok(())
}

/// `path` does not exist, or is an empty directory.
pub fn absent_or_empty(path: &Path) -> Check {
    match fs::read_dir(path) {
        Err(_) if !path.exists() => Ok(()),
        Err(e) => Err(Unmet::new(format!("cannot read {}: {}", path.display(), e))),
        Ok(mut entries) => {
            if entries.next().is_none() {
                Ok(())
            } else {
                Err(Unmet::new(format!(
                    "{} already contains files (left over from a previous build?)",
                    path.display()
                )))
            }
        }
    }
}

/// Kernel images (`boot/vmlinuz-*`) under `root`, oldest version first.
pub fn kernel_images(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(root.join("boot")) else {
        return Vec::new();
    };
    let mut kernels: Vec<(String, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            let version = name.strip_prefix("vmlinuz-")?.to_string();
            Some((version, e.path()))
        })
        .collect();
    kernels.sort_by(|a, b| compare_versions(&a.0, &b.0));
    kernels.into_iter().map(|(_, path)| path).collect()
}

/// Order version strings by their runs of digits and non-digits, comparing
/// digit runs as numbers so `6.1.0-10` sorts after `6.1.0-9`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (mut left, mut right) = (version_runs(a), version_runs(b));
    loop {
        let ord = match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => compare_run(x, y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
}

fn compare_run(a: &str, b: &str) -> Ordering {
    let numeric = |s: &str| s.bytes().all(|c| c.is_ascii_digit());
    match (numeric(a), numeric(b)) {
        (true, true) => {
            let a = a.trim_start_matches('0');
            let b = b.trim_start_matches('0');
            a.len().cmp(&b.len()).then_with(|| a.cmp(b))
        }
        // a number ranks below text in the same position
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.cmp(b),
    }
}

fn version_runs(s: &str) -> impl Iterator<Item = &str> {
    let mut rest = s;
    std::iter::from_fn(move || {
        let first = rest.chars().next()?;
        let digit = first.is_ascii_digit();
        let end = rest
            .find(|c: char| c.is_ascii_digit() != digit)
            .unwrap_or(rest.len());
        let (run, tail) = rest.split_at(end);
        rest = tail;
        Some(run)
    })
}

/// At least one kernel image is present under `root`.
pub fn require_kernel(root: &Path) -> Check {
    if kernel_images(root).is_empty() {
        Err(Unmet::new(format!(
            "no kernel image (boot/vmlinuz-*) under {}",
            root.display()
        )))
    } else {
        Ok(())
    }
}
