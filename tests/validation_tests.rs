//! Validation tests against a real build.
//!
//! These bootstrap a root from a real mirror and need sudo, debootstrap,
//! mksquashfs, grub-mkrescue and network access. A full run takes several
//! minutes.
//!
//! Run these tests with:
//!   cargo test -- --ignored validation

mod helpers;

use helpers::{assert_file_exists, TestEnv};
use liveforge::artifact::checksum::TREE_CHECKSUMS;
use liveforge::artifact::{sha256_file, sidecar};
use liveforge::coordinator::{Coordinator, Removal};
use liveforge::lifecycle::RunState;
use liveforge::mounts::mounts_under;
use liveforge::privilege::{Elevated, Privileged};
use liveforge::stages;
use serial_test::serial;
use std::fs;
use std::sync::Arc;

fn require_build_host() {
    let missing: Vec<&str> = ["sudo", "debootstrap", "mksquashfs", "unsquashfs", "grub-mkrescue"]
        .into_iter()
        .filter(|tool| which::which(tool).is_err())
        .collect();
    if !missing.is_empty() {
        panic!("Validation needs these host tools: {}", missing.join(", "));
    }
}

#[test]
#[ignore]
#[serial]
fn test_validation_full_build_produces_checked_artifact() {
    require_build_host();
    let env = TestEnv::new();
    let ctx = env.context(&["--keep-work-dir", "--squashfs-comp", "lz4"]);
    let artifact = ctx.artifact_path();
    let image_dir = ctx.image_dir.clone();
    let chroot = ctx.chroot_dir.clone();

    let exec: Arc<dyn Privileged> = Arc::new(Elevated::new("sudo"));
    let mut coordinator = Coordinator::new(ctx, exec.clone());
    let reports = coordinator
        .run(stages::standard(exec.clone()))
        .expect("build should succeed");
    assert_eq!(reports.len(), 6);
    assert_eq!(coordinator.state(), RunState::Completed);

    // nothing may stay bound once the pipeline has finished
    assert!(mounts_under(&chroot).is_empty());

    assert_file_exists(&artifact);
    assert!(fs::metadata(&artifact).unwrap().len() >= 10 * 1024 * 1024);

    let sum = fs::read_to_string(sidecar(&artifact, "sha256")).unwrap();
    assert_eq!(
        sum.split_whitespace().next().unwrap(),
        sha256_file(&artifact).unwrap()
    );

    let record: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(sidecar(&artifact, "json")).unwrap()).unwrap();
    let position = record["assembly"]["position"].as_u64().unwrap();
    assert!((1..=3).contains(&position));
    assert!(record["kernel_version"].as_str().is_some());
    assert!(record["package_count"].as_u64().unwrap() > 100);

    for name in ["live/vmlinuz", "live/initrd", "live/filesystem.squashfs", TREE_CHECKSUMS] {
        assert_file_exists(&image_dir.join(name));
    }

    let report = coordinator.teardown().unwrap();
    assert!(matches!(report.removal, Removal::Preserved));

    // the kept root belongs to root; clean it up the same way a build would
    exec.run(
        liveforge::process::Cmd::new("rm")
            .args(["-rf", "--one-file-system"])
            .arg_path(&env.work_dir),
    )
    .unwrap();
}

#[test]
#[ignore]
#[serial]
fn test_validation_failed_build_leaves_no_binds() {
    require_build_host();
    let env = TestEnv::new();
    // no such release on the mirror: debootstrap fails, teardown still runs
    let ctx = env.context(&["--release", "no-such-release"]);
    let chroot = ctx.chroot_dir.clone();

    let exec: Arc<dyn Privileged> = Arc::new(Elevated::new("sudo"));
    let mut coordinator = Coordinator::new(ctx, exec.clone());
    let err = coordinator.run(stages::standard(exec)).unwrap_err();
    assert_eq!(err.exit_code(), liveforge::error::EXIT_STAGE);

    let report = coordinator.teardown().unwrap();
    assert!(report.unbind_problems.is_empty());
    assert!(matches!(report.removal, Removal::Removed));
    assert!(mounts_under(&chroot).is_empty());
    assert!(!env.work_dir.exists());
}
