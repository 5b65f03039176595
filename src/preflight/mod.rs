//! Preflight checks.
//!
//! Validates host tools and the build environment before anything is
//! bootstrapped. Run with `liveforge --preflight` to check only.

mod environment;
mod host_tools;
mod types;

use anyhow::{bail, Result};
use tracing::info;

use crate::build::BuildContext;

pub use types::{CheckResult, CheckStatus, PreflightReport};

/// Run all preflight checks.
pub fn run_preflight(ctx: &BuildContext, elevate: &str) -> PreflightReport {
    let mut checks = Vec::new();

    info!("Checking host tools...");
    checks.extend(host_tools::check_host_tools(elevate));
    checks.push(host_tools::check_not_root());

    info!("Checking build environment...");
    checks.extend(environment::check_build_environment(ctx));

    PreflightReport { checks }
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(ctx: &BuildContext, elevate: &str) -> Result<()> {
    let report = run_preflight(ctx, elevate);
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before building.",
            report.fail_count()
        );
    }

    info!("All preflight checks passed");
    Ok(())
}
