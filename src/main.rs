//! Liveforge - bootable live image builder.
//!
//! Bootstraps a root filesystem, customizes it, compresses it and masters
//! a bootable ISO. All settings come from `LIVEFORGE_*` environment
//! variables (or a `.env` file); there are no positional arguments.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use liveforge::build::BuildContext;
use liveforge::config::Config;
use liveforge::coordinator::{install_signal_handler, Coordinator, Removal};
use liveforge::error::{BuildError, EXIT_CONFIG, EXIT_PREFLIGHT};
use liveforge::privilege::{Elevated, Privileged};
use liveforge::{preflight, stages};

#[derive(Parser)]
#[command(name = "liveforge")]
#[command(about = "Build a bootable live ISO from a package mirror")]
#[command(
    after_help = "QUICK START:\n  liveforge --preflight   Check host tools\n  liveforge               Build with defaults\n  LIVEFORGE_RELEASE=trixie liveforge"
)]
struct Cli {
    #[command(flatten)]
    config: Config,

    /// Run preflight checks only
    #[arg(long)]
    preflight: bool,

    /// Skip preflight checks
    #[arg(long, conflicts_with = "preflight")]
    skip_preflight: bool,

    /// Print the effective configuration before building
    #[arg(long)]
    show_config: bool,

    /// Debug logging (overridden by LIVEFORGE_LOG)
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("LIVEFORGE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    // Load .env if present; the process environment wins.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn run(cli: Cli) -> Result<(), u8> {
    if cli.show_config {
        cli.config.print();
    }

    let ctx = BuildContext::from_config(&cli.config).map_err(|e| {
        error!("Configuration error: {}", e);
        EXIT_CONFIG
    })?;

    if cli.preflight || !cli.skip_preflight {
        preflight::run_preflight_or_fail(&ctx, &cli.config.elevate).map_err(|e| {
            error!("{:#}", e);
            EXIT_PREFLIGHT
        })?;
        if cli.preflight {
            return Ok(());
        }
    }

    let exec: Arc<dyn Privileged> = Arc::new(Elevated::new(&cli.config.elevate));
    let mut coordinator = Coordinator::new(ctx, exec.clone());
    if let Err(e) = install_signal_handler(coordinator.interrupt_flag()) {
        warn!("Could not install signal handler: {}", e);
    }

    let result = coordinator.run(stages::standard(exec));
    let teardown = coordinator.teardown();

    match result {
        Ok(reports) => {
            let total: f64 = reports.iter().map(|r| r.elapsed.as_secs_f64()).sum();
            let ctx = coordinator.context();
            info!("=== Build complete ({:.1}m) ===", total / 60.0);
            info!("  Image: {}", ctx.artifact_path().display());
            if let Some(assembly) = &coordinator.record().assembly {
                info!("  Assembled by: {} (option {})", assembly.option, assembly.position);
            }
            Ok(())
        }
        Err(e) => {
            report_failure(&e);
            if let Some(Removal::Preserved) = teardown.map(|t| t.removal) {
                info!("Inspect the working directory, then remove it manually");
            }
            Err(e.exit_code())
        }
    }
}

/// Name what failed and show the tail of the tool output, if any.
fn report_failure(err: &BuildError) {
    error!("Build failed: {}", err);
    let diagnostics = match err {
        BuildError::Stage(stage) => stage.diagnostics(),
        _ => None,
    };
    if let Some(tail) = diagnostics {
        eprintln!("--- last output ---");
        for line in tail.lines() {
            eprintln!("  | {}", line);
        }
    }
}
