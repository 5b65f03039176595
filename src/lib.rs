//! Liveforge library exports.
//!
//! The binary is a thin wrapper over these; integration tests drive the
//! same types with a scripted privileged executor.

pub mod artifact;
pub mod build;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fallback;
pub mod lifecycle;
pub mod lock;
pub mod mounts;
pub mod preflight;
pub mod privilege;
pub mod process;
pub mod stages;
pub mod timing;

pub use build::{BuildContext, BuildRecord, Stage, StageRunner};
pub use config::Config;
pub use coordinator::{Coordinator, Removal, TeardownReport};
pub use error::{BuildError, ExhaustedFallbackError, ResourceError, StageError};
pub use fallback::{FallbackExecutor, Outcome, Strategy, Validator};
pub use mounts::{MountPoint, ResourceGuard};
pub use privilege::{Elevated, Privileged};
