//! The staged pipeline.
//!
//! - `context`: immutable [`BuildContext`] with every derived path
//! - `checks`: pre/postcondition helpers
//! - `profile`: static content of the live system
//! - `runner`: the [`Stage`] trait and [`StageRunner`]

pub mod checks;
pub mod context;
pub mod profile;
pub mod runner;

pub use checks::{Check, Unmet};
pub use context::BuildContext;
pub use runner::{BuildRecord, Stage, StageReport, StageRunner};
