//! Error taxonomy for a build run.
//!
//! Only [`ValidationError`] is ever recovered locally (the fallback chain
//! moves on to its next option). Everything else that reaches
//! [`BuildError`] is fatal and ends in teardown.

use std::path::PathBuf;
use thiserror::Error;

pub const EXIT_PREFLIGHT: u8 = 1;
pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_RESOURCE: u8 = 3;
pub const EXIT_STAGE: u8 = 4;
pub const EXIT_EXHAUSTED: u8 = 5;
pub const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must not be empty")]
    Empty { name: &'static str },
    #[error("invalid {name} '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("cannot resolve current directory: {0}")]
    CurrentDir(#[source] std::io::Error),
    #[error("refusing work directory {}: {reason}", .path.display())]
    UnsafeWorkDir { path: PathBuf, reason: &'static str },
}

/// Bind/unbind and working-directory failures.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("failed to bind {} at {}: {detail}", .source_path.display(), .target.display())]
    Bind {
        source_path: PathBuf,
        target: PathBuf,
        detail: String,
    },
    #[error("failed to unbind {}: {detail}", .target.display())]
    Unbind { target: PathBuf, detail: String },
    #[error("working directory {} is in use by another build", .0.display())]
    Busy(PathBuf),
    #[error("refusing to remove {}: {reason}", .path.display())]
    UnsafeRemoval { path: PathBuf, reason: String },
    #[error("failed to remove {}: {detail}", .path.display())]
    Removal { path: PathBuf, detail: String },
    #[error("working directory {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Missing,
    Undersized { size: u64, minimum: u64 },
}

/// A candidate artifact failed validation.
#[derive(Debug, Clone, Error)]
#[error("candidate {} rejected: {}", .path.display(), describe(.reason))]
pub struct ValidationError {
    pub path: PathBuf,
    pub reason: Rejection,
}

fn describe(reason: &Rejection) -> String {
    match reason {
        Rejection::Missing => "file does not exist".to_string(),
        Rejection::Undersized { size, minimum } => {
            format!("{} bytes is below the {} byte minimum", size, minimum)
        }
    }
}

/// One failed fallback attempt.
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    pub option: String,
    pub reason: String,
}

/// Every fallback option was tried and none produced a valid artifact.
#[derive(Debug, Clone, Error)]
#[error("no assembly strategy produced a valid artifact ({} tried)", .attempts.len())]
pub struct ExhaustedFallbackError {
    pub attempts: Vec<AttemptFailure>,
    /// Diagnostics captured from the last attempt.
    pub diagnostics: String,
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("stage '{stage}': precondition not met: {check}")]
    Precondition { stage: &'static str, check: String },
    #[error("stage '{stage}': postcondition not met: {check}")]
    Postcondition { stage: &'static str, check: String },
    #[error("stage '{stage}' failed: {message}")]
    Action {
        stage: &'static str,
        message: String,
        diagnostics: Option<String>,
    },
    #[error("stage '{stage}': {source}")]
    Exhausted {
        stage: &'static str,
        #[source]
        source: ExhaustedFallbackError,
    },
}

impl StageError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Precondition { stage, .. }
            | Self::Postcondition { stage, .. }
            | Self::Action { stage, .. }
            | Self::Exhausted { stage, .. } => *stage,
        }
    }

    /// Tail of the failing tool's output, when one was captured.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::Action { diagnostics, .. } => diagnostics.as_deref(),
            Self::Exhausted { source, .. } => Some(source.diagnostics.as_str()),
            _ => None,
        }
        .filter(|d| !d.trim().is_empty())
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error("interrupted{}", .stage.map(|s| format!(" during stage '{}'", s)).unwrap_or_default())]
    Interrupted { stage: Option<&'static str> },
    #[error(transparent)]
    Lifecycle(#[from] crate::lifecycle::InvalidTransition),
}

impl BuildError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => EXIT_CONFIG,
            Self::Resource(_) => EXIT_RESOURCE,
            Self::Stage(StageError::Exhausted { .. }) => EXIT_EXHAUSTED,
            Self::Stage(_) | Self::Lifecycle(_) => EXIT_STAGE,
            Self::Interrupted { .. } => EXIT_INTERRUPTED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exhausted() -> ExhaustedFallbackError {
        ExhaustedFallbackError {
            attempts: vec![AttemptFailure {
                option: "minimal".into(),
                reason: "too small".into(),
            }],
            diagnostics: "xorriso : FAILURE".into(),
        }
    }

    #[test]
    fn exit_codes_are_distinct_per_taxonomy() {
        let codes = [
            BuildError::from(ConfigError::Empty { name: "release" }).exit_code(),
            BuildError::from(ResourceError::Busy("/w".into())).exit_code(),
            BuildError::from(StageError::Precondition {
                stage: "bootstrap",
                check: "x".into(),
            })
            .exit_code(),
            BuildError::from(StageError::Exhausted {
                stage: "assemble-artifact",
                source: exhausted(),
            })
            .exit_code(),
            BuildError::Interrupted { stage: None }.exit_code(),
        ];
        let mut unique = codes.to_vec();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), codes.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn exhausted_surfaces_as_stage_error_with_diagnostics() {
        let err = StageError::Exhausted {
            stage: "assemble-artifact",
            source: exhausted(),
        };
        assert_eq!(err.stage(), "assemble-artifact");
        assert_eq!(err.diagnostics(), Some("xorriso : FAILURE"));
        assert!(err.to_string().contains("1 tried"));
    }

    #[test]
    fn blank_diagnostics_are_hidden() {
        let err = StageError::Action {
            stage: "configure",
            message: "apt-get failed".into(),
            diagnostics: Some("  \n".into()),
        };
        assert_eq!(err.diagnostics(), None);
    }

    #[test]
    fn interrupted_names_stage() {
        let err = BuildError::Interrupted {
            stage: Some("compress-root"),
        };
        assert_eq!(err.to_string(), "interrupted during stage 'compress-root'");
        assert_eq!(BuildError::Interrupted { stage: None }.to_string(), "interrupted");
    }

    #[test]
    fn validation_error_describes_size() {
        let err = ValidationError {
            path: "/w/candidate-0.iso".into(),
            reason: Rejection::Undersized {
                size: 10,
                minimum: 20,
            },
        };
        assert!(err.to_string().contains("10 bytes is below the 20 byte minimum"));
    }
}
