//! Ordered alternatives for producing one artifact.
//!
//! Each [`Strategy`] is a different way to reach the same goal (another
//! tool, or fewer assumptions about the tool). The executor tries them in
//! order and stops at the first candidate the [`Validator`] accepts.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{AttemptFailure, ExhaustedFallbackError, Rejection, ValidationError};

/// What a strategy reports back. Inspected by the executor, never
/// inferred from an exit status alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A candidate file was written. It still has to pass validation.
    Produced {
        artifact: PathBuf,
        diagnostics: String,
    },
    /// The invocation itself failed.
    Failed { diagnostics: String },
}

pub trait Strategy {
    fn name(&self) -> &str;

    /// Try to write the artifact to `candidate`.
    fn produce(&self, candidate: &Path) -> Outcome;
}

/// Shared acceptance predicate: the file exists and is at least `min_bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validator {
    pub min_bytes: u64,
}

impl Validator {
    pub fn new(min_bytes: u64) -> Self {
        Self { min_bytes }
    }

    /// Returns the candidate's size on success.
    pub fn validate(&self, path: &Path) -> Result<u64, ValidationError> {
        let reject = |reason| ValidationError {
            path: path.to_path_buf(),
            reason,
        };
        let meta = fs::metadata(path).map_err(|_| reject(Rejection::Missing))?;
        if !meta.is_file() {
            return Err(reject(Rejection::Missing));
        }
        if meta.len() < self.min_bytes {
            return Err(reject(Rejection::Undersized {
                size: meta.len(),
                minimum: self.min_bytes,
            }));
        }
        Ok(meta.len())
    }
}

/// The candidate that passed validation.
#[derive(Debug, Clone)]
pub struct Accepted {
    /// 0-based position of the winning option.
    pub index: usize,
    pub name: String,
    pub artifact: PathBuf,
    pub size: u64,
    /// Options tried before this one, with why each was rejected.
    pub rejected: Vec<AttemptFailure>,
}

pub struct FallbackExecutor {
    options: Vec<Box<dyn Strategy>>,
    validator: Validator,
    scratch: PathBuf,
}

impl FallbackExecutor {
    /// Candidates are written into `scratch` as `candidate-<n>.iso`.
    pub fn new(
        options: Vec<Box<dyn Strategy>>,
        validator: Validator,
        scratch: impl Into<PathBuf>,
    ) -> Self {
        Self {
            options,
            validator,
            scratch: scratch.into(),
        }
    }

    pub fn candidate_path(&self, index: usize) -> PathBuf {
        self.scratch.join(format!("candidate-{}.iso", index))
    }

    /// Try every option in order.
    ///
    /// Rejected candidates are deleted, so on exhaustion no artifact file
    /// is left behind.
    pub fn run(&self) -> Result<Accepted, ExhaustedFallbackError> {
        let mut attempts = Vec::new();
        let mut last_diagnostics = String::new();

        for (index, option) in self.options.iter().enumerate() {
            let candidate = self.candidate_path(index);
            discard(&candidate);
            info!(
                "Trying assembly option {} of {}: {}",
                index + 1,
                self.options.len(),
                option.name()
            );

            let reason = match option.produce(&candidate) {
                Outcome::Produced {
                    artifact,
                    diagnostics,
                } => match self.validator.validate(&artifact) {
                    Ok(size) => {
                        info!(option = option.name(), size, "candidate accepted");
                        return Ok(Accepted {
                            index,
                            name: option.name().to_string(),
                            artifact,
                            size,
                            rejected: attempts,
                        });
                    }
                    Err(rejection) => {
                        discard(&artifact);
                        last_diagnostics = diagnostics;
                        rejection.to_string()
                    }
                },
                Outcome::Failed { diagnostics } => {
                    last_diagnostics = diagnostics;
                    "invocation failed".to_string()
                }
            };

            warn!("Assembly option '{}' rejected: {}", option.name(), reason);
            discard(&candidate);
            attempts.push(AttemptFailure {
                option: option.name().to_string(),
                reason,
            });
        }

        Err(ExhaustedFallbackError {
            attempts,
            diagnostics: last_diagnostics,
        })
    }
}

fn discard(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!("Could not remove rejected candidate {}: {}", path.display(), e);
        }
    }
}
