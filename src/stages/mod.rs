//! Stages that build the root filesystem.

pub mod boot_assets;
pub mod bootstrap;
pub mod configure;

use std::sync::Arc;

use crate::artifact::{AssembleArtifact, ChecksumArtifact, CompressRoot};
use crate::build::Stage;
use crate::privilege::Privileged;

pub use boot_assets::ExtractBootAssets;
pub use bootstrap::Bootstrap;
pub use configure::Configure;

/// The full pipeline, in execution order.
pub fn standard(exec: Arc<dyn Privileged>) -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(Bootstrap::new(exec.clone())),
        Box::new(Configure::new(exec.clone())),
        Box::new(ExtractBootAssets::new(exec.clone())),
        Box::new(CompressRoot::new(exec)),
        Box::new(AssembleArtifact::new()),
        Box::new(ChecksumArtifact),
    ]
}
