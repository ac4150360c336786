//! GFL dense detection head with ATSS assignment, quality focal loss and
//! distribution focal loss.

mod common;

pub mod assigner;
pub mod coder;
pub mod config;
pub mod error;
pub mod head;
pub mod loss;
pub mod meta;
pub mod predict;
pub mod prior;
pub mod target;

pub use assigner::{AssignResult, AtssAssigner, AtssAssignerInit};
pub use config::Config;
pub use error::GflError;
pub use head::{GflHead, GflHeadInit, HeadOutput};
pub use loss::LossReport;
pub use meta::{GroundTruth, ImageMeta};
pub use predict::Detections;
pub use prior::{AnchorGenerator, AnchorGeneratorInit};
