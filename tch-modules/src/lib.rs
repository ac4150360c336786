//! Tensor modules and loss functions for dense detection heads.

mod common;

pub mod bce_with_logits_loss;
pub mod box_loss;
pub mod conv_norm_2d;
pub mod distribution_focal_loss;
pub mod group_norm;
pub mod integral;
pub mod quality_focal_loss;
pub mod reduction;
pub mod scale;
pub mod tlbr_tensor;

pub use bce_with_logits_loss::*;
pub use box_loss::*;
pub use conv_norm_2d::*;
pub use distribution_focal_loss::*;
pub use group_norm::*;
pub use integral::*;
pub use quality_focal_loss::*;
pub use reduction::*;
pub use scale::*;
pub use tlbr_tensor::*;
