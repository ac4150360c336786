pub use anyhow::{bail, ensure, Result};
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::borrow::Borrow;
pub use strum::AsRefStr;
pub use tch::{
    nn::{self, Module as _, OptimizerConfig as _},
    Device, Kind, Reduction, Tensor,
};
pub use tch_tensor_like::TensorLike;

/// Machine epsilon of `f32`, added to averaging denominators.
pub const F32_EPSILON: f64 = f32::EPSILON as f64;
