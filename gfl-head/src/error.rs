//! The error taxonomy of the detection head.

use thiserror::Error;

/// Typed errors carried inside [anyhow::Error].
///
/// Use `err.downcast_ref::<GflError>()` to tell them apart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GflError {
    /// Unknown tag, invalid value or unsupported combination of options.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Rank, channel, level count or batch size mismatch.
    #[error("shape error: {0}")]
    Shape(String),
}

macro_rules! ensure_config {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err(anyhow::Error::from($crate::error::GflError::Configuration(format!($($arg)+))));
        }
    };
}

macro_rules! ensure_shape {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err(anyhow::Error::from($crate::error::GflError::Shape(format!($($arg)+))));
        }
    };
}

pub(crate) use ensure_config;
pub(crate) use ensure_shape;
