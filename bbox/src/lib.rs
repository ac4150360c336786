//! Bounding box geometry for dense detectors.

mod common;

pub mod nms;
pub mod rect;
pub mod tlbr;
mod transform;

pub use nms::*;
pub use rect::*;
pub use tlbr::*;
pub use transform::*;

pub mod prelude {
    pub use crate::rect::{Rect, RectFloat, RectNum};
}
