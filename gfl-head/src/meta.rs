//! Per-image ground truth and shape metadata.

use crate::{common::*, error::ensure_shape};

/// Shape metadata of one input image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMeta {
    /// Image size after resizing, in `[h, w]`.
    pub img_shape: [usize; 2],
    /// Image size after padding, in `[h, w]`.
    pub pad_shape: [usize; 2],
    /// The resize factor from the original image, in `[sy, sx]`.
    pub scale_factor: [f64; 2],
}

impl ImageMeta {
    /// Metadata of an unscaled and unpadded image.
    pub fn new(h: usize, w: usize) -> Self {
        Self {
            img_shape: [h, w],
            pad_shape: [h, w],
            scale_factor: [1.0, 1.0],
        }
    }

    /// The transform mapping boxes back to the original image.
    pub fn rescale_transform(&self) -> Result<Transform<f64>> {
        let [sy, sx] = self.scale_factor;
        Ok(Transform::try_from_scale(sy, sx)?.inverse())
    }
}

/// Ground truth boxes and labels of one image.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroundTruth {
    /// Boxes in pixel coordinates of the input image.
    pub bboxes: Vec<TLBR<f64>>,
    /// Class indexes parallel to `bboxes`.
    pub labels: Vec<usize>,
}

impl GroundTruth {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from `[x1, y1, x2, y2]` boxes and their labels.
    pub fn from_xyxy(bboxes: &[[f64; 4]], labels: &[usize]) -> Result<Self> {
        ensure_shape!(
            bboxes.len() == labels.len(),
            "{} boxes are given with {} labels",
            bboxes.len(),
            labels.len()
        );
        let bboxes: Vec<_> = bboxes
            .iter()
            .map(|&xyxy| TLBR::try_from_xyxy(xyxy))
            .collect::<Result<_>>()?;

        Ok(Self {
            bboxes,
            labels: labels.to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.bboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bboxes.is_empty()
    }
}
