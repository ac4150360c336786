//! Training target construction.

use crate::{
    common::*,
    error::GflError,
    head::GflHead,
    meta::{GroundTruth, ImageMeta},
    prior::inside_flags,
};

/// Training targets of one level, concatenated over images.
#[derive(Debug)]
pub struct LevelTargets {
    /// `[num_anchors, 4]` anchors in `x1, y1, x2, y2` order.
    pub anchors: Tensor,
    /// `[num_anchors]` int64 labels. Background is `num_classes`.
    pub labels: Tensor,
    /// `[num_anchors]` classification weights.
    pub label_weights: Tensor,
    /// `[num_anchors, 4]` matched boxes in `x1, y1, x2, y2` order.
    pub bbox_targets: Tensor,
    /// Indexes of positive anchors.
    pub pos_inds: Tensor,
}

impl LevelTargets {
    pub fn num_pos(&self) -> i64 {
        self.pos_inds.size()[0]
    }
}

/// Training targets of all levels.
#[derive(Debug)]
pub struct Targets {
    pub levels: Vec<LevelTargets>,
    /// The sum over images of `max(num_pos, 1)`.
    pub num_total_pos: f64,
    /// The number of positives per image.
    pub num_pos_per_image: Vec<usize>,
}

/// Targets of all anchors of one image, concatenated over levels.
#[derive(Debug)]
struct ImageTargets {
    labels: Vec<i64>,
    label_weights: Vec<f32>,
    bbox_targets: Vec<[f32; 4]>,
    pos_flags: Vec<bool>,
    num_pos: usize,
}

impl GflHead {
    /// Assign ground truth to the anchors of every image and split the
    /// result into levels.
    pub fn get_targets(
        &self,
        feat_sizes: &[[usize; 2]],
        gts: &[GroundTruth],
        metas: &[ImageMeta],
    ) -> Result<Targets> {
        ensure!(
            gts.len() == metas.len(),
            "{} ground truth items are given with {} image metas",
            gts.len(),
            metas.len()
        );

        let level_anchors = self.anchor_generator.multi_level_anchors(feat_sizes)?;
        let num_level_anchors: Vec<usize> = level_anchors.iter().map(|level| level.len()).collect();
        let anchors = level_anchors.concat();

        let image_targets: Vec<ImageTargets> = izip!(gts, metas)
            .enumerate()
            .map(|(image_index, (gt, meta))| {
                self.image_targets(image_index, &anchors, &num_level_anchors, feat_sizes, gt, meta)
            })
            .collect::<Result<_>>()?;

        let num_total_pos: f64 = image_targets
            .iter()
            .map(|targets| targets.num_pos.max(1) as f64)
            .sum();
        let num_pos_per_image: Vec<usize> = image_targets.iter().map(|targets| targets.num_pos).collect();

        let device = self.device();
        let levels: Vec<LevelTargets> = num_level_anchors
            .iter()
            .scan(0, |start, &count| {
                let range = *start..(*start + count);
                *start += count;
                Some(range)
            })
            .map(|range| {
                let num_anchors = (range.len() * image_targets.len()) as i64;

                let anchor_values: Vec<f32> = image_targets
                    .iter()
                    .flat_map(|_| anchors[range.clone()].iter())
                    .flat_map(|anchor| anchor.xyxy())
                    .map(|value| value as f32)
                    .collect();
                let labels: Vec<i64> = image_targets
                    .iter()
                    .flat_map(|targets| targets.labels[range.clone()].iter().copied())
                    .collect();
                let label_weights: Vec<f32> = image_targets
                    .iter()
                    .flat_map(|targets| targets.label_weights[range.clone()].iter().copied())
                    .collect();
                let bbox_targets: Vec<f32> = image_targets
                    .iter()
                    .flat_map(|targets| targets.bbox_targets[range.clone()].iter())
                    .flat_map(|xyxy| *xyxy)
                    .collect();
                let pos_inds: Vec<i64> = image_targets
                    .iter()
                    .flat_map(|targets| targets.pos_flags[range.clone()].iter().copied())
                    .enumerate()
                    .filter_map(|(index, is_pos)| is_pos.then(|| index as i64))
                    .collect();

                LevelTargets {
                    anchors: Tensor::of_slice(&anchor_values)
                        .view([num_anchors, 4])
                        .to_device(device),
                    labels: Tensor::of_slice(&labels).to_device(device),
                    label_weights: Tensor::of_slice(&label_weights).to_device(device),
                    bbox_targets: Tensor::of_slice(&bbox_targets)
                        .view([num_anchors, 4])
                        .to_device(device),
                    pos_inds: Tensor::of_slice(&pos_inds).to_device(device),
                }
            })
            .collect();

        Ok(Targets {
            levels,
            num_total_pos,
            num_pos_per_image,
        })
    }

    fn image_targets(
        &self,
        image_index: usize,
        anchors: &[TLBR<f64>],
        num_level_anchors: &[usize],
        feat_sizes: &[[usize; 2]],
        gt: &GroundTruth,
        meta: &ImageMeta,
    ) -> Result<ImageTargets> {
        let num_classes = self.num_classes;

        let valid_flags: Vec<bool> = feat_sizes
            .iter()
            .enumerate()
            .map(|(level, &feat_size)| {
                self.anchor_generator
                    .valid_flags(level, feat_size, meta.pad_shape)
            })
            .collect::<Result<Vec<_>>>()?
            .concat();
        let inside = inside_flags(anchors, &valid_flags, meta.img_shape, self.allowed_border);

        let inside_indexes: Vec<usize> = inside
            .iter()
            .enumerate()
            .filter_map(|(index, &flag)| flag.then(|| index))
            .collect();
        if inside_indexes.is_empty() {
            warn!(
                "image {} of shape {:?} has no anchor inside the image",
                image_index, meta.img_shape
            );
            return Err(GflError::Shape(format!(
                "image {} has no valid anchor for img_shape {:?} and pad_shape {:?}",
                image_index, meta.img_shape, meta.pad_shape
            ))
            .into());
        }

        let inside_anchors: Vec<TLBR<f64>> =
            inside_indexes.iter().map(|&index| anchors[index]).collect();
        let num_level_inside: Vec<usize> = num_level_anchors
            .iter()
            .scan(0, |start, &count| {
                let num_inside = inside[*start..(*start + count)]
                    .iter()
                    .filter(|&&flag| flag)
                    .count();
                *start += count;
                Some(num_inside)
            })
            .collect();

        let assign_result = self
            .assigner
            .assign(&inside_anchors, &num_level_inside, gt)?;

        let num_anchors = anchors.len();
        let mut labels = vec![num_classes; num_anchors];
        let mut label_weights = vec![0f32; num_anchors];
        let mut bbox_targets = vec![[0f32; 4]; num_anchors];
        let mut pos_flags = vec![false; num_anchors];
        let pos_weight = if self.pos_weight > 0.0 {
            self.pos_weight as f32
        } else {
            1.0
        };

        for (&anchor_index, gt_ind) in izip!(&inside_indexes, &assign_result.gt_inds) {
            label_weights[anchor_index] = 1.0;

            if let Some(gt_ind) = *gt_ind {
                labels[anchor_index] = gt.labels[gt_ind] as i64;
                label_weights[anchor_index] = pos_weight;
                bbox_targets[anchor_index] = gt.bboxes[gt_ind].xyxy().map(|value| value as f32);
                pos_flags[anchor_index] = true;
            }
        }

        let num_pos = assign_result.num_pos();
        let log_level = if self.debug { Level::Info } else { Level::Debug };
        log!(
            log_level,
            "image {}: {} positives among {} inside anchors for {} boxes, per level inside counts {:?}",
            image_index,
            num_pos,
            inside_indexes.len(),
            gt.len(),
            num_level_inside
        );

        Ok(ImageTargets {
            labels,
            label_weights,
            bbox_targets,
            pos_flags,
            num_pos,
        })
    }
}
