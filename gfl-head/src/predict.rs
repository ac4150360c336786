//! Decoding head outputs into detections.

use crate::{
    common::*,
    config::TestConfig,
    error::ensure_shape,
    head::{GflHead, HeadOutput},
    meta::ImageMeta,
};

/// Detections of one image, highest score first.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Detections {
    pub bboxes: Vec<ScoredBox<f64>>,
}

impl Detections {
    pub fn len(&self) -> usize {
        self.bboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bboxes.is_empty()
    }
}

impl GflHead {
    /// Decode the predictions of each image into scored boxes.
    ///
    /// Boxes are in input image coordinates, or in original image
    /// coordinates if `rescale` is set.
    pub fn predict(
        &self,
        output: &HeadOutput,
        metas: &[ImageMeta],
        rescale: bool,
    ) -> Result<Vec<Detections>> {
        let batch_size = self.check_output(output)?;
        ensure_shape!(
            metas.len() == batch_size as usize,
            "expect metas of {} images, but get {}",
            batch_size,
            metas.len()
        );

        let level_centers: Vec<Tensor> = self
            .anchor_generator
            .multi_level_anchors(&output.feat_sizes())?
            .iter()
            .map(|anchors| {
                let centers: Vec<f32> = anchors
                    .iter()
                    .flat_map(|anchor| [anchor.cx() as f32, anchor.cy() as f32])
                    .collect();
                Tensor::of_slice(&centers)
                    .view([anchors.len() as i64, 2])
                    .to_device(self.device())
            })
            .collect();

        tch::no_grad(|| {
            metas
                .iter()
                .enumerate()
                .map(|(image_index, meta)| {
                    self.predict_single(output, &level_centers, image_index as i64, meta, rescale)
                })
                .collect()
        })
    }

    fn predict_single(
        &self,
        output: &HeadOutput,
        level_centers: &[Tensor],
        image_index: i64,
        meta: &ImageMeta,
        rescale: bool,
    ) -> Result<Detections> {
        let TestConfig {
            nms_pre,
            score_thr,
            iou_threshold,
            max_per_img,
        } = self.test_cfg;
        let num_classes = self.num_classes;
        let score_thr = score_thr.raw();
        let [img_h, img_w] = meta.img_shape;

        let mut candidates = vec![];

        for (cls_score, bbox_pred, centers, &stride) in izip!(
            &output.cls_scores,
            &output.bbox_preds,
            level_centers,
            self.strides()
        ) {
            let scores = cls_score
                .select(0, image_index)
                .permute(&[1, 2, 0])
                .reshape(&[-1, num_classes])
                .sigmoid();
            let bbox_pred = bbox_pred
                .select(0, image_index)
                .permute(&[1, 2, 0])
                .reshape(&[-1, 4 * (self.reg_max + 1)]);
            let distances = self.integral.forward(&bbox_pred)? * stride as f64;
            let bboxes = self.coder.decode(centers, &distances)?;

            let scores: Vec<f32> = scores.reshape(&[-1]).to_device(Device::Cpu).into();
            let bboxes: Vec<f32> = bboxes.reshape(&[-1]).to_device(Device::Cpu).into();

            let mut level_candidates: Vec<(usize, usize, f64)> = scores
                .iter()
                .enumerate()
                .filter(|&(_, &score)| score as f64 > score_thr)
                .map(|(index, &score)| {
                    let num_classes = num_classes as usize;
                    (index / num_classes, index % num_classes, score as f64)
                })
                .collect();
            level_candidates.sort_by(|(_, _, lhs), (_, _, rhs)| {
                rhs.partial_cmp(lhs).unwrap_or(Ordering::Equal)
            });
            level_candidates.truncate(nms_pre);

            for (anchor_index, class, score) in level_candidates {
                let offset = anchor_index * 4;
                let xyxy = [
                    bboxes[offset] as f64,
                    bboxes[offset + 1] as f64,
                    bboxes[offset + 2] as f64,
                    bboxes[offset + 3] as f64,
                ];
                candidates.push(ScoredBox {
                    rect: TLBR::try_from_xyxy(xyxy)?.clip(img_h as f64, img_w as f64),
                    score,
                    class,
                });
            }
        }

        if rescale {
            let transform = meta.rescale_transform()?;
            candidates
                .iter_mut()
                .for_each(|candidate| candidate.rect = &transform * &candidate.rect);
        }

        let keep = nms(&candidates, iou_threshold.raw());
        let bboxes: Vec<_> = keep
            .into_iter()
            .take(max_per_img)
            .map(|index| candidates[index])
            .collect();

        debug!(
            "image {}: {} detections out of {} candidates",
            image_index,
            bboxes.len(),
            candidates.len()
        );

        Ok(Detections { bboxes })
    }
}
