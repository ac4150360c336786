//! Loss evaluation of the detection head.

use crate::{
    coder::box_centers,
    common::*,
    error::ensure_shape,
    head::{GflHead, HeadOutput},
    meta::{GroundTruth, ImageMeta},
    target::LevelTargets,
};
use tch_modules::TLBRTensor;

/// IoU epsilon of the quality score.
const QUALITY_IOU_EPS: f64 = 1e-6;

/// Per-level losses of one batch.
#[derive(Debug)]
pub struct LossReport {
    /// Quality focal losses.
    pub loss_cls: Vec<Tensor>,
    /// Box regression losses.
    pub loss_bbox: Vec<Tensor>,
    /// Distribution focal losses.
    pub loss_dfl: Vec<Tensor>,
}

impl LossReport {
    pub fn num_levels(&self) -> usize {
        self.loss_cls.len()
    }

    pub fn loss_cls_sum(&self) -> Tensor {
        sum_levels(&self.loss_cls)
    }

    pub fn loss_bbox_sum(&self) -> Tensor {
        sum_levels(&self.loss_bbox)
    }

    pub fn loss_dfl_sum(&self) -> Tensor {
        sum_levels(&self.loss_dfl)
    }

    /// The sum of all losses on all levels.
    pub fn total(&self) -> Tensor {
        self.loss_cls_sum() + self.loss_bbox_sum() + self.loss_dfl_sum()
    }

    /// The losses keyed by name in `loss_cls`, `loss_bbox`, `loss_dfl` order.
    pub fn named(&self) -> IndexMap<&'static str, &[Tensor]> {
        [
            ("loss_cls", self.loss_cls.as_slice()),
            ("loss_bbox", self.loss_bbox.as_slice()),
            ("loss_dfl", self.loss_dfl.as_slice()),
        ]
        .into_iter()
        .collect()
    }

    /// Detached per-level values keyed by name.
    pub fn to_values(&self) -> IndexMap<&'static str, Vec<f64>> {
        self.named()
            .into_iter()
            .map(|(name, losses)| {
                let values = losses.iter().map(|loss| loss.double_value(&[])).collect();
                (name, values)
            })
            .collect()
    }
}

fn sum_levels(losses: &[Tensor]) -> Tensor {
    losses
        .iter()
        .fold(None, |sum: Option<Tensor>, loss| match sum {
            Some(sum) => Some(sum + loss),
            None => Some(loss.shallow_clone()),
        })
        .unwrap_or_else(|| Tensor::zeros(&[], (Kind::Float, Device::Cpu)))
}

/// Losses of one level before the box losses are normalized.
#[derive(Debug)]
struct LevelLoss {
    loss_cls: Tensor,
    loss_bbox: Tensor,
    loss_dfl: Tensor,
    weight_sum: f64,
}

impl GflHead {
    /// Compute the per-level losses of a batch.
    ///
    /// Each image owns one [GroundTruth], which may be empty, and one
    /// [ImageMeta].
    pub fn loss(
        &self,
        output: &HeadOutput,
        gts: &[GroundTruth],
        metas: &[ImageMeta],
    ) -> Result<LossReport> {
        let batch_size = self.check_output(output)? as usize;
        ensure_shape!(
            gts.len() == batch_size,
            "expect ground truth of {} images, but get {}",
            batch_size,
            gts.len()
        );
        ensure_shape!(
            metas.len() == batch_size,
            "expect metas of {} images, but get {}",
            batch_size,
            metas.len()
        );
        for (image_index, gt) in gts.iter().enumerate() {
            ensure_shape!(
                gt.bboxes.len() == gt.labels.len(),
                "image {} has {} boxes but {} labels",
                image_index,
                gt.bboxes.len(),
                gt.labels.len()
            );
            ensure_shape!(
                gt.labels.iter().all(|&label| label < self.num_classes()),
                "image {} has labels {:?} out of range of {} classes",
                image_index,
                gt.labels,
                self.num_classes()
            );
        }

        let targets = self.get_targets(&output.feat_sizes(), gts, metas)?;
        debug!(
            "positives per image {:?}, num_total_pos {}",
            targets.num_pos_per_image, targets.num_total_pos
        );

        let level_losses: Vec<LevelLoss> = izip!(
            &output.cls_scores,
            &output.bbox_preds,
            &targets.levels,
            self.strides()
        )
        .map(|(cls_score, bbox_pred, level_targets, &stride)| {
            self.loss_single(
                cls_score,
                bbox_pred,
                level_targets,
                stride as f64,
                targets.num_total_pos,
            )
        })
        .collect::<Result<_>>()?;

        let avg_factor = level_losses
            .iter()
            .map(|loss| loss.weight_sum)
            .sum::<f64>()
            .max(1.0);

        let (loss_cls, loss_bbox, loss_dfl) = level_losses
            .into_iter()
            .map(|loss| {
                let LevelLoss {
                    loss_cls,
                    loss_bbox,
                    loss_dfl,
                    ..
                } = loss;
                (loss_cls, loss_bbox / avg_factor, loss_dfl / avg_factor)
            })
            .unzip_n_vec();

        Ok(LossReport {
            loss_cls,
            loss_bbox,
            loss_dfl,
        })
    }

    fn loss_single(
        &self,
        cls_score: &Tensor,
        bbox_pred: &Tensor,
        targets: &LevelTargets,
        stride: f64,
        num_total_pos: f64,
    ) -> Result<LevelLoss> {
        let num_classes = self.num_classes;
        let num_bins = self.reg_max + 1;
        let device = cls_score.device();

        let cls_score = cls_score
            .permute(&[0, 2, 3, 1])
            .reshape(&[-1, num_classes]);
        let bbox_pred = bbox_pred
            .permute(&[0, 2, 3, 1])
            .reshape(&[-1, 4 * num_bins]);
        let num_anchors = cls_score.size()[0];
        ensure_shape!(
            targets.labels.size1()? == num_anchors,
            "{} predictions are given for {} anchors",
            num_anchors,
            targets.labels.size1()?
        );

        let (loss_bbox, loss_dfl, weight_sum, quality_scores) = if targets.num_pos() > 0 {
            let pos_inds = &targets.pos_inds;
            let pos_bbox_targets = targets.bbox_targets.index_select(0, pos_inds);
            let pos_bbox_pred = bbox_pred.index_select(0, pos_inds);
            let pos_anchors = targets.anchors.index_select(0, pos_inds);
            let pos_anchor_centers = box_centers(&pos_anchors) / stride;

            // the classification confidence of the positives
            let weight_targets = tch::no_grad(|| {
                cls_score
                    .detach()
                    .sigmoid()
                    .index_select(0, pos_inds)
                    .max_dim(1, false)
                    .0
            });

            let pos_bbox_pred_corners = self.integral.forward(&pos_bbox_pred)?;
            let pos_decode_bbox_pred = self
                .coder
                .decode(&pos_anchor_centers, &pos_bbox_pred_corners)?;
            let pos_decode_bbox_targets = &pos_bbox_targets / stride;

            let score_pos = tch::no_grad(|| -> Result<_> {
                let pred = TLBRTensor::from_xyxy(&pos_decode_bbox_pred.detach())?;
                let target = TLBRTensor::from_xyxy(&pos_decode_bbox_targets)?;
                Ok(pred.iou_with(&target, QUALITY_IOU_EPS))
            })?;
            let quality_scores = Tensor::zeros(&[num_anchors], (Kind::Float, device))
                .scatter(0, pos_inds, &score_pos);

            let pred_corners = pos_bbox_pred.reshape(&[-1, num_bins]);
            let target_corners = self
                .coder
                .encode(
                    &pos_anchor_centers,
                    &pos_decode_bbox_targets,
                    Some(self.reg_max as f64),
                )?
                .reshape(&[-1]);

            let loss_bbox = self.loss_bbox.forward(
                &pos_decode_bbox_pred,
                &pos_decode_bbox_targets,
                Some(&weight_targets),
                Some(1.0),
            )?;
            let dfl_weight = weight_targets
                .view([-1, 1])
                .expand(&[-1, 4], false)
                .reshape(&[-1]);
            let loss_dfl =
                self.loss_dfl
                    .forward(&pred_corners, &target_corners, Some(&dfl_weight), Some(4.0))?;

            let weight_sum = weight_targets.sum(Kind::Float).double_value(&[]);
            (loss_bbox, loss_dfl, weight_sum, quality_scores)
        } else {
            let zero = bbox_pred.sum(Kind::Float) * 0.0;
            let quality_scores = Tensor::zeros(&[num_anchors], (Kind::Float, device));
            (zero.shallow_clone(), zero, 0.0, quality_scores)
        };

        let loss_cls = self.loss_cls.forward(
            &cls_score,
            &targets.labels,
            &quality_scores,
            Some(&targets.label_weights),
            Some(num_total_pos),
        )?;

        Ok(LevelLoss {
            loss_cls,
            loss_bbox,
            loss_dfl,
            weight_sum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_sums_and_names() -> Result<()> {
        let scalar = |value: f32| Tensor::of_slice(&[value]).sum(Kind::Float);
        let report = LossReport {
            loss_cls: vec![scalar(1.0), scalar(2.0)],
            loss_bbox: vec![scalar(0.5), scalar(0.0)],
            loss_dfl: vec![scalar(0.25), scalar(0.25)],
        };

        assert_eq!(report.num_levels(), 2);
        assert_eq!(report.loss_cls_sum().double_value(&[]), 3.0);
        assert_eq!(report.total().double_value(&[]), 4.0);

        let values = report.to_values();
        let names: Vec<_> = values.keys().copied().collect();
        assert_eq!(names, vec!["loss_cls", "loss_bbox", "loss_dfl"]);
        assert_eq!(values["loss_bbox"], vec![0.5, 0.0]);
        Ok(())
    }
}
