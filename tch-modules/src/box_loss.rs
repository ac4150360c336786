use crate::{common::*, reduction::weight_reduce_loss, tlbr_tensor::TLBRTensor};

/// The overlap metric a box loss is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr)]
pub enum BoxMetric {
    IoU,
    GIoU,
    DIoU,
    CIoU,
}

/// Box regression loss initializer.
#[derive(Debug, Clone)]
pub struct BoxLossInit {
    pub metric: BoxMetric,
    pub loss_weight: f64,
    pub eps: f64,
    pub reduction: Reduction,
}

impl BoxLossInit {
    pub fn default(metric: BoxMetric, reduction: Reduction) -> Self {
        Self {
            metric,
            loss_weight: 1.0,
            eps: 1e-6,
            reduction,
        }
    }

    pub fn build(self) -> Result<BoxLoss> {
        let Self {
            metric,
            loss_weight,
            eps,
            reduction,
        } = self;
        ensure!(loss_weight >= 0.0, "loss_weight must be non-negative");
        ensure!(eps > 0.0, "eps must be positive");

        Ok(BoxLoss {
            metric,
            loss_weight,
            eps,
            reduction,
        })
    }
}

/// Box regression loss of the form `1 - metric(pred, target)`.
#[derive(Debug)]
pub struct BoxLoss {
    metric: BoxMetric,
    loss_weight: f64,
    eps: f64,
    reduction: Reduction,
}

impl BoxLoss {
    pub fn metric(&self) -> BoxMetric {
        self.metric
    }

    /// Compute the loss of aligned `[num_samples, 4]` boxes in `x1, y1, x2, y2` order.
    pub fn forward(
        &self,
        pred: &Tensor,
        target: &Tensor,
        weight: Option<&Tensor>,
        avg_factor: Option<f64>,
    ) -> Result<Tensor> {
        let Self {
            metric,
            loss_weight,
            eps,
            reduction,
        } = *self;

        ensure!(
            pred.size() == target.size(),
            "pred and target shape mismatch: {:?} vs {:?}",
            pred.size(),
            target.size()
        );

        let pred = TLBRTensor::from_xyxy(pred)?;
        let target = TLBRTensor::from_xyxy(&target.detach())?;

        let score = match metric {
            BoxMetric::IoU => pred.iou_with(&target, eps),
            BoxMetric::GIoU => pred.giou_with(&target, eps),
            BoxMetric::DIoU => pred.diou_with(&target, eps),
            BoxMetric::CIoU => pred.ciou_with(&target, eps),
        };
        let loss = 1.0 - score;

        let loss = weight_reduce_loss(&loss, weight, reduction, avg_factor)?;
        Ok(loss * loss_weight)
    }
}
