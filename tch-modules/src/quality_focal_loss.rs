use crate::{
    bce_with_logits_loss::{BceWithLogitsLoss, BceWithLogitsLossInit},
    common::*,
    reduction::weight_reduce_loss,
};

/// Quality focal loss initializer.
#[derive(Debug, Clone)]
pub struct QualityFocalLossInit {
    /// The modulating exponent.
    pub beta: f64,
    /// The factor multiplied on the reduced loss.
    pub loss_weight: f64,
    /// The reduction method applied on output loss.
    pub reduction: Reduction,
}

impl QualityFocalLossInit {
    pub fn default(reduction: Reduction) -> Self {
        Self {
            beta: 2.0,
            loss_weight: 1.0,
            reduction,
        }
    }

    /// Build a quality focal loss calculator.
    pub fn build(self) -> Result<QualityFocalLoss> {
        let Self {
            beta,
            loss_weight,
            reduction,
        } = self;

        ensure!(beta >= 0.0, "beta must be non-negative");
        ensure!(loss_weight >= 0.0, "loss_weight must be non-negative");

        Ok(QualityFocalLoss {
            bce: BceWithLogitsLossInit::default(Reduction::None).build(),
            beta,
            loss_weight,
            reduction,
        })
    }
}

/// Quality focal loss calculator.
///
/// It is a sigmoid focal loss whose positive target is a soft localization
/// quality score in `[0, 1]` instead of a hard one.
#[derive(Debug)]
pub struct QualityFocalLoss {
    bce: BceWithLogitsLoss,
    beta: f64,
    loss_weight: f64,
    reduction: Reduction,
}

impl QualityFocalLoss {
    /// Compute the loss.
    ///
    /// - `input`: `[num_samples, num_classes]` logits.
    /// - `labels`: `[num_samples]` int64 class indexes. Values outside
    ///   `0..num_classes`, typically `num_classes` itself, mark background.
    /// - `scores`: `[num_samples]` quality targets of the labeled class.
    /// - `weight`: optional `[num_samples]` per-sample weights.
    pub fn forward(
        &self,
        input: &Tensor,
        labels: &Tensor,
        scores: &Tensor,
        weight: Option<&Tensor>,
        avg_factor: Option<f64>,
    ) -> Result<Tensor> {
        let Self {
            ref bce,
            beta,
            loss_weight,
            reduction,
        } = *self;

        let (num_samples, num_classes) = input.size2()?;
        ensure!(
            labels.size1()? == num_samples,
            "expect labels of shape [{}], but get {:?}",
            num_samples,
            labels.size()
        );
        ensure!(
            scores.size1()? == num_samples,
            "expect scores of shape [{}], but get {:?}",
            num_samples,
            scores.size()
        );
        let device = input.device();

        // one-hot mask of positive entries and the dense quality target
        let (pos_mask, target) = tch::no_grad(|| {
            let classes = Tensor::arange(num_classes, (Kind::Int64, device));
            let pos_mask = labels
                .to_kind(Kind::Int64)
                .view([-1, 1])
                .eq_tensor(&classes.view([1, -1]))
                .to_kind(Kind::Float);
            let target = &pos_mask * scores.to_kind(Kind::Float).view([-1, 1]);
            (pos_mask, target.set_requires_grad(false))
        });

        let prob = input.sigmoid();

        // negatives are pushed towards zero
        let neg_loss = bce.forward(input, &input.zeros_like()) * prob.pow_tensor_scalar(beta);

        // positives are pushed towards their quality score
        let pos_loss =
            bce.forward(input, &target) * (&target - &prob).abs().pow_tensor_scalar(beta);

        let loss = &pos_mask * pos_loss + (1.0 - &pos_mask) * neg_loss;
        let loss = loss.sum_dim_intlist(&[1], false, Kind::Float);

        let loss = weight_reduce_loss(&loss, weight, reduction, avg_factor)?;
        Ok(loss * loss_weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn background_only_loss_is_positive() -> Result<()> {
        let loss_fn = QualityFocalLossInit::default(Reduction::Mean).build()?;
        let input = Tensor::of_slice(&[0.0f32, -1.0, 1.0, 2.0]).view([2, 2]);
        let labels = Tensor::of_slice(&[2i64, 2]);
        let scores = Tensor::zeros(&[2], (Kind::Float, Device::Cpu));

        let loss = loss_fn.forward(&input, &labels, &scores, None, Some(1.0))?;

        // every entry is a negative: bce(x, 0) * sigmoid(x)^2
        let expect: f64 = [0.0f64, -1.0, 1.0, 2.0]
            .iter()
            .map(|&x| {
                let p = 1.0 / (1.0 + (-x).exp());
                -(1.0 - p).ln() * p * p
            })
            .sum();
        assert_abs_diff_eq!(loss.double_value(&[]), expect, epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn positive_entry_uses_quality_target() -> Result<()> {
        let loss_fn = QualityFocalLossInit::default(Reduction::None).build()?;
        let input = Tensor::of_slice(&[0.0f32, 0.0]).view([1, 2]);
        let labels = Tensor::of_slice(&[1i64]);
        let scores = Tensor::of_slice(&[0.5f32]);

        // sigmoid(0) equals the target, so the positive entry vanishes
        let loss = loss_fn.forward(&input, &labels, &scores, None, None)?;
        let expect = 2f64.ln() * 0.25;
        assert_abs_diff_eq!(loss.double_value(&[0]), expect, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn matched_quality_gives_exact_zero() -> Result<()> {
        let loss_fn = QualityFocalLossInit::default(Reduction::Sum).build()?;
        let input = Tensor::of_slice(&[0.0f32]).view([1, 1]);
        let labels = Tensor::of_slice(&[0i64]);
        let scores = Tensor::of_slice(&[0.5f32]);

        let loss = loss_fn.forward(&input, &labels, &scores, None, None)?;
        assert_eq!(loss.double_value(&[]), 0.0);
        Ok(())
    }

    #[test]
    fn quality_focal_loss_converges() -> Result<()> {
        let device = Device::Cpu;
        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let loss_fn = QualityFocalLossInit::default(Reduction::Mean).build()?;

        let input = root.randn("input", &[8, 3], 0.0, 1.0);
        let labels = Tensor::of_slice(&[0i64, 1, 2, 3, 3, 0, 1, 2]);
        let scores = Tensor::of_slice(&[0.9f32, 0.8, 0.7, 0.0, 0.0, 0.6, 0.5, 0.4]);

        let mut optimizer = nn::Adam::default().build(&vs, 0.05)?;
        for _ in 0..3000 {
            let loss = loss_fn.forward(&input, &labels, &scores, None, None)?;
            optimizer.backward_step(&loss);
        }

        let prob: Vec<f32> = input.sigmoid().view([-1]).into();
        let label_vec = [0usize, 1, 2, 3, 3, 0, 1, 2];
        let score_vec = [0.9f32, 0.8, 0.7, 0.0, 0.0, 0.6, 0.5, 0.4];
        for (row, (&label, &score)) in label_vec.iter().zip(score_vec.iter()).enumerate() {
            for col in 0..3 {
                let expect = if label == col { score } else { 0.0 };
                ensure!(
                    (prob[row * 3 + col] - expect).abs() <= 0.1,
                    "the loss does not converge"
                );
            }
        }
        Ok(())
    }
}
