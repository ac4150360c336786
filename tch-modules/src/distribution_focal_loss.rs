use crate::{common::*, reduction::weight_reduce_loss};

/// Distribution focal loss initializer.
#[derive(Debug, Clone)]
pub struct DistributionFocalLossInit {
    pub loss_weight: f64,
    pub reduction: Reduction,
}

impl DistributionFocalLossInit {
    pub fn default(reduction: Reduction) -> Self {
        Self {
            loss_weight: 0.25,
            reduction,
        }
    }

    pub fn build(self) -> Result<DistributionFocalLoss> {
        let Self {
            loss_weight,
            reduction,
        } = self;
        ensure!(loss_weight >= 0.0, "loss_weight must be non-negative");

        Ok(DistributionFocalLoss {
            loss_weight,
            reduction,
        })
    }
}

/// Distribution focal loss calculator.
///
/// The target is a continuous position `y` on the bin axis. The loss is the
/// cross entropy towards the two neighboring bins `floor(y)` and
/// `floor(y) + 1`, weighted by the linear interpolation coefficients.
#[derive(Debug)]
pub struct DistributionFocalLoss {
    loss_weight: f64,
    reduction: Reduction,
}

impl DistributionFocalLoss {
    /// Compute the loss of `[num_samples, num_bins]` logits against
    /// `[num_samples]` float targets in `[0, num_bins - 1]`.
    pub fn forward(
        &self,
        input: &Tensor,
        target: &Tensor,
        weight: Option<&Tensor>,
        avg_factor: Option<f64>,
    ) -> Result<Tensor> {
        let Self {
            loss_weight,
            reduction,
        } = *self;

        let (num_samples, num_bins) = input.size2()?;
        ensure!(
            target.size1()? == num_samples,
            "expect target of shape [{}], but get {:?}",
            num_samples,
            target.size()
        );

        let target = target.to_kind(Kind::Float).detach();
        debug_assert!(
            bool::from(
                target
                    .ge(0.0)
                    .logical_and(&target.le((num_bins - 1) as f64))
                    .all()
            ),
            "target values must be in range of [0, {}]",
            num_bins - 1
        );

        let (dis_left, dis_right, weight_left, weight_right) = tch::no_grad(|| {
            let dis_left = target.to_kind(Kind::Int64);
            let dis_right = (&target + 1.0).to_kind(Kind::Int64);
            let weight_left = dis_right.to_kind(Kind::Float) - &target;
            let weight_right = &target - dis_left.to_kind(Kind::Float);
            (
                dis_left,
                dis_right.clamp_max(num_bins - 1),
                weight_left,
                weight_right,
            )
        });

        let log_prob = input.log_softmax(1, Kind::Float);
        let ce_left = -log_prob.gather(1, &dis_left.view([-1, 1]), false).view([-1]);
        let ce_right = -log_prob.gather(1, &dis_right.view([-1, 1]), false).view([-1]);
        let loss = ce_left * weight_left + ce_right * weight_right;

        let loss = weight_reduce_loss(&loss, weight, reduction, avg_factor)?;
        Ok(loss * loss_weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn uniform_distribution_loss() -> Result<()> {
        let loss_fn = DistributionFocalLossInit {
            loss_weight: 1.0,
            reduction: Reduction::None,
        }
        .build()?;

        // uniform logits give ln(num_bins) on both neighbors
        let input = Tensor::zeros(&[2, 5], (Kind::Float, Device::Cpu));
        let target = Tensor::of_slice(&[1.5f32, 3.0]);
        let loss: Vec<f32> = loss_fn.forward(&input, &target, None, None)?.into();

        assert_abs_diff_eq!(loss[0], 5f32.ln(), epsilon = 1e-5);
        assert_abs_diff_eq!(loss[1], 5f32.ln(), epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn distribution_focal_loss_converges() -> Result<()> {
        let device = Device::Cpu;
        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let loss_fn = DistributionFocalLossInit::default(Reduction::Mean).build()?;

        let num_bins = 8;
        let input = root.randn("input", &[4, num_bins], 0.0, 1.0);
        let target = Tensor::of_slice(&[0.0f32, 2.25, 4.5, 6.99]);
        let project = Tensor::arange(num_bins, (Kind::Float, device));

        let mut optimizer = nn::Adam::default().build(&vs, 0.05)?;
        for _ in 0..2000 {
            let loss = loss_fn.forward(&input, &target, None, None)?;
            optimizer.backward_step(&loss);
        }

        // the expectation of the learned distribution recovers the target
        let expectation = input.softmax(1, Kind::Float).matmul(&project);
        ensure!(
            bool::from((expectation - &target).abs().le(0.05).all()),
            "the loss does not converge"
        );
        Ok(())
    }
}
