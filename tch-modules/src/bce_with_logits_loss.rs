use crate::common::*;

#[derive(Debug)]
pub struct BceWithLogitsLossInit {
    pub pos_weight: Option<Tensor>,
    pub reduction: Reduction,
}

impl BceWithLogitsLossInit {
    pub fn default(reduction: Reduction) -> Self {
        Self {
            pos_weight: None,
            reduction,
        }
    }

    pub fn build(self) -> BceWithLogitsLoss {
        let Self {
            pos_weight,
            reduction,
        } = self;

        let pos_weight = pos_weight.map(|weight| weight.detach().set_requires_grad(false));

        BceWithLogitsLoss {
            pos_weight,
            reduction,
        }
    }
}

/// Binary cross entropy on raw logits.
#[derive(Debug)]
pub struct BceWithLogitsLoss {
    pos_weight: Option<Tensor>,
    reduction: Reduction,
}

impl BceWithLogitsLoss {
    pub fn forward(&self, input: &Tensor, target: &Tensor) -> Tensor {
        debug_assert_eq!(
            input.size(),
            target.size(),
            "input and target tensors must have equal shape"
        );
        debug_assert!(
            bool::from(target.ge(0.0).logical_and(&target.le(1.0)).all()),
            "target values must be in range of [0.0, 1.0]"
        );

        // return zero tensor if (1) input is empty and (2) using mean reduction
        if input.numel() == 0 && self.reduction == Reduction::Mean {
            return Tensor::zeros(&[], (Kind::Float, input.device())).set_requires_grad(false);
        }

        input.binary_cross_entropy_with_logits::<&Tensor>(
            target,
            None,
            self.pos_weight.as_ref(),
            self.reduction,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn bce_matches_closed_form() {
        let loss_fn = BceWithLogitsLossInit::default(Reduction::None).build();
        let input = Tensor::of_slice(&[0.0f32, 2.0, -3.0]);
        let target = Tensor::of_slice(&[0.0f32, 1.0, 0.25]);
        let loss: Vec<f32> = loss_fn.forward(&input, &target).into();

        let expect = |x: f32, y: f32| {
            let p = 1.0 / (1.0 + (-x).exp());
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        };
        assert_abs_diff_eq!(loss[0], expect(0.0, 0.0), epsilon = 1e-5);
        assert_abs_diff_eq!(loss[1], expect(2.0, 1.0), epsilon = 1e-5);
        assert_abs_diff_eq!(loss[2], expect(-3.0, 0.25), epsilon = 1e-5);
    }

    #[test]
    fn bce_loss_converges() -> Result<()> {
        let device = Device::Cpu;
        let n_batch = 16;
        let n_class = 3;

        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let loss_fn = BceWithLogitsLossInit::default(Reduction::Mean).build();

        let input = root.randn("input", &[n_batch, n_class], 0.0, 1.0);
        let target = Tensor::rand(&[n_batch, n_class], (Kind::Float, device))
            .ge(0.5)
            .to_kind(Kind::Float)
            .set_requires_grad(false);

        let mut optimizer = nn::Adam::default().build(&vs, 0.1)?;
        for _ in 0..2000 {
            let loss = loss_fn.forward(&input, &target);
            optimizer.backward_step(&loss);
        }

        ensure!(
            bool::from((input.sigmoid() - &target).abs().le(1e-2).all()),
            "the loss does not converge"
        );
        Ok(())
    }
}
