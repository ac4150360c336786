use crate::common::*;

/// Converts per-side distributions over `reg_max + 1` bins into distances.
///
/// The input has `4 * (reg_max + 1)` entries in the last dimension. Each
/// side's logits go through softmax, and the distance is the expectation
/// over bin positions `0, 1, ..., reg_max`.
#[derive(Debug)]
pub struct Integral {
    reg_max: i64,
    project: Tensor,
}

impl Integral {
    pub fn new(reg_max: usize, device: Device) -> Self {
        let reg_max = reg_max as i64;
        let project =
            Tensor::arange(reg_max + 1, (Kind::Float, device)).set_requires_grad(false);
        Self { reg_max, project }
    }

    /// Map `[num_samples, 4 * (reg_max + 1)]` logits to `[num_samples, 4]` distances.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let num_bins = self.reg_max + 1;
        let (_, num_entries) = xs.size2()?;
        ensure!(
            num_entries == 4 * num_bins,
            "expect {} entries per sample, but get {}",
            4 * num_bins,
            num_entries
        );

        let prob = xs.reshape(&[-1, num_bins]).softmax(1, Kind::Float);
        Ok(prob.matmul(&self.project).reshape(&[-1, 4]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn integral_of_uniform_and_peaked() -> Result<()> {
        let integral = Integral::new(4, Device::Cpu);

        // uniform logits give the center bin, a peaked one gives its index
        let mut logits = vec![0.0f32; 20];
        logits[5 + 3] = 100.0;
        let xs = Tensor::of_slice(&logits).view([1, 20]);
        let dist: Vec<f32> = integral.forward(&xs)?.view([-1]).into();

        assert_abs_diff_eq!(dist[0], 2.0, epsilon = 1e-4);
        assert_abs_diff_eq!(dist[1], 3.0, epsilon = 1e-4);
        assert_abs_diff_eq!(dist[2], 2.0, epsilon = 1e-4);
        assert!(integral.forward(&Tensor::zeros(&[1, 12], (Kind::Float, Device::Cpu))).is_err());
        Ok(())
    }
}
