use crate::common::*;

/// Apply element-wise weights to a loss tensor and reduce it.
///
/// With `avg_factor`, the `Mean` reduction divides the weighted sum by
/// `avg_factor` instead of the number of elements. Combining `avg_factor`
/// with `Sum` is rejected.
pub fn weight_reduce_loss(
    loss: &Tensor,
    weight: Option<&Tensor>,
    reduction: Reduction,
    avg_factor: Option<f64>,
) -> Result<Tensor> {
    let loss = match weight {
        Some(weight) => loss.f_mul(weight)?,
        None => loss.shallow_clone(),
    };

    let output = match (reduction, avg_factor) {
        (Reduction::None, _) => loss,
        (Reduction::Sum, None) => loss.sum(Kind::Float),
        (Reduction::Sum, Some(_)) => bail!("avg_factor can not be used with sum reduction"),
        (Reduction::Mean, None) => {
            // the mean of nothing is defined as zero rather than NaN
            if loss.numel() == 0 {
                Tensor::zeros(&[], (Kind::Float, loss.device())).set_requires_grad(false)
            } else {
                loss.mean(Kind::Float)
            }
        }
        (Reduction::Mean, Some(avg_factor)) => loss.sum(Kind::Float) / (avg_factor + F32_EPSILON),
        (Reduction::Other(code), _) => bail!("unsupported reduction code {}", code),
    };

    Ok(output)
}
