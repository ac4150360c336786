use crate::common::*;

/// Checked tensor of batched box parameters in TLBR format.
#[derive(Debug, TensorLike)]
pub struct TLBRTensor {
    /// The top parameter in shape `[batch]`.
    t: Tensor,
    /// The left parameter in shape `[batch]`.
    l: Tensor,
    /// The bottom parameter in shape `[batch]`.
    b: Tensor,
    /// The right parameter in shape `[batch]`.
    r: Tensor,
}

impl TLBRTensor {
    /// Split a `[batch, 4]` tensor in `x1, y1, x2, y2` order.
    pub fn from_xyxy(xyxy: &Tensor) -> Result<Self> {
        let (_, four) = xyxy.size2()?;
        ensure!(four == 4, "expect a [batch, 4] tensor, but get {:?}", xyxy.size());
        Ok(Self {
            l: xyxy.select(1, 0),
            t: xyxy.select(1, 1),
            r: xyxy.select(1, 2),
            b: xyxy.select(1, 3),
        })
    }

    pub fn h(&self) -> Tensor {
        &self.b - &self.t
    }

    pub fn w(&self) -> Tensor {
        &self.r - &self.l
    }

    pub fn cy(&self) -> Tensor {
        (&self.t + &self.b) / 2.0
    }

    pub fn cx(&self) -> Tensor {
        (&self.l + &self.r) / 2.0
    }

    /// Compute the box area.
    pub fn area(&self) -> Tensor {
        self.h() * self.w()
    }

    /// Compute the intersection area with the other box tensor.
    pub fn intersect_area_with(&self, other: &Self) -> Tensor {
        let max_t = self.t.maximum(&other.t);
        let max_l = self.l.maximum(&other.l);
        let min_b = self.b.minimum(&other.b);
        let min_r = self.r.minimum(&other.r);

        let inner_h = (min_b - max_t).clamp_min(0.0);
        let inner_w = (min_r - max_l).clamp_min(0.0);

        inner_h * inner_w
    }

    /// Compute the rectangle closure with the other box tensor.
    pub fn closure_with(&self, other: &Self) -> Self {
        Self {
            t: self.t.minimum(&other.t),
            l: self.l.minimum(&other.l),
            b: self.b.maximum(&other.b),
            r: self.r.maximum(&other.r),
        }
    }

    /// Compute the IoU score of aligned pairs. The union is clamped from below by `eps`.
    pub fn iou_with(&self, other: &Self, eps: f64) -> Tensor {
        let inter_area = self.intersect_area_with(other);
        let union_area = (self.area() + other.area() - &inter_area).clamp_min(eps);
        inter_area / union_area
    }

    /// Compute the GIoU score of aligned pairs.
    pub fn giou_with(&self, other: &Self, eps: f64) -> Tensor {
        let inter_area = self.intersect_area_with(other);
        let union_area = (self.area() + other.area() - &inter_area).clamp_min(eps);
        let closure_area = self.closure_with(other).area().clamp_min(eps);
        let iou = &inter_area / &union_area;
        iou - (&closure_area - &union_area) / &closure_area
    }

    /// Compute the DIoU score of aligned pairs.
    pub fn diou_with(&self, other: &Self, eps: f64) -> Tensor {
        let iou = self.iou_with(other, eps);
        let (center_dist_square, diagonal_square) = self.center_and_diagonal_square(other, eps);
        iou - center_dist_square / diagonal_square
    }

    /// Compute the CIoU score of aligned pairs.
    pub fn ciou_with(&self, other: &Self, eps: f64) -> Tensor {
        use std::f64::consts::PI;

        let iou = self.iou_with(other, eps);
        let (center_dist_square, diagonal_square) = self.center_and_diagonal_square(other, eps);

        let pred_angle = (self.w() / (self.h() + eps)).atan();
        let target_angle = (other.w() / (other.h() + eps)).atan();
        let angle_diff = &target_angle - &pred_angle;
        let shape_loss = &angle_diff * &angle_diff * (4.0 / (PI * PI));
        let shape_loss_coef =
            tch::no_grad(|| &shape_loss / (1.0 - &iou + &shape_loss).clamp_min(eps));

        iou - center_dist_square / diagonal_square - shape_loss_coef * shape_loss
    }

    fn center_and_diagonal_square(&self, other: &Self, eps: f64) -> (Tensor, Tensor) {
        let closure = self.closure_with(other);
        let closure_h = closure.h();
        let closure_w = closure.w();
        let diagonal_square = &closure_h * &closure_h + &closure_w * &closure_w + eps;

        let dy = self.cy() - other.cy();
        let dx = self.cx() - other.cx();
        let center_dist_square = &dy * &dy + &dx * &dx;

        (center_dist_square, diagonal_square)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn aligned_box_metrics() -> Result<()> {
        let lhs = TLBRTensor::from_xyxy(
            &Tensor::of_slice(&[0.0f32, 0.0, 2.0, 2.0, 0.0, 0.0, 1.0, 1.0]).view([2, 4]),
        )?;
        let rhs = TLBRTensor::from_xyxy(
            &Tensor::of_slice(&[1.0f32, 1.0, 3.0, 3.0, 0.0, 0.0, 1.0, 1.0]).view([2, 4]),
        )?;

        let iou: Vec<f32> = lhs.iou_with(&rhs, 1e-6).into();
        assert_abs_diff_eq!(iou[0], 1.0 / 7.0, epsilon = 1e-5);
        assert_abs_diff_eq!(iou[1], 1.0, epsilon = 1e-5);

        let giou: Vec<f32> = lhs.giou_with(&rhs, 1e-6).into();
        assert_abs_diff_eq!(giou[0], 1.0 / 7.0 - 2.0 / 9.0, epsilon = 1e-5);
        assert_abs_diff_eq!(giou[1], 1.0, epsilon = 1e-5);

        // centers 1.414 apart, closure diagonal 3 * 1.414
        let diou: Vec<f32> = lhs.diou_with(&rhs, 1e-6).into();
        assert_abs_diff_eq!(diou[0], 1.0 / 7.0 - 2.0 / 18.0, epsilon = 1e-5);

        let ciou: Vec<f32> = lhs.ciou_with(&rhs, 1e-6).into();
        assert_abs_diff_eq!(ciou[0], diou[0], epsilon = 1e-5);
        assert_abs_diff_eq!(ciou[1], 1.0, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn reject_bad_shape() {
        let tensor = Tensor::zeros(&[3, 5], (Kind::Float, Device::Cpu));
        assert!(TLBRTensor::from_xyxy(&tensor).is_err());
    }
}
