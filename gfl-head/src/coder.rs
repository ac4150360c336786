//! Conversion between boxes and point-to-side distances.

use crate::{common::*, error::ensure_shape};

/// Encodes a box relative to a point as `[left, top, right, bottom]` distances.
#[derive(Debug, Clone, Copy)]
pub struct DistancePointCoder {
    /// Keep the distances this far below `max_dis`.
    pub eps: f64,
}

impl Default for DistancePointCoder {
    fn default() -> Self {
        Self { eps: 0.1 }
    }
}

impl DistancePointCoder {
    /// Compute `[num, 4]` distances from `[num, 2]` `(x, y)` points to `[num, 4]`
    /// `x1, y1, x2, y2` boxes, clamped to `[0, max_dis - eps]` if `max_dis` is given.
    pub fn encode(&self, points: &Tensor, bboxes: &Tensor, max_dis: Option<f64>) -> Result<Tensor> {
        check_points(points)?;
        check_boxes(bboxes, points.size()[0])?;

        let x = points.select(1, 0);
        let y = points.select(1, 1);
        let left = &x - bboxes.select(1, 0);
        let top = &y - bboxes.select(1, 1);
        let right = bboxes.select(1, 2) - &x;
        let bottom = bboxes.select(1, 3) - &y;
        let distances = Tensor::stack(&[left, top, right, bottom], 1);

        let distances = match max_dis {
            Some(max_dis) => distances.clamp(0.0, max_dis - self.eps),
            None => distances,
        };
        Ok(distances)
    }

    /// Recover `x1, y1, x2, y2` boxes from points and distances.
    pub fn decode(&self, points: &Tensor, distances: &Tensor) -> Result<Tensor> {
        check_points(points)?;
        check_boxes(distances, points.size()[0])?;

        let x = points.select(1, 0);
        let y = points.select(1, 1);
        let x1 = &x - distances.select(1, 0);
        let y1 = &y - distances.select(1, 1);
        let x2 = &x + distances.select(1, 2);
        let y2 = &y + distances.select(1, 3);
        Ok(Tensor::stack(&[x1, y1, x2, y2], 1))
    }
}

fn check_points(points: &Tensor) -> Result<()> {
    let size = points.size();
    ensure_shape!(
        size.len() == 2 && size[1] == 2,
        "expect [num, 2] points, but get {:?}",
        size
    );
    Ok(())
}

fn check_boxes(tensor: &Tensor, num: i64) -> Result<()> {
    let size = tensor.size();
    ensure_shape!(
        size == [num, 4],
        "expect a [{}, 4] tensor, but get {:?}",
        num,
        size
    );
    Ok(())
}

/// Centers of `[num, 4]` `x1, y1, x2, y2` boxes as `[num, 2]` `(x, y)` points.
pub fn box_centers(bboxes: &Tensor) -> Tensor {
    let cx = (bboxes.select(1, 0) + bboxes.select(1, 2)) / 2.0;
    let cy = (bboxes.select(1, 1) + bboxes.select(1, 3)) / 2.0;
    Tensor::stack(&[cx, cy], 1)
}
