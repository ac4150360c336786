use crate::{common::*, RectFloat, TLBR};

/// A scored and labeled box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredBox<T> {
    pub rect: TLBR<T>,
    pub score: T,
    pub class: usize,
}

/// Greedy non-maximum suppression.
///
/// Boxes are visited in descending score order. A box suppresses every
/// later box of the same class whose IoU with it exceeds `iou_threshold`.
/// Returns the indexes of kept boxes, highest score first.
pub fn nms<T>(boxes: &[ScoredBox<T>], iou_threshold: T) -> Vec<usize>
where
    T: Float,
{
    let mut order: Vec<usize> = (0..boxes.len()).collect();
    order.sort_by(|&lhs, &rhs| {
        boxes[rhs]
            .score
            .partial_cmp(&boxes[lhs].score)
            .unwrap_or(Ordering::Equal)
    });

    let epsilon = T::epsilon();
    let mut suppressed = vec![false; boxes.len()];
    let mut keep = vec![];

    for (nth, &li) in order.iter().enumerate() {
        if suppressed[li] {
            continue;
        }
        keep.push(li);
        let lhs = &boxes[li];

        for &ri in &order[(nth + 1)..] {
            let rhs = &boxes[ri];
            if suppressed[ri] || rhs.class != lhs.class {
                continue;
            }
            if lhs.rect.iou_with(&rhs.rect, epsilon) > iou_threshold {
                suppressed[ri] = true;
            }
        }
    }

    keep
}
