//! Adaptive training sample selection.

use crate::{common::*, meta::GroundTruth};

/// ATSS assigner initializer.
#[derive(Debug, Clone)]
pub struct AtssAssignerInit {
    /// Candidates taken per level and per box.
    pub topk: usize,
    /// Lower bound of the IoU union area.
    pub iou_eps: f64,
    /// Minimum distance from a positive anchor center to the box sides.
    pub min_center_margin: f64,
}

impl Default for AtssAssignerInit {
    fn default() -> Self {
        Self {
            topk: 9,
            iou_eps: 1e-6,
            min_center_margin: 0.01,
        }
    }
}

impl AtssAssignerInit {
    pub fn build(self) -> Result<AtssAssigner> {
        let Self {
            topk,
            iou_eps,
            min_center_margin,
        } = self;
        ensure!(topk > 0, "topk must be positive");
        ensure!(iou_eps > 0.0, "iou_eps must be positive");

        Ok(AtssAssigner {
            topk,
            iou_eps,
            min_center_margin,
        })
    }
}

/// Assigns each anchor to a ground truth box or to background.
///
/// For every box, the `topk` anchors closest to its center are taken from
/// each level. The IoU threshold of the box is the mean plus the standard
/// deviation of the candidate IoUs. A candidate becomes positive if its IoU
/// reaches the threshold and its center lies inside the box. An anchor
/// positive for several boxes goes to the one with the highest IoU.
#[derive(Debug, Clone, CopyGetters)]
pub struct AtssAssigner {
    #[getset(get_copy = "pub")]
    topk: usize,
    iou_eps: f64,
    min_center_margin: f64,
}

/// The assignment of anchors in one image.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignResult {
    pub num_gts: usize,
    /// The matched box index of each anchor, `None` for background.
    pub gt_inds: Vec<Option<usize>>,
    /// The IoU with the matched box, zero for background.
    pub max_overlaps: Vec<f64>,
    /// The label of the matched box.
    pub labels: Vec<Option<usize>>,
}

impl AssignResult {
    pub fn num_pos(&self) -> usize {
        self.gt_inds.iter().filter(|ind| ind.is_some()).count()
    }

    pub fn pos_inds(&self) -> impl Iterator<Item = usize> + '_ {
        self.gt_inds
            .iter()
            .enumerate()
            .filter_map(|(index, ind)| ind.map(|_| index))
    }
}

impl AtssAssigner {
    /// Assign the anchors of one image.
    ///
    /// `anchors` is the concatenation of all levels, and `num_level_anchors`
    /// lists how many of them belong to each level.
    pub fn assign(
        &self,
        anchors: &[TLBR<f64>],
        num_level_anchors: &[usize],
        gt: &GroundTruth,
    ) -> Result<AssignResult> {
        let Self {
            topk,
            iou_eps,
            min_center_margin,
        } = *self;

        ensure!(
            num_level_anchors.iter().sum::<usize>() == anchors.len(),
            "level anchor counts sum to {}, but {} anchors are given",
            num_level_anchors.iter().sum::<usize>(),
            anchors.len()
        );
        ensure!(
            gt.bboxes.len() == gt.labels.len(),
            "{} boxes are given with {} labels",
            gt.bboxes.len(),
            gt.labels.len()
        );

        let level_ranges: Vec<_> = num_level_anchors
            .iter()
            .scan(0, |start, &count| {
                let range = *start..(*start + count);
                *start += count;
                Some(range)
            })
            .collect();

        let num_anchors = anchors.len();
        // (box index, IoU) of the best positive match so far
        let mut best: Vec<Option<(usize, f64)>> = vec![None; num_anchors];

        for (gt_index, gt_box) in gt.bboxes.iter().enumerate() {
            let overlaps: Vec<f64> = anchors
                .iter()
                .map(|anchor| anchor.iou_with(gt_box, iou_eps))
                .collect();

            let candidates: Vec<usize> = level_ranges
                .iter()
                .flat_map(|range| {
                    let mut indexes: Vec<(usize, f64)> = range
                        .clone()
                        .map(|index| (index, anchors[index].center_distance_to(gt_box)))
                        .collect();
                    indexes.sort_by(|(_, lhs), (_, rhs)| {
                        lhs.partial_cmp(rhs).unwrap_or(Ordering::Equal)
                    });
                    indexes.truncate(topk);
                    indexes.into_iter().map(|(index, _)| index)
                })
                .collect();

            let threshold = {
                let candidate_overlaps: Vec<f64> =
                    candidates.iter().map(|&index| overlaps[index]).collect();
                let (mean, std) = mean_and_std(&candidate_overlaps);
                mean + std
            };

            candidates
                .iter()
                .copied()
                .filter(|&index| {
                    let anchor = &anchors[index];
                    overlaps[index] >= threshold
                        && gt_box.inner_margin_of(anchor.cy(), anchor.cx()) > min_center_margin
                })
                .for_each(|index| {
                    let iou = overlaps[index];
                    let replace = match best[index] {
                        Some((_, prev_iou)) => iou > prev_iou,
                        None => true,
                    };
                    if replace {
                        best[index] = Some((gt_index, iou));
                    }
                });
        }

        let gt_inds: Vec<Option<usize>> = best.iter().map(|best| best.map(|(ind, _)| ind)).collect();
        let max_overlaps: Vec<f64> = best
            .iter()
            .map(|best| best.map(|(_, iou)| iou).unwrap_or(0.0))
            .collect();
        let labels: Vec<Option<usize>> = gt_inds
            .iter()
            .map(|ind| ind.map(|ind| gt.labels[ind]))
            .collect();

        Ok(AssignResult {
            num_gts: gt.len(),
            gt_inds,
            max_overlaps,
            labels,
        })
    }
}

/// The mean and the unbiased standard deviation.
///
/// The deviation of fewer than two samples is taken as zero.
fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let len = values.len();
    if len == 0 {
        return (0.0, 0.0);
    }

    let mean = values.iter().sum::<f64>() / len as f64;
    let std = if len < 2 {
        0.0
    } else {
        let var = values.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / (len - 1) as f64;
        var.sqrt()
    };
    (mean, std)
}
