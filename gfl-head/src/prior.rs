//! Anchor generation on feature grids.

use crate::common::*;

/// Anchor generator initializer.
#[derive(Debug, Clone)]
pub struct AnchorGeneratorInit {
    /// Feature strides in level order. Each stride is also the base anchor size.
    pub strides: Vec<usize>,
    /// Height to width ratios.
    pub ratios: Vec<f64>,
    pub octave_base_scale: f64,
    pub scales_per_octave: usize,
    /// Anchor center offset relative to the stride.
    pub center_offset: f64,
}

impl AnchorGeneratorInit {
    pub fn build(self) -> Result<AnchorGenerator> {
        let Self {
            strides,
            ratios,
            octave_base_scale,
            scales_per_octave,
            center_offset,
        } = self;

        ensure!(!strides.is_empty(), "strides must not be empty");
        ensure!(
            !ratios.is_empty() && scales_per_octave > 0,
            "at least one ratio and one scale are required"
        );

        let scales: Vec<f64> = (0..scales_per_octave)
            .map(|index| octave_base_scale * 2f64.powf(index as f64 / scales_per_octave as f64))
            .collect();

        let base_anchors: Vec<Vec<TLBR<f64>>> = strides
            .iter()
            .map(|&stride| -> Result<_> {
                let base_size = stride as f64;
                let center = center_offset * base_size;

                // ratio major, scale minor
                iproduct!(&ratios, &scales)
                    .map(|(&ratio, &scale)| {
                        let h_ratio = ratio.sqrt();
                        let w_ratio = 1.0 / h_ratio;
                        let h = base_size * h_ratio * scale;
                        let w = base_size * w_ratio * scale;
                        TLBR::try_from_tlbr([
                            center - 0.5 * h,
                            center - 0.5 * w,
                            center + 0.5 * h,
                            center + 0.5 * w,
                        ])
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<_>>()?;

        Ok(AnchorGenerator {
            strides,
            base_anchors,
        })
    }
}

/// Generates anchors for every location of every feature level.
#[derive(Debug, Clone)]
pub struct AnchorGenerator {
    strides: Vec<usize>,
    base_anchors: Vec<Vec<TLBR<f64>>>,
}

impl AnchorGenerator {
    pub fn num_levels(&self) -> usize {
        self.strides.len()
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// The number of anchors at one location, equal on all levels.
    pub fn num_base_anchors(&self) -> usize {
        self.base_anchors[0].len()
    }

    pub fn base_anchors(&self, level: usize) -> &[TLBR<f64>] {
        &self.base_anchors[level]
    }

    /// Anchors of one level in `(y, x, base anchor)` order.
    pub fn grid_anchors(&self, level: usize, feat_h: usize, feat_w: usize) -> Result<Vec<TLBR<f64>>> {
        ensure!(
            level < self.num_levels(),
            "level {} is out of range of {} levels",
            level,
            self.num_levels()
        );
        let stride = self.strides[level] as f64;
        let base_anchors = &self.base_anchors[level];

        let anchors = iproduct!(0..feat_h, 0..feat_w, base_anchors)
            .map(|(y, x, anchor)| anchor.shift(y as f64 * stride, x as f64 * stride))
            .collect();
        Ok(anchors)
    }

    /// Per-level anchors for the given feature sizes.
    pub fn multi_level_anchors(&self, feat_sizes: &[[usize; 2]]) -> Result<Vec<Vec<TLBR<f64>>>> {
        ensure!(
            feat_sizes.len() == self.num_levels(),
            "expect {} feature sizes, but get {}",
            self.num_levels(),
            feat_sizes.len()
        );
        feat_sizes
            .iter()
            .enumerate()
            .map(|(level, &[h, w])| self.grid_anchors(level, h, w))
            .collect()
    }

    /// Mark anchors whose locations fall inside the padded image.
    pub fn valid_flags(
        &self,
        level: usize,
        feat_size: [usize; 2],
        pad_shape: [usize; 2],
    ) -> Result<Vec<bool>> {
        ensure!(
            level < self.num_levels(),
            "level {} is out of range of {} levels",
            level,
            self.num_levels()
        );
        let stride = self.strides[level];
        let [feat_h, feat_w] = feat_size;
        let [pad_h, pad_w] = pad_shape;
        let valid_h = ((pad_h + stride - 1) / stride).min(feat_h);
        let valid_w = ((pad_w + stride - 1) / stride).min(feat_w);
        let num_base_anchors = self.base_anchors[level].len();

        let flags = iproduct!(0..feat_h, 0..feat_w, 0..num_base_anchors)
            .map(|(y, x, _)| y < valid_h && x < valid_w)
            .collect();
        Ok(flags)
    }
}

/// Combine valid flags with the border check.
///
/// With a negative `allowed_border`, the valid flags are returned as is.
/// Otherwise an anchor must not cross the image border by more than
/// `allowed_border` pixels.
pub fn inside_flags(
    anchors: &[TLBR<f64>],
    valid_flags: &[bool],
    img_shape: [usize; 2],
    allowed_border: f64,
) -> Vec<bool> {
    debug_assert_eq!(anchors.len(), valid_flags.len());

    if allowed_border < 0.0 {
        return valid_flags.to_vec();
    }

    let [img_h, img_w] = img_shape;
    let (img_h, img_w) = (img_h as f64, img_w as f64);

    izip!(anchors, valid_flags)
        .map(|(anchor, &valid)| {
            valid
                && anchor.l() >= -allowed_border
                && anchor.t() >= -allowed_border
                && anchor.r() < img_w + allowed_border
                && anchor.b() < img_h + allowed_border
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn generator() -> Result<AnchorGenerator> {
        AnchorGeneratorInit {
            strides: vec![8, 16, 32, 64, 128],
            ratios: vec![1.0],
            octave_base_scale: 8.0,
            scales_per_octave: 1,
            center_offset: 0.0,
        }
        .build()
    }

    #[test]
    fn grid_anchor_layout() -> Result<()> {
        let generator = generator()?;
        assert_eq!(generator.num_base_anchors(), 1);

        let sizes = [[32, 32], [16, 16], [8, 8], [4, 4], [2, 2]];
        let anchors = generator.multi_level_anchors(&sizes)?;
        let counts: Vec<_> = anchors.iter().map(|level| level.len()).collect();
        assert_eq!(counts, vec![1024, 256, 64, 16, 4]);

        assert_eq!(anchors[0][0].xyxy(), [-32.0, -32.0, 32.0, 32.0]);
        // second location moves along x first
        assert_eq!(anchors[0][1].xyxy(), [-24.0, -32.0, 40.0, 32.0]);
        assert_eq!(anchors[0][32].xyxy(), [-32.0, -24.0, 32.0, 40.0]);
        assert_eq!(anchors[4][0].xyxy(), [-512.0, -512.0, 512.0, 512.0]);
        Ok(())
    }

    #[test]
    fn ratios_and_scales() -> Result<()> {
        let generator = AnchorGeneratorInit {
            strides: vec![4],
            ratios: vec![0.25, 1.0],
            octave_base_scale: 1.0,
            scales_per_octave: 2,
            center_offset: 0.5,
        }
        .build()?;

        let base = generator.base_anchors(0);
        assert_eq!(base.len(), 4);
        // ratio 0.25 halves the height and doubles the width
        assert_abs_diff_eq!(base[0].h(), 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(base[0].w(), 8.0, epsilon = 1e-9);
        assert_abs_diff_eq!(base[1].h(), 2.0 * 2f64.sqrt(), epsilon = 1e-9);
        assert_abs_diff_eq!(base[2].cy(), 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(base[3].w(), 4.0 * 2f64.sqrt(), epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn valid_and_inside_flags() -> Result<()> {
        let generator = generator()?;

        let valid = generator.valid_flags(0, [4, 4], [20, 30])?;
        let expect: Vec<bool> = iproduct!(0..4, 0..4).map(|(y, x)| y < 3 && x < 4).collect();
        assert_eq!(valid, expect);

        let anchors = generator.grid_anchors(1, 4, 4)?;
        let valid = vec![true; anchors.len()];
        assert_eq!(inside_flags(&anchors, &valid, [64, 64], -1.0), valid);

        // every stride 16 anchor is 128 wide and crosses a 64 pixel image
        let inside = inside_flags(&anchors, &valid, [64, 64], 0.0);
        assert!(inside.iter().all(|&flag| !flag));
        let inside = inside_flags(&anchors, &valid, [64, 64], 48.0);
        assert!(!inside[0]);
        assert!(inside[5]);
        assert_eq!(inside.iter().filter(|&&flag| flag).count(), 4);
        Ok(())
    }
}
