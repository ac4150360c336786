//! The GFL detection head and its forward pass.

use crate::{
    assigner::{AtssAssigner, AtssAssignerInit},
    coder::DistancePointCoder,
    common::*,
    config::TestConfig,
    error::{ensure_shape, GflError},
    prior::{AnchorGenerator, AnchorGeneratorInit},
};
use tch_modules::{
    BoxLoss, BoxLossInit, ConvNorm2D, ConvNorm2DInit, DistributionFocalLoss,
    DistributionFocalLossInit, GroupNormInit, Integral, QualityFocalLoss, QualityFocalLossInit,
    Scale,
};

/// The prior probability of foreground used to initialize the classifier bias.
const PRIOR_PROB: f64 = 0.01;

/// GFL head initializer.
#[derive(Debug, Clone)]
pub struct GflHeadInit {
    pub num_classes: usize,
    pub in_channels: usize,
    pub feat_channels: usize,
    pub stacked_convs: usize,
    pub reg_max: usize,
    /// The number of GroupNorm groups in the towers.
    pub num_groups: usize,
    pub anchor_generator: AnchorGeneratorInit,
    pub assigner: AtssAssignerInit,
    pub loss_cls: QualityFocalLossInit,
    pub loss_bbox: BoxLossInit,
    pub loss_dfl: DistributionFocalLossInit,
    pub allowed_border: f64,
    pub pos_weight: f64,
    pub debug: bool,
    pub test_cfg: TestConfig,
}

impl GflHeadInit {
    pub fn build<'p, P>(self, path: P) -> Result<GflHead>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let Self {
            num_classes,
            in_channels,
            feat_channels,
            stacked_convs,
            reg_max,
            num_groups,
            anchor_generator,
            assigner,
            loss_cls,
            loss_bbox,
            loss_dfl,
            allowed_border,
            pos_weight,
            debug,
            test_cfg,
        } = self;

        let config_err = |err: Error| Error::from(GflError::Configuration(format!("{:#}", err)));

        let anchor_generator = anchor_generator.build().map_err(config_err)?;
        if anchor_generator.num_base_anchors() != 1 {
            return Err(GflError::Configuration(format!(
                "exactly one base anchor per location is supported, but get {}",
                anchor_generator.num_base_anchors()
            ))
            .into());
        }
        let assigner = assigner.build().map_err(config_err)?;
        let loss_cls = loss_cls.build().map_err(config_err)?;
        let loss_bbox = loss_bbox.build().map_err(config_err)?;
        let loss_dfl = loss_dfl.build().map_err(config_err)?;

        let build_tower = |name: &str| -> Result<Vec<ConvNorm2D>> {
            let tower_path = path / name;
            (0..stacked_convs)
                .map(|index| {
                    let in_c = if index == 0 { in_channels } else { feat_channels };
                    ConvNorm2DInit {
                        group_norm: Some(GroupNormInit::new(num_groups)),
                        ..ConvNorm2DInit::new(in_c, feat_channels, 3)
                    }
                    .build(&tower_path / index)
                })
                .collect::<Result<_>>()
                .map_err(config_err)
        };
        let cls_convs = build_tower("cls_convs")?;
        let reg_convs = build_tower("reg_convs")?;

        let tower_out_c = if stacked_convs == 0 {
            in_channels
        } else {
            feat_channels
        } as i64;
        let ws_init = nn::Init::Randn {
            mean: 0.0,
            stdev: 0.01,
        };

        let gfl_cls = nn::conv2d(
            path / "gfl_cls",
            tower_out_c,
            num_classes as i64,
            3,
            nn::ConvConfig {
                padding: 1,
                ws_init,
                bs_init: nn::Init::Const(-((1.0 - PRIOR_PROB) / PRIOR_PROB).ln()),
                ..Default::default()
            },
        );
        let gfl_reg = nn::conv2d(
            path / "gfl_reg",
            tower_out_c,
            4 * (reg_max as i64 + 1),
            3,
            nn::ConvConfig {
                padding: 1,
                ws_init,
                bs_init: nn::Init::Const(0.0),
                ..Default::default()
            },
        );

        let scales: Vec<_> = (0..anchor_generator.num_levels())
            .map(|index| Scale::new(&(path / "scales") / index, 1.0))
            .collect();
        let integral = Integral::new(reg_max, path.device());

        info!(
            "build GFL head with {} levels, {} classes and {} stacked convs",
            anchor_generator.num_levels(),
            num_classes,
            stacked_convs
        );

        Ok(GflHead {
            num_classes: num_classes as i64,
            in_channels: in_channels as i64,
            reg_max: reg_max as i64,
            cls_convs,
            reg_convs,
            gfl_cls,
            gfl_reg,
            scales,
            integral,
            anchor_generator,
            assigner,
            coder: DistancePointCoder::default(),
            loss_cls,
            loss_bbox,
            loss_dfl,
            allowed_border,
            pos_weight,
            debug,
            test_cfg,
            device: path.device(),
        })
    }
}

/// The GFL dense detection head.
///
/// Towers and output convs are shared among levels, and each level owns a
/// learnable scale on its regression output.
#[derive(Debug)]
pub struct GflHead {
    pub(crate) num_classes: i64,
    pub(crate) in_channels: i64,
    pub(crate) reg_max: i64,
    cls_convs: Vec<ConvNorm2D>,
    reg_convs: Vec<ConvNorm2D>,
    gfl_cls: nn::Conv2D,
    gfl_reg: nn::Conv2D,
    scales: Vec<Scale>,
    pub(crate) integral: Integral,
    pub(crate) anchor_generator: AnchorGenerator,
    pub(crate) assigner: AtssAssigner,
    pub(crate) coder: DistancePointCoder,
    pub(crate) loss_cls: QualityFocalLoss,
    pub(crate) loss_bbox: BoxLoss,
    pub(crate) loss_dfl: DistributionFocalLoss,
    pub(crate) allowed_border: f64,
    pub(crate) pos_weight: f64,
    pub(crate) debug: bool,
    pub(crate) test_cfg: TestConfig,
    device: Device,
}

/// Per-level predictions of the head.
#[derive(Debug)]
pub struct HeadOutput {
    /// `[batch, num_classes, h, w]` logits per level.
    pub cls_scores: Vec<Tensor>,
    /// `[batch, 4 * (reg_max + 1), h, w]` distribution logits per level.
    pub bbox_preds: Vec<Tensor>,
}

impl HeadOutput {
    pub fn num_levels(&self) -> usize {
        self.cls_scores.len()
    }

    /// Spatial `[h, w]` sizes of each level.
    pub fn feat_sizes(&self) -> Vec<[usize; 2]> {
        self.cls_scores
            .iter()
            .map(|score| {
                let size = score.size();
                [size[2] as usize, size[3] as usize]
            })
            .collect()
    }
}

impl GflHead {
    pub fn num_classes(&self) -> usize {
        self.num_classes as usize
    }

    pub fn reg_max(&self) -> usize {
        self.reg_max as usize
    }

    pub fn num_levels(&self) -> usize {
        self.anchor_generator.num_levels()
    }

    pub fn strides(&self) -> &[usize] {
        self.anchor_generator.strides()
    }

    pub fn anchor_generator(&self) -> &AnchorGenerator {
        &self.anchor_generator
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Run the towers on each `[batch, in_channels, h, w]` feature level.
    pub fn forward(&self, features: &[Tensor]) -> Result<HeadOutput> {
        ensure_shape!(
            features.len() == self.num_levels(),
            "expect {} feature levels, but get {}",
            self.num_levels(),
            features.len()
        );

        let sizes: Vec<_> = features
            .iter()
            .enumerate()
            .map(|(level, feature)| {
                feature.size4().map_err(|_| {
                    GflError::Shape(format!(
                        "feature level {} must be a rank 4 tensor, but get {:?}",
                        level,
                        feature.size()
                    ))
                })
            })
            .collect::<Result<_, _>>()?;

        let batch_size = sizes[0].0;
        for (level, &(batch, channels, _, _)) in sizes.iter().enumerate() {
            ensure_shape!(
                channels == self.in_channels,
                "feature level {} has {} channels, but {} is expected",
                level,
                channels,
                self.in_channels
            );
            ensure_shape!(
                batch == batch_size,
                "feature level {} has batch size {}, but {} is expected",
                level,
                batch,
                batch_size
            );
        }

        let (cls_scores, bbox_preds): (Vec<_>, Vec<_>) = izip!(features, &self.scales)
            .map(|(feature, scale)| {
                let cls_feat = self
                    .cls_convs
                    .iter()
                    .fold(feature.shallow_clone(), |xs, conv| xs.apply(conv));
                let reg_feat = self
                    .reg_convs
                    .iter()
                    .fold(feature.shallow_clone(), |xs, conv| xs.apply(conv));

                let cls_score = cls_feat.apply(&self.gfl_cls);
                let bbox_pred = scale.forward(&reg_feat.apply(&self.gfl_reg));
                (cls_score, bbox_pred)
            })
            .unzip();

        Ok(HeadOutput {
            cls_scores,
            bbox_preds,
        })
    }

    /// Check a head output against the configured level count and channels.
    pub(crate) fn check_output(&self, output: &HeadOutput) -> Result<i64> {
        let HeadOutput {
            cls_scores,
            bbox_preds,
        } = output;

        ensure_shape!(
            cls_scores.len() == self.num_levels() && bbox_preds.len() == self.num_levels(),
            "expect {} levels of predictions, but get {} classification and {} box levels",
            self.num_levels(),
            cls_scores.len(),
            bbox_preds.len()
        );

        let num_bbox_channels = 4 * (self.reg_max + 1);
        let mut batch_size = None;

        for (level, (cls_score, bbox_pred)) in izip!(cls_scores, bbox_preds).enumerate() {
            let cls_size = cls_score.size();
            let bbox_size = bbox_pred.size();

            ensure_shape!(
                cls_size.len() == 4 && cls_size[1] == self.num_classes,
                "classification level {} must be [batch, {}, h, w], but get {:?}",
                level,
                self.num_classes,
                cls_size
            );
            ensure_shape!(
                bbox_size.len() == 4
                    && bbox_size[1] == num_bbox_channels
                    && bbox_size[0] == cls_size[0]
                    && bbox_size[2..] == cls_size[2..],
                "box level {} must be [{}, {}, {}, {}], but get {:?}",
                level,
                cls_size[0],
                num_bbox_channels,
                cls_size[2],
                cls_size[3],
                bbox_size
            );

            let batch = *batch_size.get_or_insert(cls_size[0]);
            ensure_shape!(
                cls_size[0] == batch,
                "level {} has batch size {}, but {} is expected",
                level,
                cls_size[0],
                batch
            );
        }

        batch_size.ok_or_else(|| GflError::Shape("no prediction level is given".into()).into())
    }
}
