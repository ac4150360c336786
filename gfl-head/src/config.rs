//! Detection head configuration format.

use crate::{
    assigner::AtssAssignerInit,
    common::*,
    error::{ensure_config, GflError},
    head::GflHeadInit,
    prior::AnchorGeneratorInit,
};
use tch_modules::{BoxLossInit, BoxMetric, DistributionFocalLossInit, QualityFocalLossInit};

pub use anchor::*;
pub use loss::*;
pub use training::*;

/// The GFL head configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The number of foreground classes.
    pub num_classes: usize,
    /// The channel count of every input feature level.
    pub in_channels: usize,
    #[serde(default = "default_feat_channels")]
    pub feat_channels: usize,
    /// The number of conv layers in each tower.
    #[serde(default = "default_stacked_convs")]
    pub stacked_convs: usize,
    /// The index of the last distribution bin.
    #[serde(default = "default_reg_max")]
    pub reg_max: usize,
    #[serde(default)]
    pub norm: NormConfig,
    pub anchor_generator: AnchorGeneratorConfig,
    pub loss_cls: ClsLossConfig,
    pub loss_bbox: BboxLossConfig,
    #[serde(default)]
    pub loss_dfl: DflLossConfig,
    pub train_cfg: TrainConfig,
    #[serde(default)]
    pub test_cfg: TestConfig,
}

impl Config {
    pub fn load<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read config file '{}'", path.display()))?;
        Self::from_json5_str(&text)
    }

    /// Parse and validate a JSON5 document.
    pub fn from_json5_str(text: &str) -> Result<Self> {
        let config: Self =
            json5::from_str(text).map_err(|err| GflError::Configuration(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let Self {
            num_classes,
            in_channels,
            feat_channels,
            stacked_convs,
            reg_max,
            ref norm,
            ref anchor_generator,
            ref loss_cls,
            ref loss_bbox,
            ref loss_dfl,
            ref train_cfg,
            ref test_cfg,
        } = *self;

        ensure_config!(num_classes > 0, "num_classes must be positive");
        ensure_config!(in_channels > 0, "in_channels must be positive");
        ensure_config!(feat_channels > 0, "feat_channels must be positive");
        ensure_config!(reg_max > 0, "reg_max must be positive");

        let NormConfig::GN { num_groups } = *norm;
        ensure_config!(
            stacked_convs == 0 || (num_groups > 0 && feat_channels % num_groups == 0),
            "feat_channels {} is not divisible by {} GN groups",
            feat_channels,
            num_groups
        );

        let AnchorGeneratorConfig::AnchorGenerator(AnchorGeneratorParams {
            ref ratios,
            octave_base_scale,
            scales_per_octave,
            ref strides,
            center_offset,
        }) = *anchor_generator;
        ensure_config!(!strides.is_empty(), "at least one anchor stride is required");
        ensure_config!(strides.iter().all(|&s| s > 0), "anchor strides must be positive");
        ensure_config!(
            ratios.iter().all(|&r| r > 0.0),
            "anchor ratios must be positive"
        );
        ensure_config!(octave_base_scale > 0.0, "octave_base_scale must be positive");
        ensure_config!(
            ratios.len() * scales_per_octave == 1,
            "exactly one base anchor per location is supported, but {} ratios and {} scales per octave are given",
            ratios.len(),
            scales_per_octave
        );
        ensure_config!(
            (0.0..=1.0).contains(&center_offset.raw()),
            "center_offset must be in range [0, 1]"
        );

        let ClsLossConfig::QualityFocalLoss(QualityFocalLossParams {
            use_sigmoid,
            beta,
            loss_weight,
        }) = *loss_cls;
        ensure_config!(use_sigmoid, "QualityFocalLoss only supports sigmoid activation");
        ensure_config!(beta >= 0.0, "QualityFocalLoss beta must be non-negative");
        ensure_config!(loss_weight >= 0.0, "loss_cls weight must be non-negative");

        ensure_config!(
            loss_bbox.loss_weight >= 0.0,
            "loss_bbox weight must be non-negative"
        );

        let DflLossConfig::DistributionFocalLoss { loss_weight } = *loss_dfl;
        ensure_config!(loss_weight >= 0.0, "loss_dfl weight must be non-negative");

        let AssignerConfig::ATSSAssigner { topk } = train_cfg.assigner;
        ensure_config!(topk > 0, "ATSSAssigner topk must be positive");

        let TestConfig {
            score_thr,
            iou_threshold,
            max_per_img,
            ..
        } = *test_cfg;
        ensure_config!(
            (0.0..=1.0).contains(&score_thr.raw()),
            "score_thr must be in range [0, 1]"
        );
        ensure_config!(
            (0.0..=1.0).contains(&iou_threshold.raw()),
            "iou_threshold must be in range [0, 1]"
        );
        ensure_config!(max_per_img > 0, "max_per_img must be positive");

        Ok(())
    }

    /// Validate the configuration and resolve it into a head initializer.
    pub fn gfl_head_init(&self) -> Result<GflHeadInit> {
        self.validate()?;

        let Self {
            num_classes,
            in_channels,
            feat_channels,
            stacked_convs,
            reg_max,
            ref norm,
            ref anchor_generator,
            ref loss_cls,
            ref loss_bbox,
            ref loss_dfl,
            ref train_cfg,
            ref test_cfg,
        } = *self;

        let NormConfig::GN { num_groups } = *norm;

        let AnchorGeneratorConfig::AnchorGenerator(AnchorGeneratorParams {
            ref ratios,
            octave_base_scale,
            scales_per_octave,
            ref strides,
            center_offset,
        }) = *anchor_generator;
        let anchor_generator = AnchorGeneratorInit {
            strides: strides.clone(),
            ratios: ratios.iter().map(|r| r.raw()).collect(),
            octave_base_scale: octave_base_scale.raw(),
            scales_per_octave,
            center_offset: center_offset.raw(),
        };

        let ClsLossConfig::QualityFocalLoss(QualityFocalLossParams {
            beta, loss_weight, ..
        }) = *loss_cls;
        let loss_cls = QualityFocalLossInit {
            beta: beta.raw(),
            loss_weight: loss_weight.raw(),
            ..QualityFocalLossInit::default(Reduction::Mean)
        };

        let loss_bbox = BoxLossInit {
            loss_weight: loss_bbox.loss_weight.raw(),
            ..BoxLossInit::default(loss_bbox.kind.metric(), Reduction::Mean)
        };

        let DflLossConfig::DistributionFocalLoss { loss_weight } = *loss_dfl;
        let loss_dfl = DistributionFocalLossInit {
            loss_weight: loss_weight.raw(),
            ..DistributionFocalLossInit::default(Reduction::Mean)
        };

        let TrainConfig {
            ref assigner,
            allowed_border,
            pos_weight,
            debug,
        } = *train_cfg;
        let AssignerConfig::ATSSAssigner { topk } = *assigner;

        Ok(GflHeadInit {
            num_classes,
            in_channels,
            feat_channels,
            stacked_convs,
            reg_max,
            num_groups,
            anchor_generator,
            assigner: AtssAssignerInit {
                topk,
                ..Default::default()
            },
            loss_cls,
            loss_bbox,
            loss_dfl,
            allowed_border: allowed_border.raw(),
            pos_weight: pos_weight.raw(),
            debug,
            test_cfg: test_cfg.clone(),
        })
    }
}

/// Normalization layer options of the conv towers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NormConfig {
    GN { num_groups: usize },
}

impl Default for NormConfig {
    fn default() -> Self {
        Self::GN { num_groups: 32 }
    }
}

mod anchor {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum AnchorGeneratorConfig {
        AnchorGenerator(AnchorGeneratorParams),
    }

    impl AnchorGeneratorConfig {
        pub fn strides(&self) -> &[usize] {
            let Self::AnchorGenerator(params) = self;
            &params.strides
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct AnchorGeneratorParams {
        /// Height to width ratios.
        pub ratios: Vec<R64>,
        pub octave_base_scale: R64,
        pub scales_per_octave: usize,
        /// Feature strides in level order.
        pub strides: Vec<usize>,
        /// Anchor center offset relative to the stride.
        #[serde(default = "default_center_offset")]
        pub center_offset: R64,
    }
}

mod loss {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum ClsLossConfig {
        QualityFocalLoss(QualityFocalLossParams),
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct QualityFocalLossParams {
        #[serde(default = "default_true")]
        pub use_sigmoid: bool,
        #[serde(default = "default_qfl_beta")]
        pub beta: R64,
        #[serde(default = "default_loss_weight")]
        pub loss_weight: R64,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct BboxLossConfig {
        #[serde(rename = "type")]
        pub kind: BboxLossKind,
        #[serde(default = "default_loss_weight")]
        pub loss_weight: R64,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum BboxLossKind {
        IoULoss,
        GIoULoss,
        DIoULoss,
        CIoULoss,
    }

    impl BboxLossKind {
        pub fn metric(&self) -> BoxMetric {
            match self {
                Self::IoULoss => BoxMetric::IoU,
                Self::GIoULoss => BoxMetric::GIoU,
                Self::DIoULoss => BoxMetric::DIoU,
                Self::CIoULoss => BoxMetric::CIoU,
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum DflLossConfig {
        DistributionFocalLoss {
            #[serde(default = "default_dfl_weight")]
            loss_weight: R64,
        },
    }

    impl Default for DflLossConfig {
        fn default() -> Self {
            Self::DistributionFocalLoss {
                loss_weight: default_dfl_weight(),
            }
        }
    }
}

mod training {
    use super::*;

    /// Options used in loss computation.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TrainConfig {
        pub assigner: AssignerConfig,
        /// Anchors crossing the image border by more than this are ignored.
        /// Negative values disable the check.
        #[serde(default = "default_minus_one")]
        pub allowed_border: R64,
        /// Classification weight of positives. Non-positive values keep 1.
        #[serde(default = "default_minus_one")]
        pub pos_weight: R64,
        /// Log assignment summaries at info level.
        #[serde(default)]
        pub debug: bool,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum AssignerConfig {
        ATSSAssigner {
            #[serde(default = "default_topk")]
            topk: usize,
        },
    }

    /// Options used in prediction decoding.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TestConfig {
        /// Candidates kept per level before NMS.
        #[serde(default = "default_nms_pre")]
        pub nms_pre: usize,
        #[serde(default = "default_score_thr")]
        pub score_thr: R64,
        #[serde(default = "default_iou_threshold")]
        pub iou_threshold: R64,
        #[serde(default = "default_max_per_img")]
        pub max_per_img: usize,
    }

    impl Default for TestConfig {
        fn default() -> Self {
            Self {
                nms_pre: default_nms_pre(),
                score_thr: default_score_thr(),
                iou_threshold: default_iou_threshold(),
                max_per_img: default_max_per_img(),
            }
        }
    }
}

fn default_feat_channels() -> usize {
    256
}

fn default_stacked_convs() -> usize {
    4
}

fn default_reg_max() -> usize {
    16
}

fn default_center_offset() -> R64 {
    r64(0.0)
}

fn default_true() -> bool {
    true
}

fn default_qfl_beta() -> R64 {
    r64(2.0)
}

fn default_loss_weight() -> R64 {
    r64(1.0)
}

fn default_dfl_weight() -> R64 {
    r64(0.25)
}

fn default_minus_one() -> R64 {
    r64(-1.0)
}

fn default_topk() -> usize {
    9
}

fn default_nms_pre() -> usize {
    1000
}

fn default_score_thr() -> R64 {
    r64(0.05)
}

fn default_iou_threshold() -> R64 {
    r64(0.6)
}

fn default_max_per_img() -> usize {
    100
}
