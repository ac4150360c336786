use anyhow::Result;
use gfl_head::{Config, GflError, GflHead, GroundTruth, HeadOutput, ImageMeta};
use noisy_float::prelude::*;
use std::path::{Path, PathBuf};
use tch::{nn, Device, Kind, Tensor};

/// Losses above this value count as non-zero.
const NONZERO_EPS: f64 = 1e-6;
const IMAGE_SIZE: usize = 256;

lazy_static::lazy_static! {
    static ref CONFIG_DIR: PathBuf = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("cfg");
    static ref HEAD_CONFIG_FILE: PathBuf = CONFIG_DIR.join("gfl_head.json5");
    static ref UNKNOWN_LOSS_CONFIG_FILE: PathBuf = CONFIG_DIR.join("unknown_loss.json5");
}

fn load_config() -> Result<Config> {
    Config::load(&*HEAD_CONFIG_FILE)
}

fn build_head(config: &Config, vs: &nn::VarStore) -> Result<GflHead> {
    config.gfl_head_init()?.build(&vs.root())
}

/// Feature maps of 256 / {4, 8, 16, 32, 64} pixels with one channel.
fn pyramid_features(batch: i64) -> Vec<Tensor> {
    [4, 8, 16, 32, 64]
        .iter()
        .map(|&div| {
            let size = IMAGE_SIZE as i64 / div;
            Tensor::rand(&[batch, 1, size, size], (Kind::Float, Device::Cpu))
        })
        .collect()
}

fn wide_box_gt() -> Result<GroundTruth> {
    GroundTruth::from_xyxy(&[[23.6667, 23.8757, 238.6326, 151.8874]], &[2])
}

fn square_meta() -> ImageMeta {
    ImageMeta::new(IMAGE_SIZE, IMAGE_SIZE)
}

fn is_shape_error<T>(result: Result<T>) -> bool {
    matches!(
        result.map_err(|err| err.downcast::<GflError>()),
        Err(Ok(GflError::Shape(_)))
    )
}

#[test]
fn empty_ground_truth_loss() -> Result<()> {
    tch::manual_seed(0);
    let vs = nn::VarStore::new(Device::Cpu);
    let head = build_head(&load_config()?, &vs)?;

    let output = head.forward(&pyramid_features(1))?;
    let report = head.loss(&output, &[GroundTruth::empty()], &[square_meta()])?;

    assert_eq!(report.num_levels(), 5);
    assert!(report.loss_cls_sum().double_value(&[]) > NONZERO_EPS);
    assert_eq!(report.loss_bbox_sum().double_value(&[]), 0.0);
    assert_eq!(report.loss_dfl_sum().double_value(&[]), 0.0);
    Ok(())
}

#[test]
fn one_ground_truth_loss() -> Result<()> {
    tch::manual_seed(0);
    let vs = nn::VarStore::new(Device::Cpu);
    let head = build_head(&load_config()?, &vs)?;

    let output = head.forward(&pyramid_features(1))?;
    let report = head.loss(&output, &[wide_box_gt()?], &[square_meta()])?;

    assert_eq!(report.num_levels(), 5);
    assert!(report.loss_cls_sum().double_value(&[]) > NONZERO_EPS);
    assert!(report.loss_bbox_sum().double_value(&[]) > NONZERO_EPS);
    assert!(report.loss_dfl_sum().double_value(&[]) > NONZERO_EPS);

    let values = report.to_values();
    assert_eq!(
        values.keys().copied().collect::<Vec<_>>(),
        vec!["loss_cls", "loss_bbox", "loss_dfl"]
    );
    assert!(values.values().all(|levels| levels.len() == 5));
    Ok(())
}

#[test]
fn losses_are_deterministic() -> Result<()> {
    let config = load_config()?;

    let run = || -> Result<Vec<Vec<f64>>> {
        tch::manual_seed(7);
        let vs = nn::VarStore::new(Device::Cpu);
        let head = build_head(&config, &vs)?;
        let output = head.forward(&pyramid_features(1))?;
        let report = head.loss(&output, &[wide_box_gt()?], &[square_meta()])?;
        Ok(report.to_values().into_iter().map(|(_, values)| values).collect())
    };

    let first = run()?;
    let second = run()?;
    for (lhs, rhs) in first.iter().flatten().zip(second.iter().flatten()) {
        approx::assert_abs_diff_eq!(lhs, rhs, epsilon = 1e-6);
    }
    Ok(())
}

#[test]
fn loss_gradient_reaches_parameters() -> Result<()> {
    tch::manual_seed(0);
    let vs = nn::VarStore::new(Device::Cpu);
    let head = build_head(&load_config()?, &vs)?;

    let output = head.forward(&pyramid_features(1))?;
    let report = head.loss(&output, &[wide_box_gt()?], &[square_meta()])?;
    report.total().backward();

    let has_grad = vs.trainable_variables().iter().any(|var| {
        let grad = var.grad();
        grad.defined() && grad.abs().sum(Kind::Float).double_value(&[]) > 0.0
    });
    assert!(has_grad);
    Ok(())
}

#[test]
fn batch_keeps_images_apart() -> Result<()> {
    tch::manual_seed(0);
    let vs = nn::VarStore::new(Device::Cpu);
    let head = build_head(&load_config()?, &vs)?;

    let output = head.forward(&pyramid_features(2))?;
    let report = head.loss(
        &output,
        &[GroundTruth::empty(), wide_box_gt()?],
        &[square_meta(), square_meta()],
    )?;
    assert!(report.loss_bbox_sum().double_value(&[]) > NONZERO_EPS);

    let targets = head.get_targets(
        &output.feat_sizes(),
        &[GroundTruth::empty(), wide_box_gt()?],
        &[square_meta(), square_meta()],
    )?;
    assert_eq!(targets.num_pos_per_image[0], 0);
    assert!(targets.num_pos_per_image[1] > 0);
    // the empty image still counts as one
    assert_eq!(
        targets.num_total_pos,
        1.0 + targets.num_pos_per_image[1] as f64
    );
    Ok(())
}

#[test]
fn allowed_border_excludes_crossing_anchors() -> Result<()> {
    let mut config = load_config()?;
    let features = pyramid_features(1);
    let feat_sizes: Vec<_> = features
        .iter()
        .map(|feature| {
            let size = feature.size();
            [size[2] as usize, size[3] as usize]
        })
        .collect();

    let weight_sum = |config: &Config| -> Result<f64> {
        let vs = nn::VarStore::new(Device::Cpu);
        let head = build_head(config, &vs)?;
        let targets = head.get_targets(&feat_sizes, &[wide_box_gt()?], &[square_meta()])?;
        Ok(targets.levels[4].label_weights.sum(Kind::Float).double_value(&[]))
    };

    // the valid 2x2 anchors of the last level are 1024 pixels wide
    assert_eq!(weight_sum(&config)?, 4.0);
    config.train_cfg.allowed_border = r64(0.0);
    assert_eq!(weight_sum(&config)?, 0.0);
    Ok(())
}

#[test]
fn positive_weight_replaces_label_weights() -> Result<()> {
    let mut config = load_config()?;
    config.train_cfg.pos_weight = r64(3.0);

    let vs = nn::VarStore::new(Device::Cpu);
    let head = build_head(&config, &vs)?;
    let output = head.forward(&pyramid_features(1))?;
    let targets = head.get_targets(&output.feat_sizes(), &[wide_box_gt()?], &[square_meta()])?;

    let num_pos = targets.num_pos_per_image[0] as f64;
    let num_valid: f64 = targets
        .levels
        .iter()
        .map(|level| level.label_weights.gt(0.0).sum(Kind::Float).double_value(&[]))
        .sum();
    let weight_sum: f64 = targets
        .levels
        .iter()
        .map(|level| level.label_weights.sum(Kind::Float).double_value(&[]))
        .sum();
    assert!(num_pos > 0.0);
    approx::assert_abs_diff_eq!(weight_sum, num_valid + 2.0 * num_pos, epsilon = 1e-3);
    Ok(())
}

#[test]
fn malformed_inputs_are_shape_errors() -> Result<()> {
    tch::manual_seed(0);
    let vs = nn::VarStore::new(Device::Cpu);
    let head = build_head(&load_config()?, &vs)?;
    let output = head.forward(&pyramid_features(1))?;

    // missing level
    let truncated = HeadOutput {
        cls_scores: output.cls_scores[..4].iter().map(|t| t.shallow_clone()).collect(),
        bbox_preds: output.bbox_preds[..4].iter().map(|t| t.shallow_clone()).collect(),
    };
    assert!(is_shape_error(head.loss(&truncated, &[GroundTruth::empty()], &[square_meta()])));

    // wrong class channels
    let mut cls_scores: Vec<_> = output.cls_scores.iter().map(|t| t.shallow_clone()).collect();
    cls_scores[1] = Tensor::zeros(&[1, 3, 32, 32], (Kind::Float, Device::Cpu));
    let wrong_channels = HeadOutput {
        cls_scores,
        bbox_preds: output.bbox_preds.iter().map(|t| t.shallow_clone()).collect(),
    };
    assert!(is_shape_error(head.loss(&wrong_channels, &[GroundTruth::empty()], &[square_meta()])));

    // ground truth count differs from the batch size
    assert!(is_shape_error(head.loss(
        &output,
        &[GroundTruth::empty(), GroundTruth::empty()],
        &[square_meta()]
    )));

    // label out of range
    let gt = GroundTruth::from_xyxy(&[[0.0, 0.0, 10.0, 10.0]], &[4])?;
    assert!(is_shape_error(head.loss(&output, &[gt], &[square_meta()])));

    assert!(is_shape_error(head.predict(&truncated, &[square_meta()], false)));
    Ok(())
}

#[test]
fn image_without_inside_anchor_is_shape_error() -> Result<()> {
    let mut config = load_config()?;
    config.train_cfg.allowed_border = r64(0.0);

    tch::manual_seed(0);
    let vs = nn::VarStore::new(Device::Cpu);
    let head = build_head(&config, &vs)?;
    let output = head.forward(&pyramid_features(1))?;

    // the only valid anchor of each level starts left of a 4x4 image
    let tiny_meta = ImageMeta::new(4, 4);
    assert!(is_shape_error(head.loss(
        &output,
        &[GroundTruth::empty()],
        &[tiny_meta]
    )));
    Ok(())
}

#[test]
fn unknown_loss_type_is_configuration_error() {
    let err = Config::load(&*UNKNOWN_LOSS_CONFIG_FILE).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<GflError>(),
        Some(GflError::Configuration(_))
    ));
}

#[test]
fn predictions_stay_inside_image() -> Result<()> {
    let mut config = load_config()?;
    config.test_cfg.score_thr = r64(0.0);
    config.test_cfg.max_per_img = 10;

    tch::manual_seed(0);
    let vs = nn::VarStore::new(Device::Cpu);
    let head = build_head(&config, &vs)?;
    let output = head.forward(&pyramid_features(1))?;

    let detections = head.predict(&output, &[square_meta()], false)?;
    assert_eq!(detections.len(), 1);
    let detections = &detections[0];
    assert!(!detections.is_empty() && detections.len() <= 10);
    for bbox in &detections.bboxes {
        let [x1, y1, x2, y2] = bbox_xyxy(bbox);
        assert!(0.0 <= x1 && x1 <= x2 && x2 <= IMAGE_SIZE as f64);
        assert!(0.0 <= y1 && y1 <= y2 && y2 <= IMAGE_SIZE as f64);
        assert!(bbox.class < 4);
    }
    assert!(detections
        .bboxes
        .windows(2)
        .all(|pair| pair[0].score >= pair[1].score));

    // boxes map back to an image half the size
    let meta = ImageMeta {
        scale_factor: [2.0, 2.0],
        ..square_meta()
    };
    let rescaled = head.predict(&output, &[meta], true)?;
    for bbox in &rescaled[0].bboxes {
        let [_, _, x2, y2] = bbox_xyxy(bbox);
        assert!(x2 <= IMAGE_SIZE as f64 / 2.0 && y2 <= IMAGE_SIZE as f64 / 2.0);
    }
    Ok(())
}

fn bbox_xyxy(bbox: &bbox::ScoredBox<f64>) -> [f64; 4] {
    use bbox::prelude::*;
    bbox.rect.xyxy()
}
