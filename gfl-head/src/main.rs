use anyhow::{ensure, Context, Result};
use gfl_head::{prior::inside_flags, Config, GroundTruth, ImageMeta};
use prettytable::{cell, row, Table};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use structopt::StructOpt;
use tch::{nn, Device, Kind, Tensor};

#[derive(Debug, Clone, StructOpt)]
/// Inspect GFL head configurations and losses.
enum Args {
    /// Run the head on random features and print the losses per level.
    Loss {
        /// head configuration file
        #[structopt(long)]
        config_file: PathBuf,
        /// optional ground truth file with `bboxes` and `labels`
        #[structopt(long)]
        gt_file: Option<PathBuf>,
        #[structopt(long, default_value = "256")]
        image_size: usize,
        #[structopt(long, default_value = "0")]
        seed: i64,
    },
    /// Print anchor statistics per level.
    Anchors {
        /// head configuration file
        #[structopt(long)]
        config_file: PathBuf,
        #[structopt(long, default_value = "256")]
        image_size: usize,
    },
}

/// Ground truth of one image in `x1, y1, x2, y2` format.
#[derive(Debug, Clone, Deserialize)]
struct GroundTruthFile {
    bboxes: Vec<[f64; 4]>,
    labels: Vec<usize>,
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    match Args::from_args() {
        Args::Loss {
            config_file,
            gt_file,
            image_size,
            seed,
        } => loss(config_file, gt_file, image_size, seed)?,
        Args::Anchors {
            config_file,
            image_size,
        } => anchors(config_file, image_size)?,
    }

    Ok(())
}

fn loss(
    config_file: impl AsRef<Path>,
    gt_file: Option<impl AsRef<Path>>,
    image_size: usize,
    seed: i64,
) -> Result<()> {
    ensure!(image_size > 0, "image size must be positive");
    let config = Config::load(config_file)?;
    let gt = match gt_file {
        Some(path) => load_ground_truth(path)?,
        None => GroundTruth::empty(),
    };

    tch::manual_seed(seed);
    let device = Device::cuda_if_available();
    let vs = nn::VarStore::new(device);
    let head = config.gfl_head_init()?.build(&vs.root())?;

    let features: Vec<_> = head
        .strides()
        .iter()
        .map(|&stride| {
            let size = ((image_size + stride - 1) / stride) as i64;
            Tensor::rand(
                &[1, config.in_channels as i64, size, size],
                (Kind::Float, device),
            )
        })
        .collect();

    let output = head.forward(&features)?;
    let report = head.loss(&output, &[gt], &[ImageMeta::new(image_size, image_size)])?;
    let values = report.to_values();

    let mut table = Table::new();
    table.add_row(row!["level", "stride", "loss_cls", "loss_bbox", "loss_dfl"]);
    head.strides().iter().enumerate().for_each(|(level, stride)| {
        table.add_row(row![
            level,
            stride,
            format!("{:.6}", values["loss_cls"][level]),
            format!("{:.6}", values["loss_bbox"][level]),
            format!("{:.6}", values["loss_dfl"][level])
        ]);
    });
    table.add_row(row![
        "sum",
        "",
        format!("{:.6}", report.loss_cls_sum().double_value(&[])),
        format!("{:.6}", report.loss_bbox_sum().double_value(&[])),
        format!("{:.6}", report.loss_dfl_sum().double_value(&[]))
    ]);
    table.printstd();

    println!("total loss: {:.6}", report.total().double_value(&[]));
    Ok(())
}

fn anchors(config_file: impl AsRef<Path>, image_size: usize) -> Result<()> {
    ensure!(image_size > 0, "image size must be positive");
    let config = Config::load(config_file)?;
    let generator = config.gfl_head_init()?.anchor_generator.build()?;
    let allowed_border = config.train_cfg.allowed_border.raw();

    let mut table = Table::new();
    table.add_row(row!["level", "stride", "feature size", "anchors", "valid", "inside"]);

    for (level, &stride) in generator.strides().iter().enumerate() {
        let size = (image_size + stride - 1) / stride;
        let anchors = generator.grid_anchors(level, size, size)?;
        let valid = generator.valid_flags(level, [size, size], [image_size, image_size])?;
        let inside = inside_flags(&anchors, &valid, [image_size, image_size], allowed_border);

        table.add_row(row![
            level,
            stride,
            format!("{}x{}", size, size),
            anchors.len(),
            valid.iter().filter(|&&flag| flag).count(),
            inside.iter().filter(|&&flag| flag).count()
        ]);
    }
    table.printstd();

    Ok(())
}

fn load_ground_truth(path: impl AsRef<Path>) -> Result<GroundTruth> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("unable to read ground truth file '{}'", path.display()))?;
    let GroundTruthFile { bboxes, labels } = json5::from_str(&text)
        .with_context(|| format!("unable to parse ground truth file '{}'", path.display()))?;
    GroundTruth::from_xyxy(&bboxes, &labels)
}
