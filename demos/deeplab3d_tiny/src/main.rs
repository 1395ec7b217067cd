#![recursion_limit = "256"]

use anyhow::Context;
use bvmm::models::deeplab::backbone::BackboneMeta;
use bvmm::models::deeplab::deeplab_model::{DeepLabV3, DeepLabV3Config, DeepLabV3Meta};
use bvmm::models::deeplab::kinds::{BackboneKind, OutputActivation};
use burn::backend::NdArray;
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use burn::tensor::{Distribution, ElementConversion};
use clap::Parser;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

// $ --backbone=resnet18_os16 --depth=16 --height=64 --width=64 --num-classes=3
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Random seed for reproducibility.
    #[arg(short, long, default_value = "0")]
    seed: u64,

    /// Load the model config from a JSON file; overrides the model flags.
    #[arg(long)]
    config: Option<String>,

    /// Save the effective model config to a JSON file.
    #[arg(long)]
    save_config: Option<String>,

    /// Backbone variant.
    #[arg(long, default_value = "resnet34_os8")]
    backbone: BackboneKind,

    /// Activation applied to the upsampled class scores: sigmoid or softmax.
    #[arg(long)]
    last_activation: Option<OutputActivation>,

    /// Input channels.
    #[arg(long, default_value_t = 1)]
    in_channels: usize,

    /// Number of output classes.
    #[arg(long, default_value_t = 2)]
    num_classes: usize,

    /// Input volume depth; fixed by the model.
    #[arg(long, default_value_t = 16)]
    depth: usize,

    /// Input volume height.
    #[arg(long, default_value_t = 64)]
    height: usize,

    /// Input volume width.
    #[arg(long, default_value_t = 64)]
    width: usize,

    /// Batch size.
    #[arg(short, long, default_value_t = 1)]
    batch_size: usize,
}

impl Args {
    /// The model config, from `--config` or from the model flags.
    fn model_config(&self) -> anyhow::Result<DeepLabV3Config> {
        let config = match &self.config {
            Some(path) => DeepLabV3Config::load(path)
                .with_context(|| format!("loading model config {path:?}"))?,
            None => DeepLabV3Config::new(self.depth, self.in_channels, self.num_classes)
                .with_backbone(self.backbone)
                .with_last_activation(self.last_activation),
        };
        config.try_validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    type B = NdArray<f32>;

    let device = Default::default();
    backend_main::<B>(&args, &device)
}

/// Build the model and run a forward pass over a random volume.
pub fn backend_main<B: Backend>(
    args: &Args,
    device: &B::Device,
) -> anyhow::Result<()> {
    B::seed(args.seed);

    let config = args.model_config()?;
    if let Some(path) = &args.save_config {
        config
            .save(path)
            .with_context(|| format!("saving model config {path:?}"))?;
        tracing::info!(path = %path, "saved model config");
    }

    let model: DeepLabV3<B> = config.init(device);
    let feature_resolution = model
        .backbone
        .output_resolution([config.depth, args.height, args.width]);
    tracing::info!(
        backbone = %model.backbone_kind(),
        output_stride = model.output_stride(),
        ?feature_resolution,
        num_params = model.num_params(),
        "model ready"
    );

    let input: Tensor<B, 5> = Tensor::random(
        [
            args.batch_size,
            config.in_channels,
            config.depth,
            args.height,
            args.width,
        ],
        Distribution::Normal(0.0, 1.0),
        device,
    );

    let start = Instant::now();
    let output = model.forward(input);
    let elapsed = start.elapsed();

    let mean = output.clone().mean().into_scalar().elem::<f32>();
    tracing::info!(
        shape = ?output.dims(),
        mean,
        ?elapsed,
        "forward"
    );

    Ok(())
}
