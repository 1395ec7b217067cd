//! # `ResNet` Core Model
//!
//! The volumetric `ResNet` classification network:
//! a [`ResNetStem`], four [`LayerBlock`] stages, global average pooling
//! and a linear classifier.
//!
//! | stage    | planes | stride |
//! |----------|--------|--------|
//! | `layer1` | 64     | 1      |
//! | `layer2` | 128    | 2      |
//! | `layer3` | 256    | 2      |
//! | `layer4` | 512    | 2      |

use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::pool::GlobalAvgPool3d;
use crate::models::resnet::layer_block::{LayerBlock, LayerBlockConfig, LayerBlockMeta};
use crate::models::resnet::residual_block::ResidualBlockConfig;
use crate::models::resnet::stems::{ResNetStem, ResNetStemConfig, ResNetStemMeta};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::{Backend, Tensor};

/// `ResNet-18` stage depths.
pub const RESNET18_BLOCKS: [usize; 4] = [2, 2, 2, 2];
/// `ResNet-34` stage depths.
pub const RESNET34_BLOCKS: [usize; 4] = [3, 4, 6, 3];
/// `ResNet-50` stage depths.
pub const RESNET50_BLOCKS: [usize; 4] = [3, 4, 6, 3];
/// `ResNet-101` stage depths.
pub const RESNET101_BLOCKS: [usize; 4] = [3, 4, 23, 3];
/// `ResNet-152` stage depths.
pub const RESNET152_BLOCKS: [usize; 4] = [3, 8, 36, 3];

/// Stage widths (pre-expansion).
pub const STAGE_PLANES: [usize; 4] = [64, 128, 256, 512];

/// Stage strides.
pub const STAGE_STRIDES: [usize; 4] = [1, 2, 2, 2];

/// Look up the stage depths and block kind of a standard `ResNet`.
///
/// # Returns
///
/// ``(blocks, bottleneck)``, or an error for an unknown depth.
pub fn resnet_blocks(num_layers: usize) -> Result<([usize; 4], bool), String> {
    match num_layers {
        18 => Ok((RESNET18_BLOCKS, false)),
        34 => Ok((RESNET34_BLOCKS, false)),
        50 => Ok((RESNET50_BLOCKS, true)),
        101 => Ok((RESNET101_BLOCKS, true)),
        152 => Ok((RESNET152_BLOCKS, true)),
        _ => Err(format!(
            "num_layers must be in {{18, 34, 50, 101, 152}}: {num_layers}"
        )),
    }
}

/// Build the four standard stage configs.
pub fn standard_stages(
    blocks: [usize; 4],
    bottleneck: bool,
    in_planes: usize,
) -> Vec<LayerBlockConfig> {
    let expansion = ResidualBlockConfig::expansion(bottleneck);
    let mut in_planes = in_planes;
    let mut stages = Vec::with_capacity(4);
    for ((num_blocks, planes), stride) in blocks.into_iter().zip(STAGE_PLANES).zip(STAGE_STRIDES) {
        stages.push(LayerBlockConfig::build(
            num_blocks, in_planes, planes, stride, 1, bottleneck,
        ));
        in_planes = planes * expansion;
    }
    stages
}

/// [`ResNet`] Meta API.
pub trait ResNetMeta {
    /// Input channels.
    fn in_channels(&self) -> usize;

    /// Channels of the final feature map.
    fn feature_channels(&self) -> usize;

    /// Number of output classes.
    fn num_classes(&self) -> usize;

    /// Predict the ``[depth, height, width]`` resolution of the final feature map.
    fn feature_resolution(
        &self,
        input_resolution: [usize; 3],
    ) -> [usize; 3];
}

/// [`ResNet`] Config.
#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// The input stem.
    pub stem: ResNetStemConfig,

    /// The residual stages.
    pub layers: Vec<LayerBlockConfig>,

    /// Number of output classes.
    #[config(default = 1)]
    pub num_classes: usize,

    /// Zero the last norm scale of every residual branch at init.
    #[config(default = false)]
    pub zero_init_residual: bool,
}

impl ResNetMeta for ResNetConfig {
    fn in_channels(&self) -> usize {
        self.stem.in_channels
    }

    fn feature_channels(&self) -> usize {
        match self.layers.last() {
            Some(layer) => layer.out_planes(),
            None => self.stem.out_channels,
        }
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn feature_resolution(
        &self,
        input_resolution: [usize; 3],
    ) -> [usize; 3] {
        self.layers.iter().fold(
            self.stem.output_resolution(input_resolution),
            |res, layer| layer.output_resolution(res),
        )
    }
}

impl ResNetConfig {
    /// Build a standard `ResNet` config.
    ///
    /// # Arguments
    ///
    /// - `blocks`: the depth of each of the four stages.
    /// - `bottleneck`: use bottleneck blocks.
    /// - `in_channels`: input channels.
    pub fn build(
        blocks: [usize; 4],
        bottleneck: bool,
        in_channels: usize,
    ) -> Self {
        let stem = ResNetStemConfig::new(in_channels);
        let layers = standard_stages(blocks, bottleneck, stem.out_channels);
        Self::new(stem, layers)
    }

    /// Build a standard `ResNet` config by depth.
    ///
    /// # Arguments
    ///
    /// - `num_layers`: one of 18, 34, 50, 101, 152.
    /// - `in_channels`: input channels.
    pub fn try_from_depth(
        num_layers: usize,
        in_channels: usize,
    ) -> Result<Self, String> {
        let (blocks, bottleneck) = resnet_blocks(num_layers)?;
        Ok(Self::build(blocks, bottleneck, in_channels))
    }

    /// `ResNet-18`.
    pub fn resnet18(in_channels: usize) -> Self {
        Self::build(RESNET18_BLOCKS, false, in_channels)
    }

    /// `ResNet-34`.
    pub fn resnet34(in_channels: usize) -> Self {
        Self::build(RESNET34_BLOCKS, false, in_channels)
    }

    /// `ResNet-50`.
    pub fn resnet50(in_channels: usize) -> Self {
        Self::build(RESNET50_BLOCKS, true, in_channels)
    }

    /// `ResNet-101`.
    pub fn resnet101(in_channels: usize) -> Self {
        Self::build(RESNET101_BLOCKS, true, in_channels)
    }

    /// `ResNet-152`.
    pub fn resnet152(in_channels: usize) -> Self {
        Self::build(RESNET152_BLOCKS, true, in_channels)
    }

    /// Set the normalization config of the stem and every block.
    pub fn with_normalization(
        self,
        normalization: NormalizationConfig,
    ) -> Self {
        Self {
            stem: self.stem.with_normalization(normalization.clone()),
            layers: self
                .layers
                .into_iter()
                .map(|layer| layer.with_normalization(normalization.clone()))
                .collect(),
            ..self
        }
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.layers.is_empty() {
            return Err("layers is empty".to_string());
        }
        let mut planes = self.stem.out_channels;
        for (idx, layer) in self.layers.iter().enumerate() {
            layer
                .try_validate()
                .map_err(|err| format!("layers[{idx}]: {err}"))?;
            if layer.in_planes() != planes {
                return Err(format!(
                    "layers[{idx}].in_planes({}) != {planes}",
                    layer.in_planes()
                ));
            }
            planes = layer.out_planes();
        }
        if self.num_classes == 0 {
            return Err("num_classes must be > 0".to_string());
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{err}");
        }
    }

    /// Initialize a [`ResNet`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ResNet<B> {
        self.expect_valid();

        let feature_channels = self.feature_channels();

        let mut layers: Vec<LayerBlock<B>> = self
            .layers
            .into_iter()
            .map(|layer| layer.init(device))
            .collect();
        if self.zero_init_residual {
            layers.iter_mut().for_each(|layer| layer.zero_init_residual());
        }

        ResNet {
            stem: self.stem.init(device),
            layers,
            avgpool: GlobalAvgPool3d::new(),
            fc: LinearConfig::new(feature_channels, self.num_classes).init(device),
        }
    }
}

/// `ResNet` model.
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    /// Input stem.
    pub stem: ResNetStem<B>,

    /// Residual stages.
    pub layers: Vec<LayerBlock<B>>,

    /// Global pooling.
    pub avgpool: GlobalAvgPool3d,

    /// Classifier.
    pub fc: Linear<B>,
}

impl<B: Backend> ResNetMeta for ResNet<B> {
    fn in_channels(&self) -> usize {
        self.stem.in_channels()
    }

    fn feature_channels(&self) -> usize {
        match self.layers.last() {
            Some(layer) => layer.out_planes(),
            None => self.stem.out_channels(),
        }
    }

    fn num_classes(&self) -> usize {
        self.fc.weight.shape().dims[1]
    }

    fn feature_resolution(
        &self,
        input_resolution: [usize; 3],
    ) -> [usize; 3] {
        self.layers.iter().fold(
            self.stem.output_resolution(input_resolution),
            |res, layer| layer.output_resolution(res),
        )
    }
}

impl<B: Backend> ResNet<B> {
    /// Apply the stem and the residual stages.
    ///
    /// # Returns
    ///
    /// ``[batch, feature_channels, out_depth, out_height, out_width]``
    pub fn forward_features(
        &self,
        input: Tensor<B, 5>,
    ) -> Tensor<B, 5> {
        let x = self.stem.forward(input);
        self.layers.iter().fold(x, |x, layer| layer.forward(x))
    }

    /// `ResNet` forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, depth, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes]`` logits.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn forward(
        &self,
        input: Tensor<B, 5>,
    ) -> Tensor<B, 2> {
        let [batch] = unpack_shape_contract!(
            ["batch", "in_channels", "depth", "height", "width"],
            &input,
            &["batch"],
            &[("in_channels", self.in_channels())],
        );

        let x = self.forward_features(input);

        // [B, C, 1, 1, 1] -> [B, C]
        let x = self.avgpool.forward(x).flatten::<2>(1, 4);
        let x = self.fc.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "num_classes"],
            &x,
            &[("batch", batch), ("num_classes", self.num_classes())],
        );
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::normalization_wrapper::Normalization;
    use crate::models::resnet::residual_block::ResidualBlock;
    use burn::backend::NdArray;

    #[test]
    fn test_resnet_blocks() {
        assert_eq!(resnet_blocks(18), Ok((RESNET18_BLOCKS, false)));
        assert_eq!(resnet_blocks(101), Ok((RESNET101_BLOCKS, true)));
        assert!(resnet_blocks(20).is_err());
    }

    #[test]
    fn test_resnet_config() {
        let config = ResNetConfig::resnet34(1);
        assert!(config.try_validate().is_ok());
        assert_eq!(config.in_channels(), 1);
        assert_eq!(config.feature_channels(), 512);
        assert_eq!(config.num_classes(), 1);
        let depths: Vec<usize> = config.layers.iter().map(|l| l.len()).collect();
        assert_eq!(depths, vec![3, 4, 6, 3]);
        assert_eq!(config.feature_resolution([64, 64, 32]), [2, 2, 1]);

        let config = ResNetConfig::resnet152(3);
        assert!(config.try_validate().is_ok());
        assert_eq!(config.feature_channels(), 2048);
        let planes: Vec<usize> = config.layers.iter().map(|l| l.out_planes()).collect();
        assert_eq!(planes, vec![256, 512, 1024, 2048]);

        assert!(ResNetConfig::try_from_depth(50, 1).is_ok());
        assert!(ResNetConfig::try_from_depth(42, 1).is_err());
    }

    #[test]
    fn test_resnet_validate() {
        let mut config = ResNetConfig::resnet18(1);
        config.layers.swap(1, 2);
        let err = config.try_validate().unwrap_err();
        assert_eq!(err, "layers[1].in_planes(128) != 64");

        let config = ResNetConfig::resnet18(1).with_num_classes(0);
        assert_eq!(
            config.try_validate(),
            Err("num_classes must be > 0".to_string())
        );
    }

    #[test]
    fn test_resnet_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let model: ResNet<B> = ResNetConfig::resnet18(1)
            .with_num_classes(3)
            .init(&device);
        assert_eq!(model.in_channels(), 1);
        assert_eq!(model.num_classes(), 3);

        let output = model.forward(Tensor::ones([2, 1, 16, 16, 16], &device));
        assert_eq!(output.dims(), [2, 3]);
    }

    #[test]
    fn test_zero_init_residual() {
        type B = NdArray<f32>;
        let device = Default::default();

        let model: ResNet<B> = ResNetConfig::resnet18(1)
            .with_zero_init_residual(true)
            .init(&device);

        for layer in &model.layers {
            for block in &layer.blocks {
                let gamma = match block {
                    ResidualBlock::Basic(block) => match &block.cna2.norm {
                        Normalization::Batch(norm) => norm.gamma.val(),
                        _ => unreachable!(),
                    },
                    ResidualBlock::Bottleneck(_) => unreachable!(),
                };
                gamma
                    .clone()
                    .to_data()
                    .assert_eq(&gamma.zeros_like().to_data(), true);
            }
        }
    }

    #[test]
    fn test_with_normalization() {
        type B = NdArray<f32>;
        let device = Default::default();

        let model: ResNet<B> = ResNetConfig::resnet18(1)
            .with_normalization(burn::nn::GroupNormConfig::new(8, 0).into())
            .init(&device);

        assert!(matches!(model.stem.cna.norm, Normalization::Group(_)));
        for layer in &model.layers {
            for block in &layer.blocks {
                match block {
                    ResidualBlock::Basic(block) => {
                        assert!(matches!(block.cna1.norm, Normalization::Group(_)));
                        assert!(matches!(block.cna2.norm, Normalization::Group(_)));
                    }
                    ResidualBlock::Bottleneck(_) => unreachable!(),
                }
            }
        }

        let output = model.forward(Tensor::ones([1, 1, 16, 16, 16], &device));
        assert_eq!(output.dims(), [1, 1]);
    }
}
