//! # Output-Stride Constrained Backbones
//!
//! A standard `ResNet` reduces resolution by 32. A [`Backbone`] keeps the stem
//! and the first stages of a `ResNet`, then appends dilated stages with stride 1,
//! so the feature map is reduced by 16 or 8 while the receptive field keeps growing.
//!
//! | family            | kept stages        | appended stages                                   | channels | OS |
//! |-------------------|--------------------|---------------------------------------------------|----------|----|
//! | basic, OS 16      | `layer1..=layer3`  | basic `256 -> 512`, dilation 2                    | 512      | 16 |
//! | bottleneck, OS 16 | `layer1..=layer3`  | bottleneck `1024 -> 2048`, 3 blocks, dilation 2   | 2048     | 16 |
//! | basic, OS 8       | `layer1..=layer2`  | basic `128 -> 256`, dilation 2; `256 -> 512`, dilation 4 | 512 | 8 |
//!
//! Kept stages use the Kaiming fan-out initialization of the classification network;
//! appended stages use the default conv initializer.

use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::models::deeplab::kinds::BackboneKind;
use crate::models::resnet::layer_block::{LayerBlock, LayerBlockConfig, LayerBlockMeta};
use crate::models::resnet::resnet_model::{
    RESNET18_BLOCKS, RESNET34_BLOCKS, resnet_blocks, standard_stages,
};
use crate::models::resnet::stems::{ResNetStem, ResNetStemConfig, ResNetStemMeta};
use crate::models::resnet::util::CONV_DEFAULT_INITIALIZER;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};

/// Reduction of the `ResNet` stem.
pub const STEM_STRIDE: usize = 4;

/// [`Backbone`] Meta API.
pub trait BackboneMeta {
    /// Input channels.
    fn in_channels(&self) -> usize;

    /// Feature map channels.
    fn out_channels(&self) -> usize;

    /// Ratio of input to feature map resolution, for inputs divisible by it.
    fn output_stride(&self) -> usize;

    /// Predict the ``[depth, height, width]`` feature map resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 3],
    ) -> [usize; 3];
}

/// [`Backbone`] Config.
#[derive(Config, Debug)]
pub struct BackboneConfig {
    /// The input stem.
    pub stem: ResNetStemConfig,

    /// The residual stages; kept stages first, then appended dilated stages.
    pub layers: Vec<LayerBlockConfig>,
}

impl BackboneMeta for BackboneConfig {
    fn in_channels(&self) -> usize {
        self.stem.in_channels
    }

    fn out_channels(&self) -> usize {
        match self.layers.last() {
            Some(layer) => layer.out_planes(),
            None => self.stem.out_channels,
        }
    }

    fn output_stride(&self) -> usize {
        self.layers
            .iter()
            .fold(STEM_STRIDE, |acc, layer| acc * layer.stride())
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 3],
    ) -> [usize; 3] {
        self.layers.iter().fold(
            self.stem.output_resolution(input_resolution),
            |res, layer| layer.output_resolution(res),
        )
    }
}

impl BackboneConfig {
    /// Basic-block backbone with output stride 16.
    ///
    /// # Arguments
    ///
    /// - `num_layers`: 18 or 34.
    /// - `in_channels`: input channels.
    pub fn basic_os16(
        num_layers: usize,
        in_channels: usize,
    ) -> Result<Self, String> {
        let (blocks, layer5_blocks) = match num_layers {
            18 => (RESNET18_BLOCKS, 2),
            34 => (RESNET34_BLOCKS, 3),
            _ => return Err("num_layers must be in {18, 34}".to_string()),
        };

        let stem = ResNetStemConfig::new(in_channels);
        let mut layers = standard_stages(blocks, false, stem.out_channels);
        layers.truncate(3);
        layers.push(appended_stage(layer5_blocks, 256, 512, 2, false));

        Ok(Self::new(stem, layers))
    }

    /// Bottleneck backbone with output stride 16.
    ///
    /// # Arguments
    ///
    /// - `num_layers`: 50, 101 or 152.
    /// - `in_channels`: input channels.
    pub fn bottleneck_os16(
        num_layers: usize,
        in_channels: usize,
    ) -> Result<Self, String> {
        let blocks = match num_layers {
            50 | 101 | 152 => resnet_blocks(num_layers)?.0,
            _ => return Err("num_layers must be in {50, 101, 152}".to_string()),
        };

        let stem = ResNetStemConfig::new(in_channels);
        let mut layers = standard_stages(blocks, true, stem.out_channels);
        layers.truncate(3);
        layers.push(appended_stage(3, 4 * 256, 512, 2, true));

        Ok(Self::new(stem, layers))
    }

    /// Basic-block backbone with output stride 8.
    ///
    /// # Arguments
    ///
    /// - `num_layers`: 18 or 34.
    /// - `in_channels`: input channels.
    pub fn basic_os8(
        num_layers: usize,
        in_channels: usize,
    ) -> Result<Self, String> {
        let (blocks, layer4_blocks, layer5_blocks) = match num_layers {
            18 => (RESNET18_BLOCKS, 2, 2),
            34 => (RESNET34_BLOCKS, 6, 3),
            _ => return Err("num_layers must be in {18, 34}".to_string()),
        };

        let stem = ResNetStemConfig::new(in_channels);
        let mut layers = standard_stages(blocks, false, stem.out_channels);
        layers.truncate(2);
        layers.push(appended_stage(layer4_blocks, 128, 256, 2, false));
        layers.push(appended_stage(layer5_blocks, 256, 512, 4, false));

        Ok(Self::new(stem, layers))
    }

    /// Build the backbone for a named variant.
    pub fn from_kind(
        kind: BackboneKind,
        in_channels: usize,
    ) -> Self {
        let config = match kind {
            BackboneKind::ResNet18Os16 | BackboneKind::ResNet34Os16 => {
                Self::basic_os16(kind.num_layers(), in_channels)
            }
            BackboneKind::ResNet50Os16
            | BackboneKind::ResNet101Os16
            | BackboneKind::ResNet152Os16 => Self::bottleneck_os16(kind.num_layers(), in_channels),
            BackboneKind::ResNet18Os8 | BackboneKind::ResNet34Os8 => {
                Self::basic_os8(kind.num_layers(), in_channels)
            }
        };
        match config {
            Ok(config) => config,
            // Every kind names a depth its family supports.
            Err(err) => unreachable!("{kind}: {err}"),
        }
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
        }
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
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
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{err}");
        }
    }

    /// Initialize a [`Backbone`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> Backbone<B> {
        self.expect_valid();

        Backbone {
            stem: self.stem.init(device),
            layers: self
                .layers
                .into_iter()
                .map(|layer| layer.init(device))
                .collect(),
        }
    }
}

/// A stride 1 dilated stage, with the default conv initializer.
fn appended_stage(
    num_blocks: usize,
    in_planes: usize,
    planes: usize,
    dilation: usize,
    bottleneck: bool,
) -> LayerBlockConfig {
    LayerBlockConfig::build(num_blocks, in_planes, planes, 1, dilation, bottleneck)
        .with_initializer(CONV_DEFAULT_INITIALIZER.clone())
}

/// Output-stride constrained `ResNet` feature extractor.
#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    /// Input stem.
    pub stem: ResNetStem<B>,

    /// Residual stages.
    pub layers: Vec<LayerBlock<B>>,
}

impl<B: Backend> BackboneMeta for Backbone<B> {
    fn in_channels(&self) -> usize {
        self.stem.in_channels()
    }

    fn out_channels(&self) -> usize {
        match self.layers.last() {
            Some(layer) => layer.out_planes(),
            None => self.stem.out_channels(),
        }
    }

    fn output_stride(&self) -> usize {
        self.layers
            .iter()
            .fold(STEM_STRIDE, |acc, layer| acc * layer.stride())
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 3],
    ) -> [usize; 3] {
        self.layers.iter().fold(
            self.stem.output_resolution(input_resolution),
            |res, layer| layer.output_resolution(res),
        )
    }
}

impl<B: Backend> Backbone<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, depth, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_depth, out_height, out_width]``
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn forward(
        &self,
        input: Tensor<B, 5>,
    ) -> Tensor<B, 5> {
        let [batch, depth, height, width] = unpack_shape_contract!(
            ["batch", "in_channels", "depth", "height", "width"],
            &input,
            &["batch", "depth", "height", "width"],
            &[("in_channels", self.in_channels())],
        );

        let x = self.stem.forward(input);
        let x = self.layers.iter().fold(x, |x, layer| layer.forward(x));

        let [out_depth, out_height, out_width] = self.output_resolution([depth, height, width]);
        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_depth", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_depth", out_depth),
                ("out_height", out_height),
                ("out_width", out_width),
            ],
        );

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::resnet::residual_block::{ResidualBlockConfig, ResidualBlockMeta};
    use crate::models::resnet::util::CONV_INTO_RELU_INITIALIZER;
    use burn::backend::NdArray;
    use burn::nn::{Initializer, InstanceNormConfig};

    fn depths(config: &BackboneConfig) -> Vec<usize> {
        config.layers.iter().map(|layer| layer.len()).collect()
    }

    fn first_initializer(layer: &LayerBlockConfig) -> Initializer {
        match &layer.blocks[0] {
            ResidualBlockConfig::Basic(block) => block.initializer.clone(),
            ResidualBlockConfig::Bottleneck(block) => block.initializer.clone(),
        }
    }

    #[test]
    fn test_basic_os16() {
        let config = BackboneConfig::basic_os16(18, 1).unwrap();
        assert_eq!(depths(&config), vec![2, 2, 2, 2]);
        assert_eq!(config.out_channels(), 512);
        assert_eq!(config.output_stride(), 16);
        assert_eq!(config.output_resolution([32, 32, 16]), [2, 2, 1]);
        assert!(config.try_validate().is_ok());

        let layer5 = &config.layers[3];
        assert_eq!(layer5.in_planes(), 256);
        assert_eq!(layer5.stride(), 1);
        for block in &layer5.blocks {
            assert_eq!(block.dilation(), 2);
        }
        assert_eq!(
            format!("{:?}", first_initializer(layer5)),
            format!("{:?}", CONV_DEFAULT_INITIALIZER)
        );
        assert_eq!(
            format!("{:?}", first_initializer(&config.layers[0])),
            format!("{:?}", CONV_INTO_RELU_INITIALIZER)
        );

        let config = BackboneConfig::basic_os16(34, 1).unwrap();
        assert_eq!(depths(&config), vec![3, 4, 6, 3]);

        assert_eq!(
            BackboneConfig::basic_os16(50, 1).unwrap_err(),
            "num_layers must be in {18, 34}"
        );
    }

    #[test]
    fn test_bottleneck_os16() {
        let config = BackboneConfig::bottleneck_os16(101, 1).unwrap();
        assert_eq!(depths(&config), vec![3, 4, 23, 3]);
        assert_eq!(config.out_channels(), 2048);
        assert_eq!(config.output_stride(), 16);
        assert_eq!(config.layers[3].in_planes(), 1024);
        assert!(config.try_validate().is_ok());

        let config = BackboneConfig::bottleneck_os16(152, 1).unwrap();
        assert_eq!(depths(&config), vec![3, 8, 36, 3]);

        assert_eq!(
            BackboneConfig::bottleneck_os16(34, 1).unwrap_err(),
            "num_layers must be in {50, 101, 152}"
        );
    }

    #[test]
    fn test_basic_os8() {
        let config = BackboneConfig::basic_os8(34, 1).unwrap();
        assert_eq!(depths(&config), vec![3, 4, 6, 3]);
        assert_eq!(config.out_channels(), 512);
        assert_eq!(config.output_stride(), 8);
        assert_eq!(config.output_resolution([32, 32, 16]), [4, 4, 2]);
        assert!(config.try_validate().is_ok());

        let dilations: Vec<usize> = config
            .layers
            .iter()
            .map(|layer| layer.blocks[0].dilation())
            .collect();
        assert_eq!(dilations, vec![1, 1, 2, 4]);

        let config = BackboneConfig::basic_os8(18, 1).unwrap();
        assert_eq!(depths(&config), vec![2, 2, 2, 2]);

        assert_eq!(
            BackboneConfig::basic_os8(101, 1).unwrap_err(),
            "num_layers must be in {18, 34}"
        );
    }

    #[test]
    fn test_from_kind() {
        for kind in BackboneKind::ALL {
            let config = BackboneConfig::from_kind(kind, 2);
            assert_eq!(config.in_channels(), 2);
            assert_eq!(config.out_channels(), kind.feature_channels());
            assert_eq!(config.output_stride(), kind.output_stride());
        }
    }

    #[test]
    fn test_backbone_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let backbone: Backbone<B> =
            BackboneConfig::from_kind(BackboneKind::ResNet18Os8, 1).init(&device);
        assert_eq!(backbone.output_stride(), 8);
        assert_eq!(backbone.out_channels(), 512);

        let output = backbone.forward(Tensor::ones([1, 1, 16, 16, 8], &device));
        assert_eq!(output.dims(), [1, 512, 2, 2, 1]);
    }

    #[test]
    fn test_with_normalization() {
        let config = BackboneConfig::from_kind(BackboneKind::ResNet50Os16, 1)
            .with_normalization(InstanceNormConfig::new(0).into());
        assert!(matches!(
            config.stem.normalization,
            NormalizationConfig::Instance(_)
        ));
        for layer in &config.layers {
            for block in &layer.blocks {
                let norm = match block {
                    ResidualBlockConfig::Basic(block) => &block.normalization,
                    ResidualBlockConfig::Bottleneck(block) => &block.normalization,
                };
                assert!(matches!(norm, NormalizationConfig::Instance(_)));
            }
        }
        assert_eq!(config.out_channels(), 2048);
        assert_eq!(config.output_stride(), 16);
    }

    #[test]
    fn test_backbone_forward_bottleneck() {
        type B = NdArray<f32>;
        let device = Default::default();

        let backbone: Backbone<B> =
            BackboneConfig::from_kind(BackboneKind::ResNet50Os16, 1).init(&device);
        assert_eq!(backbone.output_stride(), 16);
        assert_eq!(backbone.out_channels(), 2048);
        assert_eq!(backbone.output_resolution([8, 9, 7]), [1, 1, 1]);

        let output = backbone.forward(Tensor::ones([1, 1, 8, 9, 7], &device));
        assert_eq!(output.dims(), [1, 2048, 1, 1, 1]);
    }
}
