//! # Basic Block for `ResNet`
//!
//! [`BasicBlock`] is the core `ResNet` convolution unit.
//!
//! [`BasicBlockMeta`] defines a common meta API for [`BasicBlock`]
//! and [`BasicBlockConfig`].
//!
//! [`BasicBlockConfig`] implements [`Config`], and provides
//! [`BasicBlockConfig::init`] to initialize a [`BasicBlock`].
//!
//! [`BasicBlock`] implements [`Module`], and provides
//! [`BasicBlock::forward`].
//!
//! Both ``3x3x3`` convs carry the block dilation, with ``padding = dilation``;
//! a dilation of 1 is the plain classification block.

use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::blocks::cna::{AbstractCNA3dConfig, CNA3d, CNA3dConfig, CNA3dMeta};
use crate::models::resnet::downsample::{ConvDownsample, ConvDownsampleConfig};
use crate::models::resnet::util::{
    CONV_INTO_RELU_INITIALIZER, scalar_to_array, strided_output_resolution,
};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::conv::Conv3dConfig;
use burn::nn::{Initializer, PaddingConfig3d};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`BasicBlock`] Meta trait.
pub trait BasicBlockMeta {
    /// The size of the in channels dimension.
    fn in_planes(&self) -> usize;

    /// Configures the size of `out_planes`.
    fn planes(&self) -> usize;

    /// Dilation rate for the conv layers.
    fn dilation(&self) -> usize;

    /// The size of the out channels dimension.
    ///
    /// ``out_planes = planes * EXPANSION``
    fn out_planes(&self) -> usize {
        self.planes() * BasicBlockConfig::EXPANSION
    }

    /// The stride of convolution.
    ///
    /// Affects downsample behavior.
    fn stride(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    ///
    /// # Arguments
    ///
    /// - `input_resolution`: ``[in_depth, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[out_depth, out_height, out_width]``
    fn output_resolution(
        &self,
        input_resolution: [usize; 3],
    ) -> [usize; 3] {
        strided_output_resolution(input_resolution, self.stride())
    }
}

/// [`BasicBlock`] Config.
///
/// Implements [`BasicBlockMeta`].
#[derive(Config, Debug)]
pub struct BasicBlockConfig {
    /// The size of the in channels dimension.
    pub in_planes: usize,

    /// Configures the `out_planes`.
    pub planes: usize,

    /// The stride of the first conv and the downsample layer.
    #[config(default = 1)]
    pub stride: usize,

    /// Dilation rate for the conv layers.
    #[config(default = 1)]
    pub dilation: usize,

    /// Conv initializer.
    #[config(default = "CONV_INTO_RELU_INITIALIZER.clone()")]
    pub initializer: Initializer,

    /// [`crate::compat::normalization_wrapper::Normalization`] config.
    ///
    /// The feature size of this config will be replaced
    /// with the appropriate feature size for the input layer.
    #[config(default = "NormalizationConfig::default()")]
    pub normalization: NormalizationConfig,
}

impl BasicBlockMeta for BasicBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn planes(&self) -> usize {
        self.planes
    }

    fn dilation(&self) -> usize {
        self.dilation
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl BasicBlockConfig {
    /// Expansion factor of the block.
    pub const EXPANSION: usize = 1;

    /// Initialize a [`BasicBlock`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> BasicBlock<B> {
        let in_planes = self.in_planes();
        let planes = self.planes();
        let out_planes = self.out_planes();
        let stride = self.stride();
        let dilation = self.dilation();

        let downsample = if stride != 1 || in_planes != out_planes {
            Some(
                ConvDownsampleConfig::new(in_planes, out_planes)
                    .with_stride(stride)
                    .with_initializer(self.initializer.clone())
                    .with_norm(self.normalization.clone()),
            )
        } else {
            None
        };

        let cna_builder = AbstractCNA3dConfig {
            norm: self.normalization.clone(),
        };

        let cna1: CNA3dConfig = cna_builder.build_config(
            Conv3dConfig::new([in_planes, planes], scalar_to_array(3))
                .with_stride(scalar_to_array(stride))
                .with_dilation(scalar_to_array(dilation))
                .with_padding(PaddingConfig3d::Explicit(dilation, dilation, dilation))
                .with_initializer(self.initializer.clone())
                .with_bias(false),
        );

        let cna2: CNA3dConfig = cna_builder.build_config(
            Conv3dConfig::new([planes, out_planes], scalar_to_array(3))
                .with_dilation(scalar_to_array(dilation))
                .with_padding(PaddingConfig3d::Explicit(dilation, dilation, dilation))
                .with_initializer(self.initializer.clone())
                .with_bias(false),
        );

        BasicBlock {
            downsample: downsample.map(|cfg| cfg.init(device)),
            cna1: cna1.init(device),
            cna2: cna2.init(device),
        }
    }
}

/// Basic Block for `ResNet`.
///
/// Implements [`BasicBlockMeta`].
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    /// Optional `DownSample` layer; for the residual connection.
    pub downsample: Option<ConvDownsample<B>>,

    /// First Conv/Norm/Act Block.
    pub cna1: CNA3d<B>,

    /// Second Conv/Norm/Act Block.
    pub cna2: CNA3d<B>,
}

impl<B: Backend> BasicBlockMeta for BasicBlock<B> {
    fn in_planes(&self) -> usize {
        self.cna1.in_channels()
    }

    fn planes(&self) -> usize {
        self.cna1.out_channels()
    }

    fn dilation(&self) -> usize {
        self.cna1.dilation()[0]
    }

    fn out_planes(&self) -> usize {
        self.cna2.out_channels()
    }

    fn stride(&self) -> usize {
        self.cna1.stride()[0]
    }
}

impl<B: Backend> BasicBlock<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_depth, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes, out_depth, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 5>,
    ) -> Tensor<B, 5> {
        let [batch, in_depth, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_planes", "in_depth", "in_height", "in_width"],
            &input,
            &["batch", "in_depth", "in_height", "in_width"],
            &[("in_planes", self.in_planes())],
        );

        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(input.clone()),
            None => input.clone(),
        };

        let x = self.cna1.forward(input);
        let x = self.cna2.hook_forward(x, |x| x + identity);

        #[cfg(debug_assertions)]
        {
            let [out_depth, out_height, out_width] =
                self.output_resolution([in_depth, in_height, in_width]);
            assert_shape_contract_periodically!(
                ["batch", "out_planes", "out_depth", "out_height", "out_width"],
                &x,
                &[
                    ("batch", batch),
                    ("out_planes", self.out_planes()),
                    ("out_depth", out_depth),
                    ("out_height", out_height),
                    ("out_width", out_width),
                ],
            );
        }
        #[cfg(not(debug_assertions))]
        let _ = (batch, in_depth, in_height, in_width);

        x
    }

    /// Zero the scale of the last norm, so the residual branch starts at zero.
    pub fn zero_init_last_norm(&mut self) {
        self.cna2.norm.zero_init_gamma();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    #[test]
    fn test_basic_block_config() {
        let config = BasicBlockConfig::new(16, 32);
        assert_eq!(config.in_planes(), 16);
        assert_eq!(config.out_planes(), 32);
        assert_eq!(config.stride(), 1);
        assert_eq!(config.dilation(), 1);
        assert_eq!(config.output_resolution([16, 16, 16]), [16, 16, 16]);

        let config = config.with_stride(2).with_dilation(2);
        assert_eq!(config.stride(), 2);
        assert_eq!(config.dilation(), 2);
        assert_eq!(config.output_resolution([16, 15, 1]), [8, 8, 1]);
    }

    #[test]
    fn test_basic_block_meta() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: BasicBlock<B> = BasicBlockConfig::new(4, 4).with_dilation(2).init(&device);
        assert_eq!(block.in_planes(), 4);
        assert_eq!(block.planes(), 4);
        assert_eq!(block.out_planes(), 4);
        assert_eq!(block.stride(), 1);
        assert_eq!(block.dilation(), 2);
        assert!(block.downsample.is_none());
        assert!(block.cna1.conv.bias.is_none());
        assert!(block.cna2.conv.bias.is_none());

        let block: BasicBlock<B> = BasicBlockConfig::new(4, 8).init(&device);
        assert!(block.downsample.is_some());

        let block: BasicBlock<B> = BasicBlockConfig::new(4, 4).with_stride(2).init(&device);
        assert!(block.downsample.is_some());
    }

    #[test]
    fn test_basic_block_forward_identity_autodiff() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let block: BasicBlock<B> = BasicBlockConfig::new(4, 4).with_dilation(2).init(&device);

        let input = Tensor::random([2, 4, 5, 6, 7], Distribution::Default, &device);
        let output = block.forward(input.clone());
        assert_eq!(output.dims(), [2, 4, 5, 6, 7]);

        let expected = {
            let x = block.cna1.forward(input.clone());
            let x = block.cna2.conv.forward(x);
            let x = block.cna2.norm.forward(x);
            block.cna2.act.forward(x + input)
        };
        output.to_data().assert_eq(&expected.to_data(), true);
    }

    #[test]
    fn test_basic_block_forward_downsample() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: BasicBlock<B> = BasicBlockConfig::new(2, 4).with_stride(2).init(&device);
        let [d, h, w] = block.output_resolution([5, 6, 7]);
        assert_eq!([d, h, w], [3, 3, 4]);

        let output = block.forward(Tensor::ones([2, 2, 5, 6, 7], &device));
        assert_eq!(output.dims(), [2, 4, d, h, w]);
    }

    #[test]
    fn test_zero_init_last_norm() {
        type B = NdArray<f32>;
        let device = Default::default();

        let mut block: BasicBlock<B> = BasicBlockConfig::new(4, 4).init(&device);
        block.zero_init_last_norm();

        // The residual branch is zero; the block reduces to relu(input).
        let input = Tensor::random([1, 4, 3, 3, 3], Distribution::Normal(0.0, 1.0), &device);
        let output = block.forward(input.clone());
        output
            .to_data()
            .assert_eq(&burn::tensor::activation::relu(input).to_data(), true);
    }
}
