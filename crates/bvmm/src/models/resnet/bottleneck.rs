//! # Bottleneck Block for `ResNet`
//!
//! [`BottleneckBlock`] is the deep `ResNet` convolution unit:
//! a ``1x1x1`` reduction, a (possibly strided and dilated) ``3x3x3`` conv,
//! and a ``1x1x1`` expansion to ``planes * 4`` channels.
//!
//! [`BottleneckBlockMeta`] defines a common meta API for [`BottleneckBlock`]
//! and [`BottleneckBlockConfig`].

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

/// [`BottleneckBlock`] Meta trait.
pub trait BottleneckBlockMeta {
    /// The size of the in channels dimension.
    fn in_planes(&self) -> usize;

    /// The width of the inner convs.
    fn planes(&self) -> usize;

    /// Dilation rate for the ``3x3x3`` conv.
    fn dilation(&self) -> usize;

    /// The size of the out channels dimension.
    ///
    /// ``out_planes = planes * EXPANSION``
    fn out_planes(&self) -> usize {
        self.planes() * BottleneckBlockConfig::EXPANSION
    }

    /// The stride of the ``3x3x3`` conv.
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

/// [`BottleneckBlock`] Config.
///
/// Implements [`BottleneckBlockMeta`].
#[derive(Config, Debug)]
pub struct BottleneckBlockConfig {
    /// The size of the in channels dimension.
    pub in_planes: usize,

    /// The width of the inner convs.
    pub planes: usize,

    /// The stride of the ``3x3x3`` conv and the downsample layer.
    #[config(default = 1)]
    pub stride: usize,

    /// Dilation rate for the ``3x3x3`` conv.
    #[config(default = 1)]
    pub dilation: usize,

    /// Conv initializer.
    #[config(default = "CONV_INTO_RELU_INITIALIZER.clone()")]
    pub initializer: Initializer,

    /// [`crate::compat::normalization_wrapper::Normalization`] config.
    #[config(default = "NormalizationConfig::default()")]
    pub normalization: NormalizationConfig,
}

impl BottleneckBlockMeta for BottleneckBlockConfig {
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

impl BottleneckBlockConfig {
    /// Expansion factor of the block.
    pub const EXPANSION: usize = 4;

    /// Initialize a [`BottleneckBlock`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> BottleneckBlock<B> {
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
            Conv3dConfig::new([in_planes, planes], scalar_to_array(1))
                .with_padding(PaddingConfig3d::Explicit(0, 0, 0))
                .with_initializer(self.initializer.clone())
                .with_bias(false),
        );

        let cna2: CNA3dConfig = cna_builder.build_config(
            Conv3dConfig::new([planes, planes], scalar_to_array(3))
                .with_stride(scalar_to_array(stride))
                .with_dilation(scalar_to_array(dilation))
                .with_padding(PaddingConfig3d::Explicit(dilation, dilation, dilation))
                .with_initializer(self.initializer.clone())
                .with_bias(false),
        );

        let cna3: CNA3dConfig = cna_builder.build_config(
            Conv3dConfig::new([planes, out_planes], scalar_to_array(1))
                .with_padding(PaddingConfig3d::Explicit(0, 0, 0))
                .with_initializer(self.initializer.clone())
                .with_bias(false),
        );

        BottleneckBlock {
            downsample: downsample.map(|cfg| cfg.init(device)),
            cna1: cna1.init(device),
            cna2: cna2.init(device),
            cna3: cna3.init(device),
        }
    }
}

/// Bottleneck Block for `ResNet`.
///
/// Implements [`BottleneckBlockMeta`].
#[derive(Module, Debug)]
pub struct BottleneckBlock<B: Backend> {
    /// Optional `DownSample` layer; for the residual connection.
    pub downsample: Option<ConvDownsample<B>>,

    /// ``1x1x1`` reduction.
    pub cna1: CNA3d<B>,

    /// ``3x3x3`` conv.
    pub cna2: CNA3d<B>,

    /// ``1x1x1`` expansion.
    pub cna3: CNA3d<B>,
}

impl<B: Backend> BottleneckBlockMeta for BottleneckBlock<B> {
    fn in_planes(&self) -> usize {
        self.cna1.in_channels()
    }

    fn planes(&self) -> usize {
        self.cna1.out_channels()
    }

    fn dilation(&self) -> usize {
        self.cna2.dilation()[0]
    }

    fn out_planes(&self) -> usize {
        self.cna3.out_channels()
    }

    fn stride(&self) -> usize {
        self.cna2.stride()[0]
    }
}

impl<B: Backend> BottleneckBlock<B> {
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
        let [out_depth, out_height, out_width] =
            self.output_resolution([in_depth, in_height, in_width]);

        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(input.clone()),
            None => input.clone(),
        };

        let x = self.cna1.forward(input);
        let x = self.cna2.forward(x);

        #[cfg(debug_assertions)]
        assert_shape_contract_periodically!(
            ["batch", "planes", "out_depth", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("planes", self.planes()),
                ("out_depth", out_depth),
                ("out_height", out_height),
                ("out_width", out_width),
            ],
        );

        let x = self.cna3.hook_forward(x, |x| x + identity);

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

        x
    }

    /// Zero the scale of the last norm, so the residual branch starts at zero.
    pub fn zero_init_last_norm(&mut self) {
        self.cna3.norm.zero_init_gamma();
    }
}
