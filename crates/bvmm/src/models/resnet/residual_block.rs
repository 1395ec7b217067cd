//! # Residual Block Wrapper

use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::models::resnet::basic_block::{BasicBlock, BasicBlockConfig, BasicBlockMeta};
use crate::models::resnet::bottleneck::{
    BottleneckBlock, BottleneckBlockConfig, BottleneckBlockMeta,
};
use burn::config::Config;
use burn::nn::Initializer;
use burn::prelude::{Backend, Module, Tensor};

/// [`ResidualBlock`] Meta API.
pub trait ResidualBlockMeta {
    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// The stride of convolution.
    ///
    /// Affects downsample behavior.
    fn stride(&self) -> usize;

    /// Dilation of the ``3x3x3`` convs.
    fn dilation(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 3],
    ) -> [usize; 3];
}

/// [`ResidualBlock`] Config.
#[derive(Config, Debug)]
pub enum ResidualBlockConfig {
    /// A `ResNet` [`BasicBlock`].
    Basic(BasicBlockConfig),

    /// A `ResNet` [`BottleneckBlock`].
    Bottleneck(BottleneckBlockConfig),
}

impl ResidualBlockMeta for ResidualBlockConfig {
    fn in_planes(&self) -> usize {
        match self {
            Self::Basic(config) => config.in_planes(),
            Self::Bottleneck(config) => config.in_planes(),
        }
    }

    fn out_planes(&self) -> usize {
        match self {
            Self::Basic(config) => config.out_planes(),
            Self::Bottleneck(config) => config.out_planes(),
        }
    }

    fn stride(&self) -> usize {
        match self {
            Self::Basic(config) => config.stride(),
            Self::Bottleneck(config) => config.stride(),
        }
    }

    fn dilation(&self) -> usize {
        match self {
            Self::Basic(config) => config.dilation(),
            Self::Bottleneck(config) => config.dilation(),
        }
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 3],
    ) -> [usize; 3] {
        match self {
            Self::Basic(config) => config.output_resolution(input_resolution),
            Self::Bottleneck(config) => config.output_resolution(input_resolution),
        }
    }
}

impl From<BasicBlockConfig> for ResidualBlockConfig {
    fn from(config: BasicBlockConfig) -> Self {
        Self::Basic(config)
    }
}

impl From<BottleneckBlockConfig> for ResidualBlockConfig {
    fn from(config: BottleneckBlockConfig) -> Self {
        Self::Bottleneck(config)
    }
}

impl ResidualBlockConfig {
    /// Build a block config.
    ///
    /// # Arguments
    ///
    /// - `in_planes`: input channels.
    /// - `planes`: block width; the output has ``planes * expansion`` channels.
    /// - `stride`: block stride.
    /// - `bottleneck`: build a [`BottleneckBlock`] (expansion 4) instead of
    ///   a [`BasicBlock`] (expansion 1).
    pub fn build(
        in_planes: usize,
        planes: usize,
        stride: usize,
        bottleneck: bool,
    ) -> Self {
        if bottleneck {
            BottleneckBlockConfig::new(in_planes, planes)
                .with_stride(stride)
                .into()
        } else {
            BasicBlockConfig::new(in_planes, planes)
                .with_stride(stride)
                .into()
        }
    }

    /// The output expansion factor of a block kind.
    pub fn expansion(bottleneck: bool) -> usize {
        if bottleneck {
            BottleneckBlockConfig::EXPANSION
        } else {
            BasicBlockConfig::EXPANSION
        }
    }

    /// Initialize a [`ResidualBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResidualBlock<B> {
        match self {
            Self::Basic(config) => ResidualBlock::Basic(config.clone().init(device)),
            Self::Bottleneck(config) => ResidualBlock::Bottleneck(config.clone().init(device)),
        }
    }

    /// Set the dilation.
    pub fn with_dilation(
        self,
        dilation: usize,
    ) -> Self {
        match self {
            Self::Basic(config) => config.with_dilation(dilation).into(),
            Self::Bottleneck(config) => config.with_dilation(dilation).into(),
        }
    }

    /// Set the conv initializer.
    pub fn with_initializer(
        self,
        initializer: Initializer,
    ) -> Self {
        match self {
            Self::Basic(config) => config.with_initializer(initializer).into(),
            Self::Bottleneck(config) => config.with_initializer(initializer).into(),
        }
    }

    /// Set the normalization config.
    pub fn with_normalization(
        self,
        normalization: NormalizationConfig,
    ) -> Self {
        match self {
            Self::Basic(config) => config.with_normalization(normalization).into(),
            Self::Bottleneck(config) => config.with_normalization(normalization).into(),
        }
    }
}

/// A `ResNet` [`BasicBlock`] or [`BottleneckBlock`] wrapper.
#[derive(Module, Debug)]
#[allow(clippy::large_enum_variant)]
pub enum ResidualBlock<B: Backend> {
    /// A `ResNet` [`BasicBlock`].
    Basic(BasicBlock<B>),

    /// A `ResNet` [`BottleneckBlock`].
    Bottleneck(BottleneckBlock<B>),
}

impl<B: Backend> From<BasicBlock<B>> for ResidualBlock<B> {
    fn from(block: BasicBlock<B>) -> Self {
        Self::Basic(block)
    }
}

impl<B: Backend> From<BottleneckBlock<B>> for ResidualBlock<B> {
    fn from(block: BottleneckBlock<B>) -> Self {
        Self::Bottleneck(block)
    }
}

impl<B: Backend> ResidualBlockMeta for ResidualBlock<B> {
    fn in_planes(&self) -> usize {
        match self {
            Self::Basic(block) => block.in_planes(),
            Self::Bottleneck(block) => block.in_planes(),
        }
    }

    fn out_planes(&self) -> usize {
        match self {
            Self::Basic(block) => block.out_planes(),
            Self::Bottleneck(block) => block.out_planes(),
        }
    }

    fn stride(&self) -> usize {
        match self {
            Self::Basic(block) => block.stride(),
            Self::Bottleneck(block) => block.stride(),
        }
    }

    fn dilation(&self) -> usize {
        match self {
            Self::Basic(block) => block.dilation(),
            Self::Bottleneck(block) => block.dilation(),
        }
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 3],
    ) -> [usize; 3] {
        match self {
            Self::Basic(block) => block.output_resolution(input_resolution),
            Self::Bottleneck(block) => block.output_resolution(input_resolution),
        }
    }
}

impl<B: Backend> ResidualBlock<B> {
    /// Forward Pass.
    pub fn forward(
        &self,
        input: Tensor<B, 5>,
    ) -> Tensor<B, 5> {
        match self {
            Self::Basic(block) => block.forward(input),
            Self::Bottleneck(block) => block.forward(input),
        }
    }

    /// Zero the scale of the last norm of the residual branch.
    pub fn zero_init_last_norm(&mut self) {
        match self {
            Self::Basic(block) => block.zero_init_last_norm(),
            Self::Bottleneck(block) => block.zero_init_last_norm(),
        }
    }
}
