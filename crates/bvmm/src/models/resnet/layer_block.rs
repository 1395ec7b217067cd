//! # `ResNet` Layer Block
//!
//! A [`LayerBlock`] is a sequence of [`ResidualBlock`]s; a `ResNet` stage.
//!
//! [`LayerBlockMeta`] defines a common meta API for [`LayerBlock`]
//! and [`LayerBlockConfig`].
//!
//! [`LayerBlockConfig`] implements [`Config`], and provides
//! [`LayerBlockConfig::init`] to initialize a [`LayerBlock`].
//!
//! [`LayerBlock`] implements [`Module`], and provides
//! [`LayerBlock::forward`].

use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::models::resnet::residual_block::{
    ResidualBlock, ResidualBlockConfig, ResidualBlockMeta,
};
use crate::models::resnet::util::strided_output_resolution;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::nn::Initializer;
use burn::prelude::{Backend, Module, Tensor};

/// [`LayerBlock`] Meta API.
pub trait LayerBlockMeta {
    /// The number of blocks.
    fn len(&self) -> usize;

    /// Check if the layer block is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// Get the effective stride of the layers.
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

/// [`LayerBlock`] Configuration.
#[derive(Config, Debug)]
pub struct LayerBlockConfig {
    /// The component blocks.
    pub blocks: Vec<ResidualBlockConfig>,
}

impl From<Vec<ResidualBlockConfig>> for LayerBlockConfig {
    fn from(blocks: Vec<ResidualBlockConfig>) -> Self {
        Self { blocks }
    }
}

impl LayerBlockMeta for LayerBlockConfig {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 3],
    ) -> [usize; 3] {
        self.blocks
            .iter()
            .fold(input_resolution, |res, block| block.output_resolution(res))
    }
}

impl LayerBlockConfig {
    /// Build a stage config.
    ///
    /// The first block gets `stride`, the rest stride 1; every block gets `dilation`.
    /// Block ``k > 0`` consumes the ``planes * expansion`` output of block ``k - 1``.
    ///
    /// # Arguments
    ///
    /// - `num_blocks`: the number of blocks.
    /// - `in_planes`: stage input channels.
    /// - `planes`: block width.
    /// - `stride`: stride of the first block.
    /// - `dilation`: dilation of every block.
    /// - `bottleneck`: use [`crate::models::resnet::bottleneck::BottleneckBlock`]s.
    pub fn build(
        num_blocks: usize,
        in_planes: usize,
        planes: usize,
        stride: usize,
        dilation: usize,
        bottleneck: bool,
    ) -> Self {
        let out_planes = planes * ResidualBlockConfig::expansion(bottleneck);
        let blocks = (0..num_blocks)
            .map(|b| {
                let block = if b == 0 {
                    ResidualBlockConfig::build(in_planes, planes, stride, bottleneck)
                } else {
                    ResidualBlockConfig::build(out_planes, planes, 1, bottleneck)
                };
                block.with_dilation(dilation)
            })
            .collect();

        Self { blocks }
    }

    /// Check if the config is valid.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("blocks is empty".to_string());
        }

        for idx in 1..self.blocks.len() {
            let prev = &self.blocks[idx - 1];
            let curr = &self.blocks[idx];
            if prev.out_planes() != curr.in_planes() {
                return Err(format!(
                    "block[{}].out_planes({}) != block[{}].in_planes({})\n{:#?}",
                    idx - 1,
                    prev.out_planes(),
                    idx,
                    curr.in_planes(),
                    self,
                ));
            }
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        match self.try_validate() {
            Ok(_) => (),
            Err(err) => panic!("{}", err),
        }
    }

    /// Initialize a new [`LayerBlock`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> LayerBlock<B> {
        self.expect_valid();

        LayerBlock {
            blocks: self
                .blocks
                .into_iter()
                .map(|block| block.init(device))
                .collect(),
        }
    }

    /// Apply a mapping over the blocks.
    pub fn map_blocks<F>(
        self,
        f: &mut F,
    ) -> Self
    where
        F: FnMut(usize, ResidualBlockConfig) -> ResidualBlockConfig,
    {
        Self {
            blocks: self
                .blocks
                .into_iter()
                .enumerate()
                .map(|(idx, block)| f(idx, block))
                .collect(),
        }
    }

    /// Update the conv initializer of every block.
    pub fn with_initializer(
        self,
        initializer: Initializer,
    ) -> Self {
        self.map_blocks(&mut |_, block| block.with_initializer(initializer.clone()))
    }

    /// Set the normalization config of every block.
    pub fn with_normalization(
        self,
        normalization: NormalizationConfig,
    ) -> Self {
        self.map_blocks(&mut |_, block| block.with_normalization(normalization.clone()))
    }
}

/// Layer block.
#[derive(Module, Debug)]
pub struct LayerBlock<B: Backend> {
    /// Internal blocks.
    pub blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> LayerBlockMeta for LayerBlock<B> {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 3],
    ) -> [usize; 3] {
        self.blocks
            .iter()
            .fold(input_resolution, |res, block| block.output_resolution(res))
    }
}

impl<B: Backend> LayerBlock<B> {
    /// Apply the layer block.
    #[tracing::instrument(level = "trace", skip_all)]
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

        let x = self.blocks.iter().fold(input, |x, block| block.forward(x));

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

        x
    }

    /// Zero the last norm scale of every residual branch.
    pub fn zero_init_residual(&mut self) {
        for block in self.blocks.iter_mut() {
            block.zero_init_last_norm();
        }
    }
}
