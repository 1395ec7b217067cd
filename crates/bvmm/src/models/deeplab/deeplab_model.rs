//! # `DeepLabV3` for Volumes
//!
//! [`DeepLabV3`] segments a fixed-depth volume into per-slice-plane class scores:
//!
//! ```text
//! input          [batch, in_channels, depth, height, width]
//! backbone    -> [batch, feature_channels, depth/os, height/os, width/os]
//! aspp        -> [batch, num_classes, depth/os, height/os, width/os]
//! trilinear   -> [batch, num_classes, depth, height, width]
//! activation  -> (optional sigmoid, or softmax over classes)
//! swap        -> [batch, depth, num_classes, height, width]
//! final_conv  -> [batch, 1, num_classes, height, width]
//! squeeze     -> [batch, num_classes, height, width]
//! ```
//!
//! The depth of the input is fixed at construction; `final_conv` collapses it.

use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::interpolate::trilinear::trilinear_interpolate;
use crate::models::deeplab::aspp::{Aspp, AsppConfig, AsppMeta};
use crate::models::deeplab::backbone::{Backbone, BackboneConfig, BackboneMeta};
use crate::models::deeplab::kinds::{BackboneKind, OutputActivation};
use crate::models::resnet::util::{CONV_DEFAULT_INITIALIZER, scalar_to_array};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::{Ignored, Module};
use burn::nn::PaddingConfig3d;
use burn::nn::conv::{Conv3d, Conv3dConfig};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::{sigmoid, softmax};

/// [`DeepLabV3`] Meta API.
pub trait DeepLabV3Meta {
    /// The fixed input depth.
    fn depth(&self) -> usize;

    /// Input channels.
    fn in_channels(&self) -> usize;

    /// Number of output classes.
    fn num_classes(&self) -> usize;

    /// The backbone variant.
    fn backbone_kind(&self) -> BackboneKind;

    /// The optional activation applied to the upsampled class scores.
    fn last_activation(&self) -> Option<OutputActivation>;

    /// Ratio of input to feature map resolution.
    fn output_stride(&self) -> usize {
        self.backbone_kind().output_stride()
    }
}

/// [`DeepLabV3`] Config.
#[derive(Config, Debug)]
pub struct DeepLabV3Config {
    /// The fixed input depth.
    pub depth: usize,

    /// Input channels.
    pub in_channels: usize,

    /// Number of output classes.
    pub num_classes: usize,

    /// The backbone variant.
    #[config(default = "BackboneKind::ResNet34Os8")]
    pub backbone: BackboneKind,

    /// Activation applied to the upsampled class scores.
    #[config(default = "None")]
    pub last_activation: Option<OutputActivation>,

    /// Width of each ASPP branch.
    #[config(default = 256)]
    pub branch_channels: usize,

    /// Atrous rates of the ASPP.
    #[config(default = "vec![6, 12, 18]")]
    pub rates: Vec<usize>,

    /// Normalization of the backbone and the ASPP; the feature size is auto-matched.
    #[config(default = "NormalizationConfig::default()")]
    pub normalization: NormalizationConfig,
}

impl DeepLabV3Meta for DeepLabV3Config {
    fn depth(&self) -> usize {
        self.depth
    }

    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn backbone_kind(&self) -> BackboneKind {
        self.backbone
    }

    fn last_activation(&self) -> Option<OutputActivation> {
        self.last_activation
    }
}

impl DeepLabV3Config {
    /// The backbone config for the selected variant.
    pub fn backbone_config(&self) -> BackboneConfig {
        BackboneConfig::from_kind(self.backbone, self.in_channels)
            .with_normalization(self.normalization.clone())
    }

    /// The head config matching the backbone feature channels.
    pub fn aspp_config(&self) -> AsppConfig {
        let config = if self.backbone.is_bottleneck() {
            AsppConfig::bottleneck(self.num_classes)
        } else {
            AsppConfig::basic(self.num_classes)
        };
        config
            .with_branch_channels(self.branch_channels)
            .with_rates(self.rates.clone())
            .with_normalization(self.normalization.clone())
    }

    /// The depth-collapsing conv config.
    pub fn final_conv_config(&self) -> Conv3dConfig {
        Conv3dConfig::new([self.depth, 1], scalar_to_array(1))
            .with_padding(PaddingConfig3d::Explicit(0, 0, 0))
            .with_initializer(CONV_DEFAULT_INITIALIZER.clone())
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.depth == 0 {
            return Err("depth must be > 0".to_string());
        }
        if self.in_channels == 0 {
            return Err("in_channels must be > 0".to_string());
        }
        self.aspp_config().try_validate()
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{err}");
        }
    }

    /// Initialize a [`DeepLabV3`] model.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> DeepLabV3<B> {
        self.expect_valid();

        let backbone = self.backbone_config().init(device);
        let aspp = self.aspp_config().init(device);
        tracing::debug!(
            backbone = %self.backbone,
            output_stride = backbone.output_stride(),
            feature_channels = backbone.out_channels(),
            aspp_branches = aspp.num_branches(),
            num_classes = self.num_classes,
            "init DeepLabV3"
        );

        DeepLabV3 {
            backbone,
            aspp,
            final_conv: self.final_conv_config().init(device),
            kind: Ignored(self.backbone),
            last_activation: Ignored(self.last_activation),
        }
    }
}

/// `DeepLabV3` volumetric segmentation model.
#[derive(Module, Debug)]
pub struct DeepLabV3<B: Backend> {
    /// Feature extractor.
    pub backbone: Backbone<B>,

    /// Class score head.
    pub aspp: Aspp<B>,

    /// Collapses the depth axis.
    pub final_conv: Conv3d<B>,

    kind: Ignored<BackboneKind>,

    last_activation: Ignored<Option<OutputActivation>>,
}

impl<B: Backend> DeepLabV3Meta for DeepLabV3<B> {
    fn depth(&self) -> usize {
        self.final_conv.weight.shape().dims[1]
    }

    fn in_channels(&self) -> usize {
        self.backbone.in_channels()
    }

    fn num_classes(&self) -> usize {
        self.aspp.num_classes()
    }

    fn backbone_kind(&self) -> BackboneKind {
        self.kind.0
    }

    fn last_activation(&self) -> Option<OutputActivation> {
        self.last_activation.0
    }
}

impl<B: Backend> DeepLabV3<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, depth, height, width]``; `depth` must match the model.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes, height, width]``
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn forward(
        &self,
        input: Tensor<B, 5>,
    ) -> Tensor<B, 4> {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "in_channels", "depth", "height", "width"],
            &input,
            &["batch", "height", "width"],
            &[
                ("in_channels", self.in_channels()),
                ("depth", self.depth()),
            ],
        );

        let x = self.backbone.forward(input);
        let x = self.aspp.forward(x);
        let x = trilinear_interpolate(x, [self.depth(), height, width]);
        let x = match self.last_activation() {
            None => x,
            Some(OutputActivation::Sigmoid) => sigmoid(x),
            Some(OutputActivation::Softmax) => softmax(x, 1),
        };

        let x = self.final_conv.forward(x.swap_dims(1, 2));
        let x = x.squeeze::<4>(1);

        assert_shape_contract_periodically!(
            ["batch", "num_classes", "height", "width"],
            &x,
            &[
                ("batch", batch),
                ("num_classes", self.num_classes()),
                ("height", height),
                ("width", width),
            ],
        );
        x
    }
}
