//! # Named Model Choices
//!
//! [`BackboneKind`] names the supported output-stride constrained backbones;
//! [`OutputActivation`] names the optional activation applied to the class scores.
//!
//! Both parse case-insensitively from their snake-case names.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// The supported backbone variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackboneKind {
    /// `ResNet-18`, output stride 16.
    #[serde(rename = "resnet18_os16")]
    ResNet18Os16,

    /// `ResNet-34`, output stride 16.
    #[serde(rename = "resnet34_os16")]
    ResNet34Os16,

    /// `ResNet-50`, output stride 16.
    #[serde(rename = "resnet50_os16")]
    ResNet50Os16,

    /// `ResNet-101`, output stride 16.
    #[serde(rename = "resnet101_os16")]
    ResNet101Os16,

    /// `ResNet-152`, output stride 16.
    #[serde(rename = "resnet152_os16")]
    ResNet152Os16,

    /// `ResNet-18`, output stride 8.
    #[serde(rename = "resnet18_os8")]
    ResNet18Os8,

    /// `ResNet-34`, output stride 8; the default.
    #[default]
    #[serde(rename = "resnet34_os8")]
    ResNet34Os8,
}

impl BackboneKind {
    /// Every variant, in declaration order.
    pub const ALL: [BackboneKind; 7] = [
        Self::ResNet18Os16,
        Self::ResNet34Os16,
        Self::ResNet50Os16,
        Self::ResNet101Os16,
        Self::ResNet152Os16,
        Self::ResNet18Os8,
        Self::ResNet34Os8,
    ];

    /// The canonical name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ResNet18Os16 => "resnet18_os16",
            Self::ResNet34Os16 => "resnet34_os16",
            Self::ResNet50Os16 => "resnet50_os16",
            Self::ResNet101Os16 => "resnet101_os16",
            Self::ResNet152Os16 => "resnet152_os16",
            Self::ResNet18Os8 => "resnet18_os8",
            Self::ResNet34Os8 => "resnet34_os8",
        }
    }

    /// The `ResNet` depth.
    pub fn num_layers(&self) -> usize {
        match self {
            Self::ResNet18Os16 | Self::ResNet18Os8 => 18,
            Self::ResNet34Os16 | Self::ResNet34Os8 => 34,
            Self::ResNet50Os16 => 50,
            Self::ResNet101Os16 => 101,
            Self::ResNet152Os16 => 152,
        }
    }

    /// The ratio of input to feature map resolution.
    pub fn output_stride(&self) -> usize {
        match self {
            Self::ResNet18Os8 | Self::ResNet34Os8 => 8,
            _ => 16,
        }
    }

    /// Does the backbone use bottleneck blocks?
    pub fn is_bottleneck(&self) -> bool {
        matches!(
            self,
            Self::ResNet50Os16 | Self::ResNet101Os16 | Self::ResNet152Os16
        )
    }

    /// Channels of the backbone feature map.
    pub fn feature_channels(&self) -> usize {
        if self.is_bottleneck() { 2048 } else { 512 }
    }
}

impl fmt::Display for BackboneKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackboneKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == lower)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|kind| kind.name()).collect();
                format!("unknown backbone {s:?}; expected one of {names:?}")
            })
    }
}

/// Activation applied to the upsampled class scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputActivation {
    /// Element-wise sigmoid.
    Sigmoid,

    /// Softmax over the class axis.
    Softmax,
}

impl OutputActivation {
    /// The canonical name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sigmoid => "sigmoid",
            Self::Softmax => "softmax",
        }
    }
}

impl fmt::Display for OutputActivation {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OutputActivation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sigmoid" => Ok(Self::Sigmoid),
            "softmax" => Ok(Self::Softmax),
            _ => Err(format!(
                "unknown activation {s:?}; expected one of [\"sigmoid\", \"softmax\"]"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hamcrest::prelude::*;

    #[test]
    fn test_backbone_names_round_trip() {
        for kind in BackboneKind::ALL {
            assert_eq!(kind.to_string().parse::<BackboneKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_backbone_parse_is_case_insensitive() {
        assert_eq!(
            "ResNet50_OS16".parse::<BackboneKind>(),
            Ok(BackboneKind::ResNet50Os16)
        );
        assert_eq!(
            "RESNET18_OS8".parse::<BackboneKind>(),
            Ok(BackboneKind::ResNet18Os8)
        );
    }

    #[test]
    fn test_backbone_parse_unknown() {
        let err = "resnet50_os8".parse::<BackboneKind>().unwrap_err();
        assert!(err.starts_with("unknown backbone \"resnet50_os8\""));
        assert!(err.contains("resnet34_os8"));
    }

    #[test]
    fn test_backbone_default() {
        assert_that!(BackboneKind::default(), is(equal_to(BackboneKind::ResNet34Os8)));
        assert_that!(BackboneKind::default().output_stride(), is(equal_to(8)));

        let kind: BackboneKind = serde_json::from_str("\"resnet34_os8\"").unwrap();
        assert_that!(kind, is(equal_to(BackboneKind::default())));
    }

    #[test]
    fn test_backbone_properties() {

        let bottleneck: Vec<BackboneKind> = BackboneKind::ALL
            .into_iter()
            .filter(|kind| kind.is_bottleneck())
            .collect();
        assert_eq!(
            bottleneck,
            vec![
                BackboneKind::ResNet50Os16,
                BackboneKind::ResNet101Os16,
                BackboneKind::ResNet152Os16
            ]
        );

        assert_eq!(BackboneKind::ResNet18Os8.output_stride(), 8);
        assert_eq!(BackboneKind::ResNet101Os16.output_stride(), 16);
        assert_eq!(BackboneKind::ResNet101Os16.num_layers(), 101);
        assert_eq!(BackboneKind::ResNet34Os16.feature_channels(), 512);
        assert_eq!(BackboneKind::ResNet152Os16.feature_channels(), 2048);
    }

    #[test]
    fn test_backbone_serde() {
        let json = serde_json::to_string(&BackboneKind::ResNet101Os16).unwrap();
        assert_eq!(json, "\"resnet101_os16\"");
        let kind: BackboneKind = serde_json::from_str("\"resnet18_os8\"").unwrap();
        assert_eq!(kind, BackboneKind::ResNet18Os8);
    }

    #[test]
    fn test_output_activation() {
        assert_eq!("Sigmoid".parse::<OutputActivation>(), Ok(OutputActivation::Sigmoid));
        assert_eq!("SOFTMAX".parse::<OutputActivation>(), Ok(OutputActivation::Softmax));
        assert!("tanh".parse::<OutputActivation>().is_err());
        assert_eq!(OutputActivation::Softmax.to_string(), "softmax");
    }
}
