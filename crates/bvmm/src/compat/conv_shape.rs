//! # Convolution Shape Utilities
//!
//! Predict the spatial output shape of convolution and pooling operations.
//!
//! ```text
//! out_size = floor( ((in_size + 2*padding - dilation*(kernel_size-1) - 1) / stride) + 1 )
//! ```
//!
//! # Reference
//!
//! - [conv_arithmetic diagram](https://github.com/vdumoulin/conv_arithmetic/blob/master/README.md)
//! - [pytorch conv3d](https://docs.pytorch.org/docs/stable/generated/torch.nn.Conv3d.html)

use burn::nn::PaddingConfig3d;
use burn::nn::conv::Conv3dConfig;

/// Predict the output size of a 1D convolution operation.
///
/// # Arguments
///
/// - `input_size`: The input dimension size, must be > 0.
/// - `kernel_size`: The kernel size, must be > 0.
/// - `stride`: The stride of the convolution, must be > 0.
/// - `padding`: The padding, added evenly to both sides of the input.
/// - `dilation`: The dilation of the convolution, must be > 0.
///
/// # Returns
///
/// An `Option<usize>` representing the output size; or `None` for <= 0.
pub fn maybe_conv1d_output_size(
    input_size: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
) -> Option<usize> {
    assert!(input_size > 0);
    assert!(kernel_size > 0);
    assert!(stride > 0);
    assert!(dilation > 0);

    let padded = input_size + 2 * padding;
    let receptive_field = dilation * (kernel_size - 1) + 1;

    padded
        .checked_sub(receptive_field)
        .map(|span| span / stride + 1)
}

/// Predict the output size of a 1D convolution operation.
///
/// This is the ``panic``-ing variant of [`maybe_conv1d_output_size`].
///
/// # Panics
///
/// If the kernel does not fit in the padded input.
pub fn expect_conv1d_output_size(
    input_size: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
) -> usize {
    match maybe_conv1d_output_size(input_size, kernel_size, stride, padding, dilation) {
        Some(size) => size,
        None => panic!(
            "No legal output size for conv1d with:\n input_size:{input_size}\n kernel_size:{kernel_size}\n stride:{stride}\n dilation:{dilation}\n padding:{padding}",
        ),
    }
}

/// Predict the per-axis output shape of a D-dimensional convolution.
///
/// # Panics
///
/// If any axis has no legal output size.
pub fn expect_conv_output_shape<const D: usize>(
    input_shape: [usize; D],
    kernel_shape: [usize; D],
    stride: [usize; D],
    padding: [usize; D],
    dilation: [usize; D],
) -> [usize; D] {
    core::array::from_fn(|i| {
        expect_conv1d_output_size(
            input_shape[i],
            kernel_shape[i],
            stride[i],
            padding[i],
            dilation[i],
        )
    })
}

/// Resolve a [`PaddingConfig3d`] to explicit per-axis padding.
///
/// # Panics
///
/// On ``PaddingConfig3d::Same``; the layers in this crate always use explicit padding.
pub fn explicit_padding_3d(padding: &PaddingConfig3d) -> [usize; 3] {
    match padding {
        PaddingConfig3d::Valid => [0, 0, 0],
        PaddingConfig3d::Explicit(d, h, w) => [*d, *h, *w],
        PaddingConfig3d::Same => panic!("Same padding has no static output shape prediction"),
    }
}

/// Predict the ``[depth, height, width]`` output resolution of a [`Conv3dConfig`].
pub fn conv3d_output_resolution(
    config: &Conv3dConfig,
    input_resolution: [usize; 3],
) -> [usize; 3] {
    expect_conv_output_shape(
        input_resolution,
        config.kernel_size,
        config.stride,
        explicit_padding_3d(&config.padding),
        config.dilation,
    )
}
