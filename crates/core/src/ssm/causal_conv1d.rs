//! Causal depthwise 1D convolution used in front of the selective scan.
//!
//! Weight shape: `[d_inner, 1, kernel_size]` (depthwise, groups=d_inner),
//! matching the PyTorch `Conv1d(d_inner, d_inner, d_conv, groups=d_inner)`
//! parameter layout. Input is channels-first: `[batch, d_inner, seq_len]`.

use candle_core::{Result, Tensor};

/// Applies causal depthwise 1D convolution over a full sequence.
///
/// Left-pads with `kernel_size - 1` zeros so that output `t` only depends on
/// inputs `<= t`. This equals PyTorch's `conv1d(padding=k-1)[..., :seq_len]`.
///
/// # Arguments
/// * `x`      - `[batch, d_inner, seq_len]`
/// * `weight` - `[d_inner, 1, kernel_size]`
/// * `bias`   - optional `[d_inner]`
///
/// # Returns
/// `[batch, d_inner, seq_len]`
pub fn causal_conv1d(x: &Tensor, weight: &Tensor, bias: Option<&Tensor>) -> Result<Tensor> {
    let (batch, d_inner, seq_len) = x.dims3()?;
    let (_d_inner_w, _one, kernel_size) = weight.dims3()?;

    let padded = if kernel_size > 1 {
        let pad = Tensor::zeros((batch, d_inner, kernel_size - 1), x.dtype(), x.device())?;
        Tensor::cat(&[&pad, x], 2)?
    } else {
        x.clone()
    };

    // Accumulate one shifted window per kernel tap instead of one per time step.
    let w = weight.squeeze(1)?; // [d_inner, kernel_size]
    let mut out = Tensor::zeros((batch, d_inner, seq_len), x.dtype(), x.device())?;
    for k in 0..kernel_size {
        let tap = w.narrow(1, k, 1)?.unsqueeze(0)?; // [1, d_inner, 1]
        let window = padded.narrow(2, k, seq_len)?;
        out = (out + window.broadcast_mul(&tap)?)?;
    }

    match bias {
        Some(bias) => out.broadcast_add(&bias.reshape((1, d_inner, 1))?),
        None => Ok(out),
    }
}
