//! Width-preserving 1x1 transposed convolution used as a per-position
//! channel remix.
//!
//! Parameters follow PyTorch's `ConvTranspose1d(C, C, 1)` layout so a
//! checkpoint loads unchanged: `weight` is `[in, out, 1]`, `bias` is `[out]`.
//! With kernel size one and stride one the op is a matmul over channels:
//! `y[n, o, t] = sum_i x[n, i, t] * w[i, o] + b[o]`.

use candle_core::{Module, Result, Tensor};
use candle_nn::{Init, VarBuilder};

#[derive(Clone, Debug)]
pub struct ChannelRemix {
    /// `[in, out]`, the kernel axis squeezed away.
    weight: Tensor,
    bias: Tensor,
    channels: usize,
}

impl ChannelRemix {
    pub fn new(channels: usize, vb: VarBuilder) -> Result<Self> {
        // PyTorch default: kaiming_uniform(a=sqrt(5)) => U(-1/sqrt(fan_in), 1/sqrt(fan_in)),
        // where fan_in of a transposed conv weight is `out * kernel`.
        let bound = 1.0 / (channels as f64).sqrt();
        let uniform = || Init::Uniform {
            lo: -bound,
            up: bound,
        };
        let weight = vb.get_with_hints((channels, channels, 1), "weight", uniform())?;
        let bias = vb.get_with_hints(channels, "bias", uniform())?;
        Ok(Self {
            weight: weight.squeeze(2)?,
            bias,
            channels,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

impl Module for ChannelRemix {
    /// `[batch, channels, seq_len]` -> `[batch, channels, seq_len]`
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch, channels, seq_len) = xs.dims3()?;
        if channels != self.channels {
            return Err(candle_core::Error::Msg(format!(
                "channel remix expects {} channels, got {channels}",
                self.channels
            )));
        }
        let ys = xs
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch * seq_len, channels))?
            .matmul(&self.weight)?
            .broadcast_add(&self.bias)?;
        ys.reshape((batch, seq_len, channels))?.transpose(1, 2)
    }
}
