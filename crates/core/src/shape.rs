//! Axis choreography between the 4-D spectrogram layout and the 3-D
//! sequence layout the mixer runs on.
//!
//! ```text
//! [b, c, t, f] --fold_frequency--> [b*f, t, c] --unfold_frequency--> [b, c, t, f]
//! [n, t, c]    --channels_first--> [n, c, t]   --channels_last-->    [n, t, c]
//! ```
//!
//! The folded row for batch item `i` and frequency bin `j` is `i * f + j`.

use candle_core::{Result, Tensor};

/// Extents of a `[batch, channel, time, frequency]` tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpectralDims {
    pub batch: usize,
    pub channels: usize,
    pub time: usize,
    pub freq: usize,
}

impl SpectralDims {
    pub fn of(x: &Tensor) -> Result<Self> {
        let (batch, channels, time, freq) = x.dims4()?;
        Ok(Self {
            batch,
            channels,
            time,
            freq,
        })
    }

    /// Number of independent sequences after folding.
    pub fn folded_batch(&self) -> usize {
        self.batch * self.freq
    }
}

/// `[b, c, t, f]` -> `[b*f, t, c]`
pub fn fold_frequency(x: &Tensor) -> Result<(Tensor, SpectralDims)> {
    let dims = SpectralDims::of(x)?;
    let folded = x
        .permute((0, 3, 2, 1))?
        .contiguous()?
        .reshape((dims.folded_batch(), dims.time, dims.channels))?;
    Ok((folded, dims))
}

/// `[b*f, t, c]` -> `[b, c, t, f]`, the inverse of [`fold_frequency`].
pub fn unfold_frequency(x: &Tensor, dims: SpectralDims) -> Result<Tensor> {
    let (n, time, channels) = x.dims3()?;
    if n != dims.folded_batch() || time != dims.time || channels != dims.channels {
        return Err(candle_core::Error::Msg(format!(
            "cannot unfold [{n}, {time}, {channels}] into {dims:?}"
        )));
    }
    x.reshape((dims.batch, dims.freq, dims.time, dims.channels))?
        .permute((0, 3, 2, 1))?
        .contiguous()
}

/// `[n, t, c]` -> `[n, c, t]`
pub fn channels_first(x: &Tensor) -> Result<Tensor> {
    x.dims3()?;
    x.transpose(1, 2)?.contiguous()
}

/// `[n, c, t]` -> `[n, t, c]`
pub fn channels_last(x: &Tensor) -> Result<Tensor> {
    x.dims3()?;
    x.transpose(1, 2)?.contiguous()
}

/// Drop the channel axis of `[b, c, t, f]` when it has extent one.
///
/// Any other extent leaves the tensor untouched; no other axis is ever
/// squeezed, even if it happens to have extent one.
pub fn squeeze_channel(x: &Tensor) -> Result<Tensor> {
    let (_b, channels, _t, _f) = x.dims4()?;
    if channels == 1 {
        x.squeeze(1)
    } else {
        Ok(x.clone())
    }
}
