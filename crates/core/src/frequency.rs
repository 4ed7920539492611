//! Frequency-axis Mamba block.
//!
//! Every (batch item, frequency bin) pair becomes an independent sequence
//! over time, so one mixer with shared weights processes all bins in a
//! single call:
//!
//! ```text
//! [b, c, t, f] -> fold -> [b*f, t, c] -> Mamba stack -> remix (1x1) -> + skip
//!              -> unfold -> [b, c, t, f] -> squeeze channel if c == 1
//! ```
//!
//! A time-axis twin of this block (same pattern, folding time into batch
//! and mixing along frequency) would reuse [`SequenceMixerStack`] and
//! [`ChannelRemix`] unchanged; it is not part of this block.

use std::path::Path;

use candle_core::{DType, Device, Module, Result, Tensor};
use candle_nn::{VarBuilder, VarMap};
use serde_json::Value;

use crate::config::{BlockConfig, RemixSkip};
use crate::init::{init_weights, join_path};
use crate::layers::ChannelRemix;
use crate::shape::{
    channels_first, channels_last, fold_frequency, squeeze_channel, unfold_frequency,
    SpectralDims,
};
use crate::stack::SequenceMixerStack;

#[derive(Clone, Debug)]
pub struct FrequencyAxisMixer {
    cfg: BlockConfig,
    freq_mamba: SequenceMixerStack,
    flinear: ChannelRemix,
}

impl FrequencyAxisMixer {
    /// Build the block; parameters live under `freq_mamba.*` and `flinear.*`.
    pub fn new(cfg: &BlockConfig, vb: VarBuilder) -> Result<Self> {
        cfg.validate()
            .map_err(|e| candle_core::Error::Msg(e.to_string()))?;

        let freq_mamba = SequenceMixerStack::new(cfg.hid_feature, cfg, vb.pp("freq_mamba"))?;
        let flinear = ChannelRemix::new(cfg.hid_feature, vb.pp("flinear"))?;

        tracing::debug!(
            hid_feature = cfg.hid_feature,
            n_layer = freq_mamba.num_layers(),
            remix_skip = ?cfg.remix_skip,
            "built frequency-axis mixer"
        );

        Ok(Self {
            cfg: cfg.clone(),
            freq_mamba,
            flinear,
        })
    }

    /// Build from the root config mapping (`{"model_cfg": {...}}`).
    pub fn from_value(root: &Value, vb: VarBuilder) -> crate::Result<Self> {
        let cfg = BlockConfig::from_value(root)?;
        Ok(Self::new(&cfg, vb)?)
    }

    /// Build from a JSON config file holding a `model_cfg` section.
    pub fn from_config_file(path: impl AsRef<Path>, vb: VarBuilder) -> crate::Result<Self> {
        let cfg = BlockConfig::from_path(path)?;
        Ok(Self::new(&cfg, vb)?)
    }

    /// Build on a fresh [`VarMap`] and run the seeded weight initialization.
    ///
    /// The returned map owns the trainable variables.
    pub fn initialized(
        cfg: &BlockConfig,
        dtype: DType,
        device: &Device,
        seed: u64,
    ) -> Result<(Self, VarMap)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, dtype, device);
        let model = Self::new(cfg, vb)?;
        model.reset_parameters(&varmap, "", seed)?;
        Ok((model, varmap))
    }

    /// Re-initialize this block's parameters in a shared `varmap`, where the
    /// block was built under `prefix` (e.g. `"tf_blocks.0"`).
    ///
    /// The Mamba stack gets the depth-aware init, the remix its layer
    /// default. Other variables in the map keep their values.
    pub fn reset_parameters(&self, varmap: &VarMap, prefix: &str, seed: u64) -> Result<()> {
        self.freq_mamba.reset_parameters(
            varmap,
            &join_path(prefix, "freq_mamba"),
            &self.cfg.mixer,
            seed,
        )?;
        init_weights(
            varmap,
            &join_path(prefix, "flinear"),
            1,
            &self.cfg.mixer,
            seed.wrapping_add(1),
        )
    }

    pub fn config(&self) -> &BlockConfig {
        &self.cfg
    }

    pub fn sequence_mixer(&self) -> &SequenceMixerStack {
        &self.freq_mamba
    }

    pub fn remix(&self) -> &ChannelRemix {
        &self.flinear
    }

    /// Rank of the forward output: 3 when `hid_feature == 1`, otherwise 4.
    pub fn output_rank(&self) -> usize {
        if self.cfg.hid_feature == 1 {
            3
        } else {
            4
        }
    }

    fn check_input(&self, xs: &Tensor) -> Result<SpectralDims> {
        if xs.rank() != 4 {
            return Err(candle_core::Error::Msg(format!(
                "frequency-axis mixer expects [batch, channel, time, freq], got shape {:?}",
                xs.dims()
            )));
        }
        let dims = SpectralDims::of(xs)?;
        if dims.time == 0 {
            return Err(candle_core::Error::Msg(
                "frequency-axis mixer needs at least one time frame, got 0".to_string(),
            ));
        }
        if dims.channels != self.cfg.hid_feature {
            return Err(candle_core::Error::Msg(format!(
                "frequency-axis mixer expects {} channels (hid_feature), got {}",
                self.cfg.hid_feature, dims.channels
            )));
        }
        Ok(dims)
    }
}

impl Module for FrequencyAxisMixer {
    /// `[b, c, t, f]` -> `[b, c, t, f]` when `hid_feature > 1`, and
    /// `[b, t, f]` when `hid_feature == 1`.
    ///
    /// The output rank is therefore fixed by the config, not by the data:
    /// 4 for multi-channel blocks, 3 for single-channel ones. Only the
    /// channel axis is ever dropped.
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let dims = self.check_input(xs)?;
        tracing::trace!(?dims, "frequency-axis mixer forward");

        let (x, dims) = fold_frequency(xs)?;
        let mixed = self.freq_mamba.forward(&x)?;
        let remixed = channels_last(&self.flinear.forward(&channels_first(&mixed)?)?)?;
        let skip = match self.cfg.remix_skip {
            RemixSkip::Input => &x,
            RemixSkip::MixerOutput => &mixed,
        };
        let ys = (remixed + skip)?;

        squeeze_channel(&unfold_frequency(&ys, dims)?)
    }
}
