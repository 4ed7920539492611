//! A stack of residual Mamba blocks with residual threading.

use candle_core::{DType, Device, Module, Result, Tensor};
use candle_nn::{VarBuilder, VarMap};

use crate::block::{create_block, ResidualBlock};
use crate::config::{BlockConfig, MixerParams};
use crate::init::{init_weights, join_path};
use crate::mixer::MambaMixer;

/// Layer count of the stack used by the frequency-axis block.
pub const DEFAULT_NUM_LAYERS: usize = 1;

#[derive(Clone, Debug)]
pub struct SequenceMixerStack<M = MambaMixer> {
    blocks: Vec<ResidualBlock<M>>,
}

impl SequenceMixerStack {
    /// Single-block stack over `in_channels`; parameters under `forward_blocks.*`.
    pub fn new(in_channels: usize, cfg: &BlockConfig, vb: VarBuilder) -> Result<Self> {
        Self::with_num_layers(in_channels, cfg, DEFAULT_NUM_LAYERS, vb)
    }

    pub fn with_num_layers(
        in_channels: usize,
        cfg: &BlockConfig,
        n_layer: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let vb_blocks = vb.pp("forward_blocks");
        let blocks = (0..n_layer)
            .map(|i| create_block(in_channels, cfg, i, vb_blocks.pp(i)))
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(in_channels, n_layer, "built sequence mixer stack");
        Ok(Self { blocks })
    }

    /// Build `n_layer` blocks on a fresh [`VarMap`] and run the depth-aware
    /// init over them.
    pub fn initialized(
        in_channels: usize,
        cfg: &BlockConfig,
        n_layer: usize,
        dtype: DType,
        device: &Device,
        seed: u64,
    ) -> Result<(Self, VarMap)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, dtype, device);
        let stack = Self::with_num_layers(in_channels, cfg, n_layer, vb)?;
        stack.reset_parameters(&varmap, "", &cfg.mixer, seed)?;
        Ok((stack, varmap))
    }

    /// Re-initialize this stack's parameters in `varmap`, where the stack was
    /// built under `prefix`. Nothing else in the map is touched.
    pub fn reset_parameters(
        &self,
        varmap: &VarMap,
        prefix: &str,
        params: &MixerParams,
        seed: u64,
    ) -> Result<()> {
        if self.blocks.is_empty() {
            return Ok(());
        }
        init_weights(
            varmap,
            &join_path(prefix, "forward_blocks"),
            self.num_layers(),
            params,
            seed,
        )
    }
}

impl<M: Module> SequenceMixerStack<M> {
    pub fn from_blocks(blocks: Vec<ResidualBlock<M>>) -> Self {
        Self { blocks }
    }

    pub fn num_layers(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[ResidualBlock<M>] {
        &self.blocks
    }
}

impl<M: Module> Module for SequenceMixerStack<M> {
    /// `[batch, seq_len, channels]` -> same shape.
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut hidden = xs.clone();
        let mut residual: Option<Tensor> = None;

        for block in &self.blocks {
            let (h, r) = block.forward(&hidden, residual.as_ref())?;
            hidden = h;
            residual = Some(r);
        }

        match residual {
            Some(residual) => (hidden.to_dtype(residual.dtype())? + residual)?.to_dtype(xs.dtype()),
            None => Ok(hidden),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{Norm, RmsNorm};
    use crate::testing::{tiny_block_config, Doubler};

    fn to_vec(t: &Tensor) -> Vec<f32> {
        t.flatten_all().expect("flat").to_vec1().expect("vec")
    }

    fn doubler_block(width: usize, layer_idx: usize, device: &Device) -> ResidualBlock<Doubler> {
        let weight = Tensor::ones(width, DType::F32, device).expect("weight");
        ResidualBlock::new(Doubler, Norm::Rms(RmsNorm::new(weight, 0.0)), false, false, layer_idx)
            .expect("block")
    }

    #[test]
    fn stack_preserves_shape() {
        let device = Device::Cpu;
        let cfg = tiny_block_config();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let stack = SequenceMixerStack::new(cfg.hid_feature, &cfg, vb).expect("stack");
        assert_eq!(stack.num_layers(), 1);

        let x = Tensor::randn(0f32, 1.0, (6, 9, cfg.hid_feature), &device).expect("x");
        let y = stack.forward(&x).expect("forward");
        assert_eq!(y.dims(), &[6, 9, cfg.hid_feature]);
    }

    #[test]
    fn empty_stack_is_identity() {
        let device = Device::Cpu;
        let stack: SequenceMixerStack<Doubler> = SequenceMixerStack::from_blocks(vec![]);
        assert_eq!(stack.num_layers(), 0);

        let x = Tensor::randn(0f32, 1.0, (2, 5, 4), &device).expect("x");
        let y = stack.forward(&x).expect("forward");
        assert_eq!(to_vec(&y), to_vec(&x));
    }

    #[test]
    fn single_block_output_is_hidden_plus_residual() {
        let device = Device::Cpu;
        let stack = SequenceMixerStack::from_blocks(vec![doubler_block(4, 0, &device)]);

        // constant rows: norm -> 1, doubled -> 2; output = 2 + input
        let x = (Tensor::ones((1, 3, 4), DType::F32, &device).expect("x") * 5.0).expect("mul");
        let y = stack.forward(&x).expect("forward");
        for v in to_vec(&y) {
            assert!((v - 7.0).abs() < 1e-4, "expected 7.0, got {v}");
        }
    }

    #[test]
    fn residual_is_threaded_across_blocks() {
        let device = Device::Cpu;
        let stack = SequenceMixerStack::from_blocks(vec![
            doubler_block(4, 0, &device),
            doubler_block(4, 1, &device),
        ]);

        // block 0: residual 5, hidden 2; block 1: residual 7, hidden 2; out 9
        let x = (Tensor::ones((1, 2, 4), DType::F32, &device).expect("x") * 5.0).expect("mul");
        let y = stack.forward(&x).expect("forward");
        for v in to_vec(&y) {
            assert!((v - 9.0).abs() < 1e-4, "expected 9.0, got {v}");
        }
    }

    #[test]
    fn with_num_layers_names_blocks() {
        let device = Device::Cpu;
        let cfg = tiny_block_config();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let stack =
            SequenceMixerStack::with_num_layers(cfg.hid_feature, &cfg, 3, vb).expect("stack");

        assert_eq!(stack.num_layers(), 3);
        for (i, block) in stack.blocks().iter().enumerate() {
            assert_eq!(block.layer_idx(), i);
        }
        let data = varmap.data().lock().expect("lock");
        assert!(data.contains_key("forward_blocks.2.mixer.A_log"));
        assert!(!data.contains_key("forward_blocks.3.mixer.A_log"));
    }

    #[test]
    fn forward_does_not_mutate_input() {
        let device = Device::Cpu;
        let stack = SequenceMixerStack::from_blocks(vec![doubler_block(4, 0, &device)]);
        let x = Tensor::randn(0f32, 1.0, (2, 3, 4), &device).expect("x");
        let before = to_vec(&x);
        let _ = stack.forward(&x).expect("forward");
        assert_eq!(to_vec(&x), before);
    }

    #[test]
    fn initialized_stack_gets_mamba_parameters() {
        let cfg = tiny_block_config();
        let (stack, varmap) =
            SequenceMixerStack::initialized(cfg.hid_feature, &cfg, 2, DType::F32, &Device::Cpu, 0)
                .expect("stack");
        assert_eq!(stack.num_layers(), 2);

        let data = varmap.data().lock().expect("lock");
        let a_log: Vec<f32> = data["forward_blocks.1.mixer.A_log"]
            .flatten_all()
            .expect("flat")
            .to_vec1()
            .expect("vec");
        for (n, v) in a_log.iter().take(cfg.mixer.d_state).enumerate() {
            assert!((v - ((n + 1) as f32).ln()).abs() < 1e-6, "A_log[{n}] = {v}");
        }

        let bias = data["forward_blocks.0.mixer.dt_proj.bias"].as_tensor().clone();
        let dt: Vec<f32> = crate::mixer::softplus(&bias)
            .expect("softplus")
            .to_vec1()
            .expect("vec");
        for v in dt {
            assert!(
                v >= cfg.mixer.dt_min as f32 * 0.999 && v <= cfg.mixer.dt_max as f32 * 1.001,
                "dt {v} outside [dt_min, dt_max]"
            );
        }
    }

    #[test]
    fn reset_parameters_stays_inside_the_stack() {
        let cfg = tiny_block_config();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let stack = SequenceMixerStack::new(cfg.hid_feature, &cfg, vb.pp("model.freq"))
            .expect("stack");
        vb.pp("model.head")
            .get_with_hints(3, "weight", candle_nn::Init::Const(0.5))
            .expect("head");

        stack
            .reset_parameters(&varmap, "model.freq", &cfg.mixer, 1)
            .expect("reset");

        let data = varmap.data().lock().expect("lock");
        let head: Vec<f32> = data["model.head.weight"].to_vec1().expect("head");
        assert_eq!(head, vec![0.5; 3]);
        let d: Vec<f32> = data["model.freq.forward_blocks.0.mixer.D"].to_vec1().expect("D");
        assert!(d.iter().all(|v| *v == 1.0));
    }
}
