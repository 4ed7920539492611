//! Mamba selective state space mixer.
//!
//! ```text
//! x ─ in_proj ─┬─ x ─ conv1d ─ SiLU ─ x_proj ─ (dt, B, C) ─ SSM ─┐
//!              └─ z ─────────────────────────── SiLU ─────────── * ─ out_proj
//! ```
//!
//! Shape-preserving over `[batch, seq_len, d_model]`. Parameter names match
//! the reference `Mamba` module (`in_proj`, `conv1d`, `x_proj`, `dt_proj`,
//! `A_log`, `D`, `out_proj`), so checkpoints load by name.

use candle_core::{Module, Result, Tensor, D};
use candle_nn::{Init, Linear, VarBuilder};

use crate::config::MixerParams;
use crate::ssm::{causal_conv1d, selective_scan};

/// Linear layer with PyTorch's default init: `U(-1/sqrt(in), 1/sqrt(in))`.
pub(crate) fn linear(in_dim: usize, out_dim: usize, bias: bool, vb: VarBuilder) -> Result<Linear> {
    let bound = 1.0 / (in_dim as f64).sqrt();
    let uniform = || Init::Uniform {
        lo: -bound,
        up: bound,
    };
    let weight = vb.get_with_hints((out_dim, in_dim), "weight", uniform())?;
    let bias = if bias {
        Some(vb.get_with_hints(out_dim, "bias", uniform())?)
    } else {
        None
    };
    Ok(Linear::new(weight, bias))
}

#[derive(Clone, Debug)]
pub struct MambaMixer {
    in_proj: Linear,
    conv1d_weight: Tensor,
    conv1d_bias: Option<Tensor>,
    x_proj: Linear,
    dt_proj: Linear,
    a_log: Tensor,
    d: Tensor,
    out_proj: Linear,
    d_inner: usize,
    d_state: usize,
    dt_rank: usize,
    layer_idx: usize,
}

impl MambaMixer {
    /// Build a mixer for `d_model` channels.
    ///
    /// Fresh parameters get the PyTorch layer defaults; `A_log` and the
    /// `dt_proj` bias only receive their Mamba-specific values from
    /// [`crate::init::init_weights`].
    pub fn new(d_model: usize, layer_idx: usize, params: &MixerParams, vb: VarBuilder) -> Result<Self> {
        let d_inner = params.d_inner(d_model);
        let d_state = params.d_state;
        let d_conv = params.d_conv;
        let dt_rank = params.dt_rank(d_model);

        let in_proj = linear(d_model, 2 * d_inner, params.bias, vb.pp("in_proj"))?;

        let conv_bound = 1.0 / (d_conv as f64).sqrt();
        let conv_init = || Init::Uniform {
            lo: -conv_bound,
            up: conv_bound,
        };
        let vb_conv = vb.pp("conv1d");
        let conv1d_weight = vb_conv.get_with_hints((d_inner, 1, d_conv), "weight", conv_init())?;
        let conv1d_bias = if params.conv_bias {
            Some(vb_conv.get_with_hints(d_inner, "bias", conv_init())?)
        } else {
            None
        };

        let x_proj = linear(d_inner, dt_rank + 2 * d_state, false, vb.pp("x_proj"))?;

        let dt_std = (dt_rank as f64).powf(-0.5) * params.dt_scale;
        let vb_dt = vb.pp("dt_proj");
        let dt_proj = Linear::new(
            vb_dt.get_with_hints(
                (d_inner, dt_rank),
                "weight",
                Init::Uniform {
                    lo: -dt_std,
                    up: dt_std,
                },
            )?,
            Some(vb_dt.get_with_hints(d_inner, "bias", Init::Const(0.0))?),
        );

        let a_log = vb.get_with_hints((d_inner, d_state), "A_log", Init::Const(0.0))?;
        let d = vb.get_with_hints(d_inner, "D", Init::Const(1.0))?;

        let out_proj = linear(d_inner, d_model, params.bias, vb.pp("out_proj"))?;

        tracing::debug!(layer_idx, d_model, d_inner, d_state, d_conv, dt_rank, "built Mamba mixer");

        Ok(Self {
            in_proj,
            conv1d_weight,
            conv1d_bias,
            x_proj,
            dt_proj,
            a_log,
            d,
            out_proj,
            d_inner,
            d_state,
            dt_rank,
            layer_idx,
        })
    }

    pub fn layer_idx(&self) -> usize {
        self.layer_idx
    }

    pub fn d_inner(&self) -> usize {
        self.d_inner
    }

    pub fn d_state(&self) -> usize {
        self.d_state
    }

    pub fn dt_rank(&self) -> usize {
        self.dt_rank
    }
}

impl Module for MambaMixer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (_batch, _seq_len, _d_model) = xs.dims3()?;

        let xz = self.in_proj.forward(xs)?; // [batch, seq_len, 2*d_inner]
        let x = xz.narrow(D::Minus1, 0, self.d_inner)?;
        let z = xz.narrow(D::Minus1, self.d_inner, self.d_inner)?;

        // Conv runs channels-first: [batch, d_inner, seq_len]
        let x = x.transpose(1, 2)?.contiguous()?;
        let x = causal_conv1d(&x, &self.conv1d_weight, self.conv1d_bias.as_ref())?;
        let x = candle_nn::ops::silu(&x.transpose(1, 2)?.contiguous()?)?;

        let x_dbl = self.x_proj.forward(&x)?; // [batch, seq_len, dt_rank + 2*d_state]
        let dt = x_dbl.narrow(D::Minus1, 0, self.dt_rank)?.contiguous()?;
        let b = x_dbl
            .narrow(D::Minus1, self.dt_rank, self.d_state)?
            .contiguous()?;
        let c = x_dbl
            .narrow(D::Minus1, self.dt_rank + self.d_state, self.d_state)?
            .contiguous()?;

        let delta = softplus(&self.dt_proj.forward(&dt)?)?;
        let a = self.a_log.exp()?.neg()?;
        let y = selective_scan(&x, &delta, &a, &b, &c, &self.d)?;

        let y = (y * candle_nn::ops::silu(&z.contiguous()?)?)?;
        self.out_proj.forward(&y)
    }
}

/// Numerically stable softplus: `max(x, 0) + log(1 + exp(-|x|))`.
pub(crate) fn softplus(x: &Tensor) -> Result<Tensor> {
    let tail = (x.abs()?.neg()?.exp()? + 1.0)?.log()?;
    x.relu()? + tail
}
