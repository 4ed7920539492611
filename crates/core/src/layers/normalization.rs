use candle_core::{Module, Result, Tensor};
use candle_nn::{Init, VarBuilder};

/// Root-mean-square normalization over the last axis (no mean centering).
#[derive(Clone, Debug)]
pub struct RmsNorm {
    weight: Tensor,
    eps: f64,
}

impl RmsNorm {
    pub fn new(weight: Tensor, eps: f64) -> Self {
        Self { weight, eps }
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }
}

impl Module for RmsNorm {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        candle_nn::ops::rms_norm(&xs.contiguous()?, &self.weight, self.eps as f32)
    }
}

/// Create an RMSNorm layer; a fresh weight starts at one.
pub fn rms_norm(size: usize, eps: f64, vb: VarBuilder) -> Result<RmsNorm> {
    let weight = vb.get_with_hints(size, "weight", Init::Const(1.0))?;
    Ok(RmsNorm::new(weight, eps))
}

/// The pre-mixer normalization of a residual block.
///
/// RMS normalization is the default; `rms_norm = false` in the config selects
/// a mean-centering LayerNorm with bias.
#[derive(Clone, Debug)]
pub enum Norm {
    Rms(RmsNorm),
    Layer(candle_nn::LayerNorm),
}

impl Norm {
    pub fn new(size: usize, eps: f64, rms: bool, vb: VarBuilder) -> Result<Self> {
        if rms {
            return Ok(Self::Rms(rms_norm(size, eps, vb)?));
        }
        let weight = vb.get_with_hints(size, "weight", Init::Const(1.0))?;
        let bias = vb.get_with_hints(size, "bias", Init::Const(0.0))?;
        Ok(Self::Layer(candle_nn::LayerNorm::new(weight, bias, eps)))
    }

    pub fn weight(&self) -> &Tensor {
        match self {
            Self::Rms(norm) => norm.weight(),
            Self::Layer(norm) => norm.weight(),
        }
    }
}

impl Module for Norm {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Self::Rms(norm) => norm.forward(xs),
            Self::Layer(norm) => norm.forward(xs),
        }
    }
}
