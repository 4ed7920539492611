//! In-place weight initialization for a freshly built block.
//!
//! Walks the variables of a [`VarMap`] that sit under one module prefix, in
//! name order, and rewrites them from a seeded RNG, so two blocks built with
//! the same seed are identical. Variables outside the prefix are untouched,
//! which lets the block share a map with the rest of a network. The value
//! each parameter gets depends on its role, recognized from the name:
//!
//! | parameter            | init                                                   |
//! |----------------------|--------------------------------------------------------|
//! | `A_log`              | `log(1..=d_state)` on every row (S4D-real)             |
//! | `D`                  | ones                                                   |
//! | `dt_proj.weight`     | `U(±dt_scale / sqrt(dt_rank))`                          |
//! | `dt_proj.bias`       | `softplus⁻¹(dt)`, `dt` log-uniform in `[dt_min, dt_max]` |
//! | `out_proj.weight`    | fan-in uniform scaled by `1 / sqrt(n_layer)`           |
//! | other linear biases  | zeros                                                  |
//! | `norm.*`             | weight ones, bias zeros                                |
//! | anything else        | `U(±1/sqrt(fan_in))` (PyTorch layer default)           |
//!
//! The `1 / sqrt(n_layer)` factor keeps the variance of the residual stream
//! independent of depth.

use candle_core::{Device, Result, Tensor};
use candle_nn::VarMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::MixerParams;

/// Residual branches per block that write into the residual stream.
const N_RESIDUALS_PER_LAYER: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamRole {
    ALog,
    SkipD,
    DtWeight,
    DtBias,
    OutProjWeight,
    LinearBias,
    NormWeight,
    NormBias,
    Weight,
    Bias,
}

fn classify(name: &str) -> ParamRole {
    let leaf = name.rsplit('.').next().unwrap_or(name);
    let owner = name
        .strip_suffix(leaf)
        .map(|s| s.trim_end_matches('.'))
        .unwrap_or("");
    let owner_leaf = owner.rsplit('.').next().unwrap_or(owner);

    match (owner_leaf, leaf) {
        (_, "A_log") => ParamRole::ALog,
        (_, "D") => ParamRole::SkipD,
        ("dt_proj", "weight") => ParamRole::DtWeight,
        ("dt_proj", "bias") => ParamRole::DtBias,
        ("out_proj", "weight") => ParamRole::OutProjWeight,
        ("in_proj" | "x_proj" | "out_proj", "bias") => ParamRole::LinearBias,
        ("norm", "weight") => ParamRole::NormWeight,
        ("norm", "bias") => ParamRole::NormBias,
        (_, "bias") => ParamRole::Bias,
        _ => ParamRole::Weight,
    }
}

/// PyTorch's fan-in: `dims[1] * receptive_field`.
fn fan_in(dims: &[usize]) -> usize {
    match dims {
        [] => 1,
        [n] => *n,
        [_, rest @ ..] => rest.iter().product(),
    }
}

fn uniform(rng: &mut StdRng, n: usize, bound: f64) -> Vec<f32> {
    if bound == 0.0 {
        return vec![0.0; n];
    }
    (0..n)
        .map(|_| rng.gen_range(-bound..bound) as f32)
        .collect()
}

/// `x + log(-expm1(-x))`, the inverse of softplus.
fn inverse_softplus(x: f64) -> f64 {
    x + (-(-x).exp_m1()).ln()
}

fn dt_bias(rng: &mut StdRng, n: usize, params: &MixerParams) -> Vec<f32> {
    let (lo, hi) = (params.dt_min.ln(), params.dt_max.ln());
    (0..n)
        .map(|_| {
            let dt = (lo + rng.gen::<f64>() * (hi - lo))
                .exp()
                .max(params.dt_init_floor);
            inverse_softplus(dt) as f32
        })
        .collect()
}

fn a_log(d_inner: usize, d_state: usize) -> Vec<f32> {
    (0..d_inner)
        .flat_map(|_| (1..=d_state).map(|n| (n as f32).ln()))
        .collect()
}

fn values(
    role: ParamRole,
    dims: &[usize],
    sibling_weight: Option<&[usize]>,
    n_layer: usize,
    params: &MixerParams,
    rng: &mut StdRng,
) -> Vec<f32> {
    let n: usize = dims.iter().product();
    match role {
        ParamRole::ALog => {
            let d_state = dims.last().copied().unwrap_or(0);
            a_log(n / d_state.max(1), d_state)
        }
        ParamRole::SkipD | ParamRole::NormWeight => vec![1.0; n],
        ParamRole::NormBias | ParamRole::LinearBias => vec![0.0; n],
        ParamRole::DtWeight => {
            let dt_rank = dims.get(1).copied().unwrap_or(1);
            uniform(rng, n, (dt_rank as f64).powf(-0.5) * params.dt_scale)
        }
        ParamRole::DtBias => dt_bias(rng, n, params),
        ParamRole::OutProjWeight => {
            let bound = 1.0 / (fan_in(dims) as f64).sqrt();
            let scale = ((N_RESIDUALS_PER_LAYER * n_layer.max(1)) as f64).sqrt();
            uniform(rng, n, bound / scale)
        }
        ParamRole::Weight => uniform(rng, n, 1.0 / (fan_in(dims) as f64).sqrt()),
        ParamRole::Bias => {
            let fan = sibling_weight.map(fan_in).unwrap_or(n);
            uniform(rng, n, 1.0 / (fan as f64).sqrt())
        }
    }
}

/// `prefix.child`, or `child` at the root.
pub(crate) fn join_path(prefix: &str, child: &str) -> String {
    if prefix.is_empty() {
        child.to_string()
    } else {
        format!("{prefix}.{child}")
    }
}

fn in_scope(name: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || name
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

/// Initialize the parameters of `varmap` under `prefix` for a stack of
/// `n_layer` blocks. An empty prefix selects every variable.
///
/// Fails when nothing lives under `prefix`.
pub fn init_weights(
    varmap: &VarMap,
    prefix: &str,
    n_layer: usize,
    params: &MixerParams,
    seed: u64,
) -> Result<()> {
    let data = varmap
        .data()
        .lock()
        .map_err(|e| candle_core::Error::Msg(format!("var map lock poisoned: {e}")))?;

    let mut names: Vec<&String> = data.keys().filter(|n| in_scope(n, prefix)).collect();
    if names.is_empty() {
        candle_core::bail!("no parameters to initialize under prefix {prefix:?}");
    }
    names.sort_unstable();

    let mut rng = StdRng::seed_from_u64(seed);
    for name in &names {
        let var = &data[*name];
        let dims = var.dims().to_vec();
        let role = classify(name);
        let sibling_weight = name
            .strip_suffix("bias")
            .and_then(|owner| data.get(&format!("{owner}weight")))
            .map(|w| w.dims().to_vec());

        let vals = values(role, &dims, sibling_weight.as_deref(), n_layer, params, &mut rng);
        let tensor = Tensor::from_vec(vals, dims.as_slice(), &Device::Cpu)?
            .to_dtype(var.dtype())?
            .to_device(var.device())?;
        var.set(&tensor)?;
        tracing::trace!(name = name.as_str(), ?role, "initialized parameter");
    }

    tracing::debug!(prefix, n_layer, seed, num_params = names.len(), "weights initialized");
    Ok(())
}
