//! Selective scan (S6) over a full sequence.
//!
//! Implements the discretized state space recurrence:
//!
//! ```text
//!   h_t = exp(delta_t * A) * h_{t-1} + delta_t * B_t * x_t
//!   y_t = C_t . h_t + D * x_t
//! ```
//!
//! Discretization happens one step at a time, so only the running state
//! `[batch, d_inner, d_state]` is held in memory, never a per-step copy of it.

use candle_core::{Result, Tensor, D};

/// Selective scan forward pass (CPU reference path, also runs on CUDA).
///
/// # Arguments
/// * `x` - Input tensor `[batch, seq_len, d_inner]`
/// * `delta` - Positive time steps `[batch, seq_len, d_inner]`
/// * `a` - State transition matrix `[d_inner, d_state]` (negative for decay)
/// * `b` - Input projection `[batch, seq_len, d_state]`
/// * `c` - Output projection `[batch, seq_len, d_state]`
/// * `d` - Skip weight `[d_inner]`
///
/// # Returns
/// `[batch, seq_len, d_inner]`
pub fn selective_scan(
    x: &Tensor,
    delta: &Tensor,
    a: &Tensor,
    b: &Tensor,
    c: &Tensor,
    d: &Tensor,
) -> Result<Tensor> {
    let (batch, seq_len, d_inner) = x.dims3()?;
    let (_d_inner_a, d_state) = a.dims2()?;
    if seq_len == 0 {
        candle_core::bail!("selective scan needs at least one time step");
    }

    let a = a.unsqueeze(0)?; // [1, d_inner, d_state]
    let mut h = Tensor::zeros((batch, d_inner, d_state), x.dtype(), x.device())?;
    let mut ys = Vec::with_capacity(seq_len);
    for t in 0..seq_len {
        let x_t = x.narrow(1, t, 1)?.squeeze(1)?; // [batch, d_inner]
        let delta_t = delta.narrow(1, t, 1)?.squeeze(1)?;
        let b_t = b.narrow(1, t, 1)?.squeeze(1)?.unsqueeze(1)?; // [batch, 1, d_state]
        let c_t = c.narrow(1, t, 1)?.squeeze(1)?.unsqueeze(1)?;

        let delta_a = delta_t.unsqueeze(2)?.broadcast_mul(&a)?.exp()?;
        let delta_b_x = (&delta_t * &x_t)?.unsqueeze(2)?.broadcast_mul(&b_t)?;
        h = ((delta_a * &h)? + delta_b_x)?;

        ys.push(h.broadcast_mul(&c_t)?.sum(D::Minus1)?); // [batch, d_inner]
    }

    let y = Tensor::stack(&ys, 1)?; // [batch, seq_len, d_inner]
    y + x.broadcast_mul(d)?
}
