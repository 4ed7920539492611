//! State space building blocks for the Mamba mixer.
//!
//! Both operate on whole sequences; the block never runs step-by-step
//! decode, so there is no recurrent state carried between calls.

pub mod causal_conv1d;
pub mod selective_scan;

pub use causal_conv1d::causal_conv1d;
pub use selective_scan::selective_scan;
