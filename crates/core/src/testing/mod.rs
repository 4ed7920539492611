//! Shared test utilities for freqmamba-core.
//!
//! Tiny block configurations and stand-in mixers for exercising the
//! residual and reshape plumbing without a real Mamba layer.

mod mock_mixer;
mod tiny_config;

pub use mock_mixer::Doubler;
pub use tiny_config::{tiny_block_config, tiny_config_json};
