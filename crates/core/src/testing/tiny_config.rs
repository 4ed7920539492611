use serde_json::{json, Value};

use crate::config::BlockConfig;

/// Create a tiny block config for testing (8 channels, d_state 4, expand 2).
/// Small enough that a full forward pass over a few frames runs in milliseconds.
pub fn tiny_block_config() -> BlockConfig {
    BlockConfig::new(8, 4, 4, 2, 1e-5)
}

/// The root mapping form of [`tiny_block_config`], as the surrounding
/// network would pass it.
pub fn tiny_config_json() -> Value {
    json!({
        "model_cfg": {
            "hid_feature": 8,
            "d_state": 4,
            "d_conv": 4,
            "expand": 2,
            "norm_epsilon": 1e-5
        }
    })
}
