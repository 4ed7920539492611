//! Block configuration read from the nested `model_cfg` mapping.
//!
//! The surrounding network hands every submodule the same JSON mapping, so
//! unknown keys are ignored. The five keys the block cannot guess
//! (`d_state`, `d_conv`, `expand`, `norm_epsilon`, `hid_feature`) are
//! required; everything else falls back to the reference Mamba defaults.
//!
//! ```json
//! { "model_cfg": { "hid_feature": 64, "d_state": 16, "d_conv": 4,
//!                  "expand": 4, "norm_epsilon": 1e-5 } }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Name of the section holding the block hyperparameters.
pub const MODEL_CFG: &str = "model_cfg";

/// Which tensor is added back after the channel remix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemixSkip {
    /// The folded block input, before the sequence mixer (checkpoint-compatible).
    #[default]
    Input,
    /// The sequence-mixer output, i.e. a skip around the remix layer only.
    MixerOutput,
}

/// Hyperparameters of one Mamba sequence-mixing layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixerParams {
    pub d_state: usize,
    pub d_conv: usize,
    pub expand: usize,
    /// `None` means `ceil(d_model / 16)`.
    pub dt_rank: Option<usize>,
    pub dt_min: f64,
    pub dt_max: f64,
    pub dt_init_floor: f64,
    pub dt_scale: f64,
    pub conv_bias: bool,
    pub bias: bool,
}

impl MixerParams {
    pub fn new(d_state: usize, d_conv: usize, expand: usize) -> Self {
        Self {
            d_state,
            d_conv,
            expand,
            dt_rank: None,
            dt_min: 0.001,
            dt_max: 0.1,
            dt_init_floor: 1e-4,
            dt_scale: 1.0,
            conv_bias: true,
            bias: false,
        }
    }

    pub fn d_inner(&self, d_model: usize) -> usize {
        self.expand * d_model
    }

    pub fn dt_rank(&self, d_model: usize) -> usize {
        self.dt_rank.unwrap_or_else(|| d_model.div_ceil(16))
    }
}

/// Resolved configuration of the frequency-axis block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockConfig {
    pub hid_feature: usize,
    pub norm_epsilon: f64,
    pub rms_norm: bool,
    pub residual_in_fp32: bool,
    pub remix_skip: RemixSkip,
    pub mixer: MixerParams,
}

impl BlockConfig {
    /// Config with the required values set and every optional key at its default.
    pub fn new(
        hid_feature: usize,
        d_state: usize,
        d_conv: usize,
        expand: usize,
        norm_epsilon: f64,
    ) -> Self {
        Self {
            hid_feature,
            norm_epsilon,
            rms_norm: true,
            residual_in_fp32: false,
            remix_skip: RemixSkip::default(),
            mixer: MixerParams::new(d_state, d_conv, expand),
        }
    }

    /// Extract the block config from the root mapping (`{"model_cfg": {...}}`).
    pub fn from_value(root: &Value) -> Result<Self, ConfigError> {
        let model_cfg = root
            .get(MODEL_CFG)
            .ok_or_else(|| ConfigError::missing(MODEL_CFG))?
            .as_object()
            .ok_or_else(|| ConfigError::invalid_type(MODEL_CFG, "mapping"))?;
        Self::from_model_cfg(model_cfg)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let root: Value = serde_json::from_str(s)?;
        Self::from_value(&root)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Extract the block config from the `model_cfg` section itself.
    pub fn from_model_cfg(cfg: &Map<String, Value>) -> Result<Self, ConfigError> {
        let d_state = required_usize(cfg, "d_state")?;
        let d_conv = required_usize(cfg, "d_conv")?;
        let expand = required_usize(cfg, "expand")?;
        let norm_epsilon = required_f64(cfg, "norm_epsilon")?;
        let hid_feature = required_usize(cfg, "hid_feature")?;

        let mut mixer = MixerParams::new(d_state, d_conv, expand);
        mixer.dt_rank = dt_rank(cfg)?;
        mixer.dt_min = optional_f64(cfg, "dt_min", mixer.dt_min)?;
        mixer.dt_max = optional_f64(cfg, "dt_max", mixer.dt_max)?;
        mixer.dt_init_floor = optional_f64(cfg, "dt_init_floor", mixer.dt_init_floor)?;
        mixer.dt_scale = optional_f64(cfg, "dt_scale", mixer.dt_scale)?;
        mixer.conv_bias = optional_bool(cfg, "conv_bias", mixer.conv_bias)?;
        mixer.bias = optional_bool(cfg, "bias", mixer.bias)?;

        let config = Self {
            hid_feature,
            norm_epsilon,
            rms_norm: optional_bool(cfg, "rms_norm", true)?,
            residual_in_fp32: optional_bool(cfg, "residual_in_fp32", false)?,
            remix_skip: remix_skip(cfg)?,
            mixer,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints the per-key extraction cannot see.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("hid_feature", self.hid_feature),
            ("d_state", self.mixer.d_state),
            ("d_conv", self.mixer.d_conv),
            ("expand", self.mixer.expand),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid_value(&key(name), "must be positive"));
            }
        }
        if self.mixer.dt_rank == Some(0) {
            return Err(ConfigError::invalid_value(&key("dt_rank"), "must be positive"));
        }
        if !(self.norm_epsilon.is_finite() && self.norm_epsilon > 0.0) {
            return Err(ConfigError::invalid_value(
                &key("norm_epsilon"),
                format!("must be a positive finite number, got {}", self.norm_epsilon),
            ));
        }
        if !(self.mixer.dt_min > 0.0 && self.mixer.dt_min <= self.mixer.dt_max) {
            return Err(ConfigError::invalid_value(
                &key("dt_min"),
                format!(
                    "need 0 < dt_min <= dt_max, got dt_min={} dt_max={}",
                    self.mixer.dt_min, self.mixer.dt_max
                ),
            ));
        }
        if !(self.mixer.dt_scale.is_finite() && self.mixer.dt_scale > 0.0) {
            return Err(ConfigError::invalid_value(&key("dt_scale"), "must be positive"));
        }
        if self.mixer.dt_init_floor < 0.0 {
            return Err(ConfigError::invalid_value(
                &key("dt_init_floor"),
                "must not be negative",
            ));
        }
        Ok(())
    }
}

fn key(name: &str) -> String {
    format!("{MODEL_CFG}.{name}")
}

fn required_usize(cfg: &Map<String, Value>, name: &str) -> Result<usize, ConfigError> {
    let value = cfg.get(name).ok_or_else(|| ConfigError::missing(&key(name)))?;
    as_usize(value, name)
}

fn required_f64(cfg: &Map<String, Value>, name: &str) -> Result<f64, ConfigError> {
    cfg.get(name)
        .ok_or_else(|| ConfigError::missing(&key(name)))?
        .as_f64()
        .ok_or_else(|| ConfigError::invalid_type(&key(name), "float"))
}

fn optional_f64(cfg: &Map<String, Value>, name: &str, default: f64) -> Result<f64, ConfigError> {
    match cfg.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_f64()
            .ok_or_else(|| ConfigError::invalid_type(&key(name), "float")),
    }
}

fn optional_bool(cfg: &Map<String, Value>, name: &str, default: bool) -> Result<bool, ConfigError> {
    match cfg.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| ConfigError::invalid_type(&key(name), "bool")),
    }
}

fn as_usize(value: &Value, name: &str) -> Result<usize, ConfigError> {
    value
        .as_u64()
        .map(|v| v as usize)
        .ok_or_else(|| ConfigError::invalid_type(&key(name), "non-negative integer"))
}

fn dt_rank(cfg: &Map<String, Value>) -> Result<Option<usize>, ConfigError> {
    match cfg.get("dt_rank") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s == "auto" => Ok(None),
        Some(Value::String(s)) => Err(ConfigError::invalid_value(
            &key("dt_rank"),
            format!("expected \"auto\" or an integer, got {s:?}"),
        )),
        Some(v) => as_usize(v, "dt_rank").map(Some),
    }
}

fn remix_skip(cfg: &Map<String, Value>) -> Result<RemixSkip, ConfigError> {
    match cfg.get("remix_skip") {
        None | Some(Value::Null) => Ok(RemixSkip::default()),
        Some(Value::String(s)) => match s.as_str() {
            "input" => Ok(RemixSkip::Input),
            "mixer_output" => Ok(RemixSkip::MixerOutput),
            other => Err(ConfigError::invalid_value(
                &key("remix_skip"),
                format!("expected \"input\" or \"mixer_output\", got {other:?}"),
            )),
        },
        Some(_) => Err(ConfigError::invalid_type(&key("remix_skip"), "string")),
    }
}
