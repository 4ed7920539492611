//! End-to-end tests for the frequency-axis mixer through the public API.

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::VarBuilder;
use freqmamba_core::{
    BlockConfig, ConfigError, Error, FrequencyAxisMixer, MambaMixer, SequenceMixerStack,
};
use serde_json::{json, Value};

fn to_vec(t: &Tensor) -> Vec<f32> {
    t.flatten_all().expect("flat").to_vec1().expect("vec")
}

fn small_config() -> BlockConfig {
    BlockConfig::new(8, 4, 4, 2, 1e-5)
}

#[test]
fn reference_scenario_keeps_time_and_frequency() {
    let device = Device::Cpu;
    let cfg = BlockConfig::from_value(&json!({ "model_cfg": {
        "hid_feature": 64, "d_state": 16, "d_conv": 4, "expand": 4, "norm_epsilon": 1e-5
    }}))
    .expect("config");
    let (model, _varmap) =
        FrequencyAxisMixer::initialized(&cfg, DType::F32, &device, 0).expect("model");

    let x = Tensor::randn(0f32, 1.0, (2, 64, 100, 8), &device).expect("x");
    let y = model.forward(&x).expect("forward");

    // 64 channels is not a singleton axis, so the layout is kept.
    assert_eq!(y.dims(), &[2, 64, 100, 8]);
    assert!(to_vec(&y).iter().all(|v| v.is_finite()));
}

#[test]
fn single_channel_output_is_batch_time_frequency() {
    let device = Device::Cpu;
    let mut cfg = small_config();
    cfg.hid_feature = 1;
    let (model, _varmap) =
        FrequencyAxisMixer::initialized(&cfg, DType::F32, &device, 0).expect("model");

    let x = Tensor::randn(0f32, 1.0, (2, 1, 10, 8), &device).expect("x");
    let y = model.forward(&x).expect("forward");
    assert_eq!(y.dims(), &[2, 10, 8]);
}

#[test]
fn forward_is_deterministic() {
    let device = Device::Cpu;
    let (model, _varmap) =
        FrequencyAxisMixer::initialized(&small_config(), DType::F32, &device, 5).expect("model");

    let x = Tensor::randn(0f32, 1.0, (3, 8, 12, 6), &device).expect("x");
    let a = to_vec(&model.forward(&x).expect("first"));
    let b = to_vec(&model.forward(&x).expect("second"));
    assert_eq!(a, b, "two forward calls must be bit-identical");
}

#[test]
fn same_seed_builds_identical_blocks() {
    let device = Device::Cpu;
    let cfg = small_config();
    let (m1, _v1) = FrequencyAxisMixer::initialized(&cfg, DType::F32, &device, 9).expect("m1");
    let (m2, _v2) = FrequencyAxisMixer::initialized(&cfg, DType::F32, &device, 9).expect("m2");

    let x = Tensor::randn(0f32, 1.0, (1, 8, 6, 3), &device).expect("x");
    assert_eq!(
        to_vec(&m1.forward(&x).expect("m1")),
        to_vec(&m2.forward(&x).expect("m2"))
    );
}

#[test]
fn sequence_stack_preserves_shape() {
    let device = Device::Cpu;
    let cfg = small_config();
    let (model, _varmap) =
        FrequencyAxisMixer::initialized(&cfg, DType::F32, &device, 1).expect("model");

    let x = Tensor::randn(0f32, 1.0, (5, 11, 8), &device).expect("x");
    let y = model.sequence_mixer().forward(&x).expect("forward");
    assert_eq!(y.dims(), &[5, 11, 8]);
}

#[test]
fn empty_stack_passes_input_through() {
    let stack: SequenceMixerStack<MambaMixer> = SequenceMixerStack::from_blocks(Vec::new());
    let x = Tensor::randn(0f32, 1.0, (2, 4, 8), &Device::Cpu).expect("x");
    let y = stack.forward(&x).expect("forward");
    assert_eq!(to_vec(&y), to_vec(&x));
}

#[test]
fn construction_fails_on_each_missing_key() {
    let full = json!({ "model_cfg": {
        "hid_feature": 8, "d_state": 4, "d_conv": 4, "expand": 2, "norm_epsilon": 1e-5
    }});
    for name in ["d_state", "d_conv", "expand", "norm_epsilon", "hid_feature"] {
        let mut root: Value = full.clone();
        root["model_cfg"]
            .as_object_mut()
            .expect("object")
            .remove(name);

        let result =
            FrequencyAxisMixer::from_value(&root, VarBuilder::zeros(DType::F32, &Device::Cpu));
        match result {
            Err(Error::Config(ConfigError::MissingKey { key })) => {
                assert_eq!(key, format!("model_cfg.{name}"))
            }
            Err(other) => panic!("expected MissingKey for {name}, got {other}"),
            Ok(_) => panic!("construction without {name} must fail"),
        }
    }
}

#[test]
fn channel_mismatch_fails_before_compute() {
    let device = Device::Cpu;
    let model = FrequencyAxisMixer::new(&small_config(), VarBuilder::zeros(DType::F32, &device))
        .expect("model");
    let x = Tensor::zeros((1, 4, 3, 2), DType::F32, &device).expect("x");
    assert!(model.forward(&x).is_err());
}
