//! Frequency-axis Mamba mixing block for time-frequency audio networks.
//!
//! [`FrequencyAxisMixer`] takes a `[batch, channel, time, frequency]`
//! feature map, runs a Mamba selective state space stack along time for
//! every frequency bin, remixes channels with a 1x1 transposed convolution
//! and adds a skip connection.

pub mod block;
pub mod config;
pub mod error;
pub mod frequency;
pub mod init;
pub mod layers;
pub mod loader;
pub mod mixer;
pub mod shape;
pub mod ssm;
pub mod stack;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use block::{create_block, ResidualBlock};
pub use config::{BlockConfig, MixerParams, RemixSkip};
pub use error::{ConfigError, Error, Result};
pub use frequency::FrequencyAxisMixer;
pub use init::init_weights;
pub use mixer::MambaMixer;
pub use stack::SequenceMixerStack;
