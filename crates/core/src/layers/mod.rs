pub mod normalization;
pub mod remix;

pub use normalization::{rms_norm, Norm, RmsNorm};
pub use remix::ChannelRemix;
