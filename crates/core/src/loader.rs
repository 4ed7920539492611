use std::path::{Path, PathBuf};

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};

use crate::config::BlockConfig;
use crate::frequency::FrequencyAxisMixer;

/// Creates a VarBuilder from safetensor weight files.
pub fn load_weights(
    paths: &[PathBuf],
    dtype: DType,
    device: &Device,
) -> anyhow::Result<VarBuilder<'static>> {
    if paths.is_empty() {
        anyhow::bail!("no weight files given");
    }
    for path in paths {
        if !path.exists() {
            anyhow::bail!("weight file not found: {}", path.display());
        }
    }
    // SAFETY: the files are memory-mapped read-only; they must not be
    // modified while the VarBuilder is alive.
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(paths, dtype, device)? };
    Ok(vb)
}

/// Loads a trained block from a config file and safetensor checkpoints.
///
/// `prefix` selects where the block's parameters sit inside a larger
/// network's state dict (e.g. `"tf_blocks.0"`); `None` means the root.
pub fn load_block(
    config_path: impl AsRef<Path>,
    weight_paths: &[PathBuf],
    prefix: Option<&str>,
    dtype: DType,
    device: &Device,
) -> anyhow::Result<FrequencyAxisMixer> {
    let config_path = config_path.as_ref();
    let cfg = BlockConfig::from_path(config_path)?;
    let vb = load_weights(weight_paths, dtype, device)?;
    let vb = match prefix {
        Some(prefix) => vb.pp(prefix),
        None => vb,
    };
    let block = FrequencyAxisMixer::new(&cfg, vb)?;
    tracing::info!(
        config = %config_path.display(),
        num_weight_files = weight_paths.len(),
        prefix = prefix.unwrap_or(""),
        "loaded frequency-axis mixer"
    );
    Ok(block)
}

/// Writes every variable of `varmap` to a safetensors file.
pub fn save_weights(varmap: &VarMap, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let path = path.as_ref();
    varmap.save(path)?;
    tracing::info!(path = %path.display(), "saved weights");
    Ok(())
}
