//! Command handler modules for the `tsp` CLI.
//!
//! Shared utilities used by multiple command paths live here.

pub mod replay;

use anyhow::Result;
use tsp_config::{LoadedConfig, UnusedKeyPolicy};

/// Load layered config. No paths means built-in defaults.
pub fn load_config(paths: &[String]) -> Result<LoadedConfig> {
    if paths.is_empty() {
        return LoadedConfig::empty();
    }
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    tsp_config::load_layered_yaml(&path_refs)
}

/// Report config leaves nothing reads. Warn logs them; Fail errors.
pub fn check_unused_keys(loaded: &LoadedConfig, policy: UnusedKeyPolicy) -> Result<()> {
    let report = tsp_config::report_unused_keys(&loaded.config_json, policy)?;
    for ptr in &report.unused_leaf_pointers {
        tracing::warn!(pointer = %ptr, "config key is not used");
    }
    Ok(())
}
