//! YAML configuration loading and saving

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Parse a configuration file, `Ok(None)` when it does not exist
fn try_load_config<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    let config = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;
    Ok(Some(config))
}

/// Load configuration from a YAML file
///
/// A missing file yields the defaults. A file that cannot be read or parsed
/// is logged and also yields the defaults, so a broken config never keeps the
/// renderer from starting.
///
/// # Example
///
/// ```ignore
/// let config: RendererConfig = load_config(Path::new("renderer.yaml"));
/// ```
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    match try_load_config(path) {
        Ok(Some(config)) => {
            log::info!("Loaded config from {:?}", path);
            config
        }
        Ok(None) => {
            log::info!("No config at {:?}, using defaults", path);
            T::default()
        }
        Err(e) => {
            log::warn!("{:#}, using defaults", e);
            T::default()
        }
    }
}

/// Save configuration to a YAML file, creating parent directories
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("Saved config to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RendererConfig, SinkBackend};

    #[test]
    fn test_load_nonexistent_returns_default() {
        let config: RendererConfig = load_config(Path::new("/nonexistent/path/renderer.yaml"));
        assert_eq!(config, RendererConfig::default());
    }

    #[test]
    fn test_load_invalid_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renderer.yaml");
        std::fs::write(&path, "renderer: [not, a, map").unwrap();

        let config: RendererConfig = load_config(&path);
        assert_eq!(config, RendererConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("renderer.yaml");

        let mut config = RendererConfig::default();
        config.renderer.voice_count = 12;
        config.output.channels = 6;
        config.output.backend = SinkBackend::Wav {
            path: "out.wav".into(),
        };
        config.trace_commands = true;

        save_config(&config, &path).unwrap();
        let loaded: RendererConfig = load_config(&path);
        assert_eq!(loaded, config);
    }
}
