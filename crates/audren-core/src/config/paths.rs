//! Standard locations for renderer configuration files

use std::path::PathBuf;

/// Directory holding renderer configuration
///
/// Returns: `{config_dir}/audren` (e.g. `~/.config/audren` on Linux), or
/// `./audren` when the platform has no config directory.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("audren")
}

/// Get the default config file path for a given file name
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_ends_with_app_name() {
        assert!(default_config_dir().ends_with("audren"));
    }

    #[test]
    fn test_config_path_includes_filename() {
        let path = default_config_path("renderer.yaml");
        assert!(path.ends_with("renderer.yaml"));
    }
}
