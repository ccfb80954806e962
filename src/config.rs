use std::{
    fs,
    path::{Path, PathBuf},
};

use peerref_vm::RuntimeConfig;

use crate::CliError;

/// `<config_dir>/peerref/runtime.json`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut path| {
        path.push("peerref");
        path.push("runtime.json");
        path
    })
}

/// Reads the runtime configuration. An explicit path must exist; the
/// default location is optional and falls back to built-in defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<RuntimeConfig, CliError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path().filter(|path| path.is_file()) {
            Some(path) => path,
            None => {
                log::debug!("No runtime configuration found, using defaults");
                return Ok(RuntimeConfig::default());
            }
        },
    };
    let text = fs::read_to_string(&path).map_err(|e| CliError::Config {
        path: path.clone(),
        message: e.to_string(),
    })?;
    let config = serde_json::from_str(&text).map_err(|e| CliError::Config {
        path: path.clone(),
        message: e.to_string(),
    })?;
    log::debug!("Loaded runtime configuration from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "max_attached_threads": 3 }}"#).unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.max_attached_threads, 3);
        assert_eq!(
            config.local_ref_warning_threshold,
            RuntimeConfig::default().local_ref_warning_threshold
        );
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        assert!(matches!(
            load_config(Some(&missing)),
            Err(CliError::Config { path, .. }) if path == missing
        ));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "max_attached_threads = 3").unwrap();
        assert!(matches!(
            load_config(Some(file.path())),
            Err(CliError::Config { .. })
        ));
    }

    #[test]
    fn test_default_path_ends_in_runtime_json() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("peerref/runtime.json"));
        }
    }
}
