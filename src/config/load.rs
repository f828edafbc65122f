use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::policy::ActionPoliciesError;

use super::Config;

const CONFIG_PATH_ENV: &str = "PODIUM_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "podium.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    Policy(#[from] ActionPoliciesError),
}

pub fn default_config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Load the config file if present, defaults otherwise. Policies are
/// validated either way so a bad range fails at startup, not on first use.
pub fn load() -> Result<Config, ConfigError> {
    let path = default_config_path();
    if !path.exists() {
        let config = Config::default();
        config.policies.validate()?;
        return Ok(config);
    }
    load_from(&path)
}

pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.policies.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_from_reads_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("podium.toml");
        fs::write(
            &path,
            "[limits]\ntop_k = 3\n\n[anomaly]\nburst_count = 2\n",
        )
        .unwrap();

        let config = load_from(&path).unwrap();
        assert_eq!(config.limits.top_k, 3);
        assert_eq!(config.anomaly.burst_count, 2);
        assert_eq!(config.limits.lock_ttl_ms, 10_000);
    }

    #[test]
    fn invalid_policy_range_fails_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("podium.toml");
        fs::write(
            &path,
            "[policies.actions.broken]\nmin_value = 9\nmax_value = 2\n",
        )
        .unwrap();

        assert!(matches!(
            load_from(&path),
            Err(ConfigError::Policy(ActionPoliciesError::EmptyRange { .. }))
        ));
    }

    #[test]
    fn missing_file_is_a_clear_io_error() {
        let err = load_from(Path::new("/nonexistent/podium.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
