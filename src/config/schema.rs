use serde::{Deserialize, Serialize};

use crate::core::{ActionPolicies, Limits};
use crate::service::anomaly::AnomalyConfig;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub limits: Limits,
    pub policies: ActionPolicies,
    pub anomaly: AnomalyConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub stdout: bool,
    pub format: LogFormat,
    /// Extra filter directives appended to the `PODIUM_LOG` environment.
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            format: LogFormat::Compact,
            filter: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrips_through_toml() {
        let config = Config::default();
        let rendered = toml::to_string_pretty(&config).expect("serialize");
        let parsed: Config = toml::from_str(&rendered).expect("parse");
        assert_eq!(parsed.limits, config.limits);
        assert_eq!(parsed.anomaly, config.anomaly);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let input = r#"
            [logging]
            format = "json"

            [limits]
            top_k = 25

            [policies.actions.task_completion]
            min_value = 1
            max_value = 500
        "#;
        let config: Config = toml::from_str(input).expect("parse partial");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.limits.top_k, 25);
        assert_eq!(config.limits.max_actions_per_window, 10);
        assert_eq!(config.policies.actions.len(), 1);
    }
}
