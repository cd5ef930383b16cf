use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::stream::{ConfigError, Dataset, LinearRegressionLoader};

/// Settings of the demo binary. Every field is optional in the JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DemoConfig {
    /// Sessions are run one after another, in this order.
    pub learning_rates: Vec<f64>,
    pub epochs: u32,
    pub dataset: Dataset,
    /// Print a progress line every this many epochs.
    pub report_every: u32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            learning_rates: vec![0.01],
            epochs: 200,
            dataset: Dataset::default(),
            report_every: 20,
        }
    }
}

impl DemoConfig {
    /// Reads and validates a config from a JSON file.
    ///
    /// # Errors
    /// Returns a `ConfigError` if the file cannot be read, is not valid JSON
    /// or holds invalid values.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_json(&content)
    }

    /// # Errors
    /// Same as [`DemoConfig::from_file`], minus the I/O.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns `ConfigError::Invalid` describing the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.learning_rates.is_empty() {
            return Err(ConfigError::Invalid("learning_rates must not be empty".into()));
        }
        if let Some(lr) = self
            .learning_rates
            .iter()
            .find(|lr| !lr.is_finite() || **lr <= 0.0)
        {
            return Err(ConfigError::Invalid(format!(
                "learning rate {lr} must be a positive finite number"
            )));
        }
        if self.epochs == 0 {
            return Err(ConfigError::Invalid("epochs must be at least 1".into()));
        }
        if self.report_every == 0 {
            return Err(ConfigError::Invalid("report_every must be at least 1".into()));
        }

        self.dataset.validate().map_err(ConfigError::Invalid)
    }

    pub fn loader(&self) -> LinearRegressionLoader {
        LinearRegressionLoader::new(self.dataset.clone(), self.epochs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config = DemoConfig::from_json("{}").unwrap();
        assert_eq!(config, DemoConfig::default());
        assert_eq!(config.learning_rates, vec![0.01]);
        assert_eq!(config.epochs, 200);
    }

    #[test]
    fn partial_config_overrides_only_given_fields() {
        let config =
            DemoConfig::from_json(r#"{ "learning_rates": [0.01, 0.02], "report_every": 50 }"#)
                .unwrap();

        assert_eq!(config.learning_rates, vec![0.01, 0.02]);
        assert_eq!(config.report_every, 50);
        assert_eq!(config.dataset, Dataset::default());
    }

    #[test]
    fn rejects_invalid_values() {
        for raw in [
            r#"{ "learning_rates": [] }"#,
            r#"{ "learning_rates": [0.0] }"#,
            r#"{ "learning_rates": [-0.1] }"#,
            r#"{ "epochs": 0 }"#,
            r#"{ "report_every": 0 }"#,
            r#"{ "dataset": { "x": [1.0], "y": [] } }"#,
        ] {
            assert!(
                matches!(DemoConfig::from_json(raw), Err(ConfigError::Invalid(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_malformed_json_and_unknown_fields() {
        assert!(matches!(DemoConfig::from_json("{"), Err(ConfigError::Parse(_))));
        assert!(matches!(
            DemoConfig::from_json(r#"{ "epoch": 10 }"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = DemoConfig::from_file("/nonexistent/gradient-stream.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/gradient-stream.json"));
    }
}
