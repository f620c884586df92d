//! Configuration loader with environment variable expansion

use super::{ConfigError, PluginOptions};
use lazy_static::lazy_static;
use regex_lite::Regex;
use std::path::Path;

lazy_static! {
    // ${VAR} or ${VAR:-default}
    static ref ENV_VAR_PATTERN: Regex =
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").expect("env var pattern is valid");
}

/// Configuration loader
///
/// Loading only parses; call [`PluginOptions::validate`] afterwards so that
/// CLI overrides can be merged in first.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load options from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<PluginOptions, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        tracing::debug!(config_path = %path.display(), "Read config file");
        Self::from_yaml_str(&content)
    }

    /// Parse options from YAML text, expanding environment variables first
    pub fn from_yaml_str(content: &str) -> Result<PluginOptions, ConfigError> {
        if content.trim().is_empty() {
            return Ok(PluginOptions::default());
        }
        let expanded = Self::expand_env_vars(content);
        let options: PluginOptions = serde_yaml::from_str(&expanded)?;
        Ok(options)
    }

    /// Expand environment variables.
    ///
    /// Supports `${VAR_NAME}` and `${VAR_NAME:-default}`. A variable that is
    /// unset and has no default keeps its placeholder.
    fn expand_env_vars(content: &str) -> String {
        let mut result = String::with_capacity(content.len());
        let mut last_match = 0;

        for cap in ENV_VAR_PATTERN.captures_iter(content) {
            let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
                continue;
            };

            result.push_str(&content[last_match..full_match.start()]);

            match (std::env::var(var_name.as_str()), cap.get(2)) {
                (Ok(value), _) => result.push_str(&value),
                (Err(_), Some(default)) => result.push_str(default.as_str()),
                (Err(_), None) => result.push_str(full_match.as_str()),
            }

            last_match = full_match.end();
        }

        result.push_str(&content[last_match..]);
        result
    }
}
