//! Layered configuration loading
//!
//! Priority (highest to lowest):
//! 1. Environment variables (`{PREFIX}SECTION__KEY`)
//! 2. Configuration file (YAML, TOML or JSON, chosen by extension)
//! 3. `T::default()`

use std::path::Path;

use anyhow::{anyhow, bail, Context};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
    Json,
}

impl ConfigFormat {
    /// Pick the format from the file extension
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow!("Config file must have an extension: {}", path.display()))?;

        match extension {
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            "json" => Ok(Self::Json),
            other => bail!("Unsupported config file format: {}", other),
        }
    }
}

/// Load `T` from defaults, an optional file and prefixed environment variables
///
/// An explicitly given file that does not exist is an error; nested keys in
/// the environment are separated with `__` (`IECSRV_RETRY__MAX_ATTEMPTS`).
pub fn load_config<T>(path: Option<&Path>, env_prefix: &str) -> anyhow::Result<T>
where
    T: DeserializeOwned + Serialize + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if let Some(path) = path {
        if !path.exists() {
            bail!("Configuration file not found: {}", path.display());
        }
        figment = match ConfigFormat::from_path(path)? {
            ConfigFormat::Yaml => figment.merge(Yaml::file(path)),
            ConfigFormat::Toml => figment.merge(Toml::file(path)),
            ConfigFormat::Json => figment.merge(Json::file(path)),
        };
        debug!("Config file: {}", path.display());
    }

    figment
        .merge(Env::prefixed(env_prefix).split("__"))
        .extract()
        .context("Failed to load configuration")
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        name: String,
        inner: Inner,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    #[serde(default)]
    struct Inner {
        attempts: u32,
        enabled: bool,
    }

    impl Default for Sample {
        fn default() -> Self {
            Self {
                name: "default".to_string(),
                inner: Inner::default(),
            }
        }
    }

    impl Default for Inner {
        fn default() -> Self {
            Self {
                attempts: 3,
                enabled: false,
            }
        }
    }

    #[test]
    fn test_defaults_without_file() {
        let sample: Sample = load_config(None, "CFGTEST_NONE_").unwrap();
        assert_eq!(sample, Sample::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "name: from-file\ninner:\n  attempts: 7").unwrap();

        let sample: Sample = load_config(Some(file.path()), "CFGTEST_FILE_").unwrap();
        assert_eq!(sample.name, "from-file");
        assert_eq!(sample.inner.attempts, 7);
        assert!(!sample.inner.enabled);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"inner": {{"attempts": 7}}}}"#).unwrap();

        std::env::set_var("CFGTEST_ENV_INNER__ATTEMPTS", "9");
        let sample: Sample = load_config(Some(file.path()), "CFGTEST_ENV_").unwrap();
        std::env::remove_var("CFGTEST_ENV_INNER__ATTEMPTS");

        assert_eq!(sample.inner.attempts, 9);
    }

    #[test]
    fn test_missing_file_is_error() {
        let result: anyhow::Result<Sample> =
            load_config(Some(Path::new("/nonexistent/iecsrv.yaml")), "CFGTEST_MISSING_");
        assert!(result.is_err());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ConfigFormat::from_path(Path::new("a.yml")).unwrap(),
            ConfigFormat::Yaml
        );
        assert!(ConfigFormat::from_path(Path::new("a.ini")).is_err());
        assert!(ConfigFormat::from_path(Path::new("noext")).is_err());
    }
}
