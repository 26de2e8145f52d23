//! Device configuration store
//!
//! Read-only lookup of device configuration records. The bundled store keeps
//! records in memory and is loaded from a YAML file:
//!
//! ```yaml
//! devices:
//!   - device_identification: SSLD_000-00-01
//!     ip_address: 192.168.10.21
//!     output_settings:
//!       - { internal_index: 1, external_index: 1, relay_type: LIGHT }
//!       - { internal_index: 2, external_index: 2, relay_type: TARIFF }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ErrorExt, IecSrvError, Result};
use crate::model::DeviceConfig;
use crate::resolver::ALL_LIGHT_RELAYS;

/// Upstream configuration lookup
#[async_trait]
pub trait DeviceConfigStore: Send + Sync {
    /// Configuration of one device, `NotFound` when unknown
    async fn find_device_config(&self, device_identification: &str) -> Result<DeviceConfig>;
}

/// Device configuration file layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevicesFile {
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// Check the aggregate invariants of one device
pub fn validate_device_config(config: &DeviceConfig) -> Result<()> {
    let device = &config.device_identification;
    if device.trim().is_empty() {
        return Err(IecSrvError::config("Device identification must not be empty"));
    }

    let mut external = HashSet::new();
    let mut internal = HashSet::new();
    for setting in &config.output_settings {
        if setting.external_index == ALL_LIGHT_RELAYS {
            return Err(IecSrvError::config(format!(
                "{}: external index {} is reserved",
                device, ALL_LIGHT_RELAYS
            )));
        }
        if !external.insert(setting.external_index) {
            return Err(IecSrvError::config(format!(
                "{}: duplicate external index {}",
                device, setting.external_index
            )));
        }
        if !internal.insert(setting.internal_index) {
            return Err(IecSrvError::config(format!(
                "{}: duplicate internal index {}",
                device, setting.internal_index
            )));
        }
    }
    Ok(())
}

/// In-memory store
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeviceStore {
    devices: HashMap<String, DeviceConfig>,
}

impl InMemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from records, validating each one
    pub fn from_configs(configs: impl IntoIterator<Item = DeviceConfig>) -> Result<Self> {
        let mut store = Self::new();
        for config in configs {
            store.insert(config)?;
        }
        Ok(store)
    }

    /// Load and validate a YAML device file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .config_error(&format!("Reading device file {}", path.display()))?;
        let store = Self::from_yaml_str(&content)?;
        info!(
            "Loaded {} device(s) from {}",
            store.len(),
            path.display()
        );
        Ok(store)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let file: DevicesFile = serde_yaml::from_str(content)?;
        Self::from_configs(file.devices)
    }

    /// Add a record; identifiers must be unique
    pub fn insert(&mut self, config: DeviceConfig) -> Result<()> {
        validate_device_config(&config)?;
        if self.devices.contains_key(&config.device_identification) {
            return Err(IecSrvError::config(format!(
                "Duplicate device {}",
                config.device_identification
            )));
        }
        self.devices
            .insert(config.device_identification.clone(), config);
        Ok(())
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceConfig> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[async_trait]
impl DeviceConfigStore for InMemoryDeviceStore {
    async fn find_device_config(&self, device_identification: &str) -> Result<DeviceConfig> {
        self.devices
            .get(device_identification)
            .cloned()
            .ok_or_else(|| IecSrvError::device_not_found(device_identification))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::model::{OutputSetting, RelayType};
    use std::io::Write;

    const SAMPLE: &str = r#"
devices:
  - device_identification: SSLD_1
    ip_address: 10.0.0.1
    output_settings:
      - { internal_index: 1, external_index: 1, relay_type: LIGHT, alias: street }
      - { internal_index: 2, external_index: 2, relay_type: TARIFF_REVERSED }
  - device_identification: SSLD_2
    ip_address: 10.0.0.2
"#;

    fn device(settings: Vec<OutputSetting>) -> DeviceConfig {
        DeviceConfig {
            device_identification: "SSLD_1".to_string(),
            ip_address: "10.0.0.1".parse().unwrap(),
            output_settings: settings,
        }
    }

    #[tokio::test]
    async fn test_load_yaml_and_lookup() {
        let store = InMemoryDeviceStore::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(store.len(), 2);

        let config = store.find_device_config("SSLD_1").await.unwrap();
        assert_eq!(config.output_settings.len(), 2);
        assert_eq!(config.output_settings[0].alias.as_deref(), Some("street"));
        assert_eq!(
            config.output_settings[1].relay_type,
            RelayType::TariffReversed
        );

        let empty = store.find_device_config("SSLD_2").await.unwrap();
        assert!(empty.output_settings.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_device_is_not_found() {
        let store = InMemoryDeviceStore::new();
        let err = store.find_device_config("SSLD_X").await.unwrap_err();
        assert!(matches!(err, IecSrvError::NotFound(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let store = InMemoryDeviceStore::from_yaml_file(file.path()).unwrap();
        assert_eq!(store.devices().count(), 2);

        let err = InMemoryDeviceStore::from_yaml_file(Path::new("/nonexistent/devices.yaml"))
            .unwrap_err();
        assert!(matches!(err, IecSrvError::Config(_)));
    }

    #[test]
    fn test_rejects_reserved_external_index() {
        let config = device(vec![OutputSetting::new(1, 0, RelayType::Light)]);
        assert!(validate_device_config(&config).is_err());
    }

    #[test]
    fn test_rejects_duplicate_external_index() {
        let config = device(vec![
            OutputSetting::new(1, 1, RelayType::Light),
            OutputSetting::new(2, 1, RelayType::Tariff),
        ]);
        let err = validate_device_config(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate external index 1"));
    }

    #[test]
    fn test_rejects_duplicate_internal_index() {
        let config = device(vec![
            OutputSetting::new(3, 1, RelayType::Light),
            OutputSetting::new(3, 2, RelayType::Light),
        ]);
        assert!(validate_device_config(&config).is_err());
    }

    #[test]
    fn test_rejects_duplicate_device() {
        let result = InMemoryDeviceStore::from_configs([device(vec![]), device(vec![])]);
        assert!(result.is_err());
    }
}
