//! Output setting resolver
//!
//! Maps application light indices to configured relays. Pure, no I/O.

use tracing::warn;

use crate::error::{IecSrvError, Result};
use crate::model::{DeviceConfig, LightValue, OutputSetting};

/// External index addressing every LIGHT relay of a device
pub const ALL_LIGHT_RELAYS: u16 = 0;

/// One relay switch derived from a requested light value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySwitch {
    pub external_index: u16,
    pub internal_index: u16,
    pub on: bool,
}

/// Output settings addressed by `index`
///
/// `0` yields all LIGHT relays in configured order (possibly none); any other
/// index must name a configured LIGHT relay.
pub fn resolve(config: &DeviceConfig, index: u16) -> Result<Vec<&OutputSetting>> {
    if index == ALL_LIGHT_RELAYS {
        let lights: Vec<&OutputSetting> = config
            .output_settings
            .iter()
            .filter(|setting| setting.is_light())
            .collect();
        if lights.is_empty() {
            warn!(
                "{} has no LIGHT relays, switching all lights does nothing",
                config.device_identification
            );
        }
        return Ok(lights);
    }

    match config
        .output_settings
        .iter()
        .find(|setting| setting.external_index == index)
    {
        Some(setting) if setting.is_light() => Ok(vec![setting]),
        _ => Err(IecSrvError::relay_not_allowed(index)),
    }
}

/// Resolve every requested light value before anything is written
pub fn resolve_light_values(
    config: &DeviceConfig,
    light_values: &[LightValue],
) -> Result<Vec<RelaySwitch>> {
    let mut switches = Vec::new();
    for light_value in light_values {
        for setting in resolve(config, light_value.index)? {
            switches.push(RelaySwitch {
                external_index: setting.external_index,
                internal_index: setting.internal_index,
                on: light_value.on,
            });
        }
    }
    Ok(switches)
}
