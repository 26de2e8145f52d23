//! Domain types and boundary messages
//!
//! Configuration records are read-only at request time; status values are
//! assembled fresh for every request and never cached.

use std::net::IpAddr;

use errors::ClassifiedError;
use serde::{Deserialize, Serialize};

use crate::error::{FunctionalErrorType, IecSrvError};

// ============================================================================
// Device configuration
// ============================================================================

/// Device identifier plus network address; port comes from connection config
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_identification: String,
    pub ip_address: IpAddr,
}

impl DeviceIdentity {
    pub fn new(device_identification: impl Into<String>, ip_address: IpAddr) -> Self {
        Self {
            device_identification: device_identification.into(),
            ip_address,
        }
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.device_identification, self.ip_address)
    }
}

/// Relay category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayType {
    Light,
    Tariff,
    TariffReversed,
}

/// One relay's configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSetting {
    /// Protocol-level relay number (`XSWC{n}`)
    pub internal_index: u16,
    /// Application-facing index used in requests and status
    pub external_index: u16,
    pub relay_type: RelayType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl OutputSetting {
    pub fn new(internal_index: u16, external_index: u16, relay_type: RelayType) -> Self {
        Self {
            internal_index,
            external_index,
            relay_type,
            alias: None,
        }
    }

    pub fn is_light(&self) -> bool {
        self.relay_type == RelayType::Light
    }
}

/// Device configuration aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_identification: String,
    pub ip_address: IpAddr,
    #[serde(default)]
    pub output_settings: Vec<OutputSetting>,
}

impl DeviceConfig {
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.device_identification.clone(), self.ip_address)
    }
}

// ============================================================================
// Status values
// ============================================================================

/// External index plus on/off; the dim value is carried, never sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightValue {
    pub index: u16,
    pub on: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dim_value: Option<u8>,
}

impl LightValue {
    pub fn new(index: u16, on: bool) -> Self {
        Self {
            index,
            on,
            dim_value: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkType {
    Ethernet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LightType {
    Relay,
}

/// Consolidated device status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub light_values: Vec<LightValue>,
    pub preferred_link_type: LinkType,
    pub actual_link_type: LinkType,
    pub light_type: LightType,
    pub event_notifications_mask: u32,
}

// ============================================================================
// Boundary messages
// ============================================================================

/// Common request header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRequest {
    pub organisation_identification: String,
    pub device_identification: String,
    pub correlation_uid: String,
    pub ip_address: IpAddr,
}

impl DeviceRequest {
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.device_identification.clone(), self.ip_address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetLightRequest {
    #[serde(flatten)]
    pub header: DeviceRequest,
    pub light_values: Vec<LightValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetStatusResponse {
    pub organisation_identification: String,
    pub device_identification: String,
    pub correlation_uid: String,
    pub device_status: DeviceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OkResponse {
    pub organisation_identification: String,
    pub device_identification: String,
    pub correlation_uid: String,
}

impl OkResponse {
    pub fn for_request(request: &DeviceRequest) -> Self {
        Self {
            organisation_identification: request.organisation_identification.clone(),
            device_identification: request.device_identification.clone(),
            correlation_uid: request.correlation_uid.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureResponse {
    pub organisation_identification: String,
    pub device_identification: String,
    pub correlation_uid: String,
    pub reason: String,
    pub error_code: String,
    /// Caller may resubmit the request later
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functional_error: Option<FunctionalErrorType>,
}

impl FailureResponse {
    pub fn from_error(request: &DeviceRequest, error: &IecSrvError) -> Self {
        let info = error.to_error_info();
        Self {
            organisation_identification: request.organisation_identification.clone(),
            device_identification: request.device_identification.clone(),
            correlation_uid: request.correlation_uid.clone(),
            reason: info.message,
            error_code: info.code,
            retryable: info.retryable,
            functional_error: error.functional_kind(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn request() -> DeviceRequest {
        DeviceRequest {
            organisation_identification: "org-1".to_string(),
            device_identification: "SSLD_1".to_string(),
            correlation_uid: "corr-1".to_string(),
            ip_address: "10.0.0.5".parse().unwrap(),
        }
    }

    #[test]
    fn test_relay_type_wire_names() {
        let json = serde_json::to_string(&RelayType::TariffReversed).unwrap();
        assert_eq!(json, "\"TARIFF_REVERSED\"");
        let parsed: RelayType = serde_yaml::from_str("LIGHT").unwrap();
        assert_eq!(parsed, RelayType::Light);
    }

    #[test]
    fn test_set_light_request_flattens_header() {
        let req = SetLightRequest {
            header: request(),
            light_values: vec![LightValue::new(1, true)],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["device_identification"], "SSLD_1");
        assert_eq!(json["light_values"][0]["index"], 1);
        assert!(json["light_values"][0].get("dim_value").is_none());
    }

    #[test]
    fn test_failure_response_from_connection_error() {
        let err = IecSrvError::connection("refused");
        let failure = FailureResponse::from_error(&request(), &err);
        assert_eq!(failure.correlation_uid, "corr-1");
        assert_eq!(failure.error_code, "IECSRV_CONNECTION_FAILURE");
        assert!(failure.retryable);
        assert!(failure.functional_error.is_none());
    }

    #[test]
    fn test_failure_response_from_functional_error() {
        let err = IecSrvError::relay_not_allowed(9);
        let failure = FailureResponse::from_error(&request(), &err);
        assert!(!failure.retryable);
        assert_eq!(
            failure.functional_error,
            Some(FunctionalErrorType::LightSwitchingNotAllowedForRelay)
        );
    }
}
