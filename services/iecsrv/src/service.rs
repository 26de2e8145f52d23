//! Device service
//!
//! Boundary API: configuration lookup, session acquisition (retried), the
//! relay or status work, release on every exit path, response assembly.
//!
//! Dropping a request future mid-flight releases its session as well.

use std::sync::Arc;

use errors::log_classified;
use tracing::{info, info_span, Instrument};

use crate::config::IecSrvConfig;
use crate::error::{IecSrvError, Result};
use crate::model::{
    DeviceRequest, FailureResponse, GetStatusResponse, OkResponse,
    SetLightRequest,
};
use crate::protocol::ProtocolClient;
use crate::relay::switch_relay;
use crate::resolver::{resolve_light_values, RelaySwitch};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::session::{ConnectionSessionManager, SessionLease};
use crate::status::assemble_status;
use crate::store::DeviceConfigStore;

pub struct DeviceService {
    store: Arc<dyn DeviceConfigStore>,
    sessions: ConnectionSessionManager,
    executor: RetryExecutor,
}

impl DeviceService {
    pub fn new(
        store: Arc<dyn DeviceConfigStore>,
        client: Arc<dyn ProtocolClient>,
        config: &IecSrvConfig,
    ) -> Self {
        Self::from_parts(
            store,
            ConnectionSessionManager::new(client, &config.connection),
            RetryExecutor::new(RetryPolicy::from_config(&config.retry)),
        )
    }

    pub fn from_parts(
        store: Arc<dyn DeviceConfigStore>,
        sessions: ConnectionSessionManager,
        executor: RetryExecutor,
    ) -> Self {
        Self {
            store,
            sessions,
            executor,
        }
    }

    pub fn sessions(&self) -> &ConnectionSessionManager {
        &self.sessions
    }

    /// Read every configured relay and report the device status
    pub async fn get_status(
        &self,
        request: &DeviceRequest,
    ) -> std::result::Result<GetStatusResponse, FailureResponse> {
        let span = info_span!(
            "get_status",
            device = %request.device_identification,
            correlation_uid = %request.correlation_uid
        );
        self.try_get_status(request)
            .instrument(span)
            .await
            .map_err(|e| Self::failure(request, e, "Getting status failed"))
    }

    /// Switch the requested lights; all or nothing is resolved up front
    pub async fn set_light(
        &self,
        request: &SetLightRequest,
    ) -> std::result::Result<OkResponse, FailureResponse> {
        let span = info_span!(
            "set_light",
            device = %request.header.device_identification,
            correlation_uid = %request.header.correlation_uid
        );
        self.try_set_light(request)
            .instrument(span)
            .await
            .map_err(|e| Self::failure(&request.header, e, "Setting light failed"))
    }

    async fn try_get_status(&self, request: &DeviceRequest) -> Result<GetStatusResponse> {
        info!("Getting status");
        let config = self
            .store
            .find_device_config(&request.device_identification)
            .await?;

        let lease = self.sessions.lease(request.identity());
        lease.connect(&self.executor).await?;
        let status = assemble_status(&self.executor, &lease, &config.output_settings).await;
        lease.release().await;
        let device_status = status?;

        Ok(GetStatusResponse {
            organisation_identification: request.organisation_identification.clone(),
            device_identification: request.device_identification.clone(),
            correlation_uid: request.correlation_uid.clone(),
            device_status,
        })
    }

    async fn try_set_light(&self, request: &SetLightRequest) -> Result<OkResponse> {
        let header = &request.header;
        info!("Setting {} light value(s)", request.light_values.len());
        let config = self
            .store
            .find_device_config(&header.device_identification)
            .await?;

        // An invalid index anywhere in the request fails before any write
        let switches = resolve_light_values(&config, &request.light_values)?;

        let lease = self.sessions.lease(header.identity());
        lease.connect(&self.executor).await?;
        let switched = self.switch_all(&lease, &switches).await;
        lease.release().await;
        switched?;

        Ok(OkResponse::for_request(header))
    }

    /// Sequential, stops at the first failure
    async fn switch_all(&self, lease: &SessionLease<'_>, switches: &[RelaySwitch]) -> Result<()> {
        for switch in switches {
            switch_relay(&self.executor, lease, switch.internal_index, switch.on).await?;
        }
        Ok(())
    }

    fn failure(request: &DeviceRequest, error: IecSrvError, context: &str) -> FailureResponse {
        log_classified(&error, context);
        FailureResponse::from_error(request, &error)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::model::{DeviceConfig, LightValue, OutputSetting, RelayType};
    use crate::protocol::virt::{CallKind, VirtualClient};
    use crate::store::InMemoryDeviceStore;
    use std::time::Duration;

    fn service(client: &Arc<VirtualClient>, configs: Vec<DeviceConfig>) -> DeviceService {
        let store = Arc::new(InMemoryDeviceStore::from_configs(configs).unwrap());
        let dyn_client: Arc<dyn ProtocolClient> = client.clone();
        let mut config = IecSrvConfig::default();
        config.retry.delay_ms = 1;
        DeviceService::new(store, dyn_client, &config)
    }

    fn request(device: &str) -> DeviceRequest {
        DeviceRequest {
            organisation_identification: "org".to_string(),
            device_identification: device.to_string(),
            correlation_uid: "corr".to_string(),
            ip_address: "10.0.0.1".parse().unwrap(),
        }
    }

    fn device() -> DeviceConfig {
        DeviceConfig {
            device_identification: "SSLD_1".to_string(),
            ip_address: "10.0.0.1".parse().unwrap(),
            output_settings: vec![
                OutputSetting::new(1, 1, RelayType::Light),
                OutputSetting::new(2, 2, RelayType::Tariff),
            ],
        }
    }

    #[tokio::test]
    async fn test_unknown_device_fails_before_connecting() {
        let client = Arc::new(VirtualClient::new());
        let service = service(&client, vec![]);

        let failure = service.get_status(&request("SSLD_X")).await.unwrap_err();
        assert_eq!(failure.error_code, "IECSRV_NOT_FOUND");
        assert!(!failure.retryable);
        assert_eq!(client.count(CallKind::Connect), 0);
    }

    #[tokio::test]
    async fn test_get_status_releases_session() {
        let client = Arc::new(VirtualClient::from_device_configs(&[device()]));
        let service = service(&client, vec![device()]);

        let response = service.get_status(&request("SSLD_1")).await.unwrap();
        assert_eq!(response.correlation_uid, "corr");
        assert_eq!(response.device_status.light_values.len(), 2);
        assert_eq!(service.sessions().active_sessions(), 0);
        assert_eq!(client.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_set_light_switches_and_releases() {
        let client = Arc::new(VirtualClient::from_device_configs(&[device()]));
        let service = service(&client, vec![device()]);

        let req = SetLightRequest {
            header: request("SSLD_1"),
            light_values: vec![LightValue::new(1, true)],
        };
        let ok = service.set_light(&req).await.unwrap();
        assert_eq!(ok.device_identification, "SSLD_1");
        assert!(client.relay("SSLD_1", 1).unwrap().st_val);
        assert_eq!(client.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_device_is_retryable_failure() {
        // Configured but not present on the virtual network
        let client = Arc::new(VirtualClient::new());
        let service = service(&client, vec![device()]);

        let started = std::time::Instant::now();
        let failure = service.get_status(&request("SSLD_1")).await.unwrap_err();
        assert_eq!(failure.error_code, "IECSRV_CONNECTION_FAILURE");
        assert!(failure.retryable);
        assert_eq!(client.count(CallKind::Connect), 3);
        assert!(started.elapsed() >= Duration::from_millis(2));
    }

    #[tokio::test]
    async fn test_abandoned_request_releases_session() {
        let client = Arc::new(VirtualClient::from_device_configs(&[device()]));
        client.set_response_delay(Duration::from_secs(5));
        let service = service(&client, vec![device()]);

        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            service.get_status(&request("SSLD_1")),
        )
        .await;
        assert!(outcome.is_err());

        assert_eq!(service.sessions().active_sessions(), 0);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(client.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_hanging_device_fails_after_bounded_attempts() {
        let client = Arc::new(VirtualClient::from_device_configs(&[device()]));
        client.set_response_delay(Duration::from_secs(5));
        let store = Arc::new(InMemoryDeviceStore::from_configs(vec![device()]).unwrap());
        let mut config = IecSrvConfig::default();
        config.retry.delay_ms = 1;
        config.connection.operation_timeout_ms = 20;
        let dyn_client: Arc<dyn ProtocolClient> = client.clone();
        let service = DeviceService::new(store, dyn_client, &config);

        let started = std::time::Instant::now();
        let failure = service.get_status(&request("SSLD_1")).await.unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(failure.error_code, "IECSRV_CONNECTION_FAILURE");
        assert!(failure.retryable);
        assert_eq!(client.count(CallKind::Connect), 3);
        assert_eq!(client.open_sessions(), 0);
    }
}
