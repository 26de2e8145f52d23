//! Status assembler
//!
//! Reads `Pos.stVal` of every configured relay, one retried read each, and
//! builds the device status in configured order.

use tracing::debug;

use crate::error::{IecSrvError, Result};
use crate::model::{DeviceStatus, LightType, LightValue, LinkType, OutputSetting};
use crate::protocol::node::{self, DataAttribute};
use crate::retry::RetryExecutor;
use crate::session::{DeviceSession, SessionLease};

/// Current position of one relay
pub async fn read_relay_position(session: &DeviceSession, relay_index: u16) -> Result<bool> {
    let reference = node::attribute_reference(relay_index, DataAttribute::StVal)?;
    let value = session
        .read(&reference, DataAttribute::StVal.functional_constraint())
        .await?;
    value.as_bool().ok_or_else(|| {
        IecSrvError::protocol(format!("Unexpected value {} for {}", value, reference))
    })
}

/// Consolidated status; any failed read aborts the whole status
pub async fn assemble_status(
    executor: &RetryExecutor,
    lease: &SessionLease<'_>,
    output_settings: &[OutputSetting],
) -> Result<DeviceStatus> {
    let mut light_values = Vec::with_capacity(output_settings.len());

    for setting in output_settings {
        let relay_index = setting.internal_index;
        let operation_name = format!(
            "Reading relay {} of {}",
            relay_index,
            lease.device_identification()
        );
        let on = lease
            .run(executor, &operation_name, |session| async move {
                read_relay_position(&session, relay_index).await
            })
            .await?;
        debug!(
            "{} relay {} (index {}) is {}",
            lease.device_identification(),
            relay_index,
            setting.external_index,
            if on { "on" } else { "off" }
        );
        light_values.push(LightValue::new(setting.external_index, on));
    }

    // Link and light type are not read from the device
    Ok(DeviceStatus {
        light_values,
        preferred_link_type: LinkType::Ethernet,
        actual_link_type: LinkType::Ethernet,
        light_type: LightType::Relay,
        event_notifications_mask: 0,
    })
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::model::{DeviceIdentity, RelayType};
    use crate::protocol::virt::{CallKind, Fault, FaultKind, RelayState, VirtualClient};
    use crate::protocol::ProtocolClient;
    use crate::retry::RetryPolicy;
    use crate::session::ConnectionSessionManager;
    use std::sync::Arc;
    use std::time::Duration;

    fn setup(relays: &[u16]) -> (Arc<VirtualClient>, ConnectionSessionManager) {
        let client = Arc::new(VirtualClient::new());
        client.add_device("SSLD_1", relays.iter().copied());
        let dyn_client: Arc<dyn ProtocolClient> = client.clone();
        let sessions = ConnectionSessionManager::new(dyn_client, &ConnectionConfig::default());
        (client, sessions)
    }

    fn lease_for(sessions: &ConnectionSessionManager) -> SessionLease<'_> {
        sessions.lease(DeviceIdentity::new("SSLD_1", "10.0.0.1".parse().unwrap()))
    }

    fn executor() -> RetryExecutor {
        RetryExecutor::new(RetryPolicy::fixed(3, Duration::from_millis(1)))
    }

    fn on(ctl_model: i8) -> RelayState {
        RelayState {
            ctl_model,
            st_val: true,
        }
    }

    #[tokio::test]
    async fn test_status_keeps_configured_order() {
        let (client, sessions) = setup(&[1, 2, 3]);
        let lease = lease_for(&sessions);
        client.set_relay("SSLD_1", 1, on(1));

        let settings = vec![
            OutputSetting::new(3, 3, RelayType::Light),
            OutputSetting::new(1, 1, RelayType::Light),
            OutputSetting::new(2, 2, RelayType::Tariff),
        ];
        let status = assemble_status(&executor(), &lease, &settings)
            .await
            .unwrap();

        let values: Vec<(u16, bool)> = status
            .light_values
            .iter()
            .map(|lv| (lv.index, lv.on))
            .collect();
        assert_eq!(values, vec![(3, false), (1, true), (2, false)]);
        assert_eq!(status.light_type, LightType::Relay);
        assert_eq!(status.preferred_link_type, LinkType::Ethernet);
        assert_eq!(status.event_notifications_mask, 0);
    }

    #[tokio::test]
    async fn test_status_uses_external_index() {
        let (_client, sessions) = setup(&[4]);
        let lease = lease_for(&sessions);
        let settings = vec![OutputSetting::new(4, 1, RelayType::Light)];

        let status = assemble_status(&executor(), &lease, &settings)
            .await
            .unwrap();
        assert_eq!(status.light_values, vec![LightValue::new(1, false)]);
    }

    #[tokio::test]
    async fn test_transient_read_is_retried_per_relay() {
        let (client, sessions) = setup(&[1, 2]);
        let lease = lease_for(&sessions);
        client.inject_fault(Fault::new(CallKind::Read, FaultKind::Timeout).times(2));

        let settings = vec![
            OutputSetting::new(1, 1, RelayType::Light),
            OutputSetting::new(2, 2, RelayType::Light),
        ];
        let status = assemble_status(&executor(), &lease, &settings)
            .await
            .unwrap();
        assert_eq!(status.light_values.len(), 2);
        assert_eq!(client.count(CallKind::Read), 4);
        // Each timed-out read gave up its association
        assert_eq!(client.count(CallKind::Connect), 3);
        lease.release().await;
        assert_eq!(client.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_any_failure_aborts_status() {
        let (client, sessions) = setup(&[1]);
        let lease = lease_for(&sessions);
        // Relay 2 is configured but missing from the device model
        let settings = vec![
            OutputSetting::new(1, 1, RelayType::Light),
            OutputSetting::new(2, 2, RelayType::Light),
        ];

        let err = assemble_status(&executor(), &lease, &settings)
            .await
            .unwrap_err();
        assert!(matches!(err, IecSrvError::ProtocolAdapterFailure(_)));
        assert_eq!(client.count(CallKind::Read), 1);
    }
}
