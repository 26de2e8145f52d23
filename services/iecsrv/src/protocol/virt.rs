//! Virtual protocol client
//!
//! In-memory stand-in for the MMS client library. Devices hold relay
//! registers (`ctlModel`, `stVal`) and enforce the control-model precondition
//! the way a real SSLD does. Every call is journaled and faults can be
//! injected per call kind and attribute, which is what the tests and the CLI
//! dry-run mode use.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::node::{self, DataAttribute, LogicalNode, ObjectReference};
use super::{DataValue, FunctionalConstraint, ProtocolClient, ServerModel, SessionHandle};
use crate::error::{IecSrvError, Result};
use crate::model::DeviceConfig;

/// Relay registers of a virtual device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayState {
    pub ctl_model: i8,
    pub st_val: bool,
}

#[derive(Debug)]
struct VirtualDevice {
    relays: BTreeMap<u16, RelayState>,
    accepts_control_enable: bool,
}

/// Kind of protocol call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Connect,
    RetrieveModel,
    Read,
    Write,
    Close,
}

/// Journal entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCall {
    Connect {
        device: String,
    },
    RetrieveModel {
        device: String,
    },
    Read {
        device: String,
        reference: ObjectReference,
        fc: FunctionalConstraint,
    },
    Write {
        device: String,
        reference: ObjectReference,
        fc: FunctionalConstraint,
        value: DataValue,
    },
    Close {
        device: String,
    },
}

impl ClientCall {
    pub fn kind(&self) -> CallKind {
        match self {
            ClientCall::Connect { .. } => CallKind::Connect,
            ClientCall::RetrieveModel { .. } => CallKind::RetrieveModel,
            ClientCall::Read { .. } => CallKind::Read,
            ClientCall::Write { .. } => CallKind::Write,
            ClientCall::Close { .. } => CallKind::Close,
        }
    }

    pub fn reference(&self) -> Option<&ObjectReference> {
        match self {
            ClientCall::Read { reference, .. } | ClientCall::Write { reference, .. } => {
                Some(reference)
            },
            _ => None,
        }
    }

    pub fn device(&self) -> &str {
        match self {
            ClientCall::Connect { device }
            | ClientCall::RetrieveModel { device }
            | ClientCall::Read { device, .. }
            | ClientCall::Write { device, .. }
            | ClientCall::Close { device } => device,
        }
    }
}

/// Error class produced by an injected fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    ConnectionLoss,
    /// Connection failure that also tears the association down
    AssociationLost,
    Timeout,
    ProtocolFault,
}

impl FaultKind {
    fn to_error(self, call: &ClientCall) -> IecSrvError {
        let context = format!("injected fault on {:?} for {}", call.kind(), call.device());
        match self {
            FaultKind::ConnectionLoss | FaultKind::AssociationLost => {
                IecSrvError::connection(context)
            },
            FaultKind::Timeout => IecSrvError::timeout(context),
            FaultKind::ProtocolFault => IecSrvError::protocol(context),
        }
    }
}

/// Fault injected into the next matching call(s)
#[derive(Debug, Clone)]
pub struct Fault {
    call: CallKind,
    attribute: Option<DataAttribute>,
    kind: FaultKind,
    remaining: u32,
}

impl Fault {
    /// Fail the next call of `call` kind once
    pub fn new(call: CallKind, kind: FaultKind) -> Self {
        Self {
            call,
            attribute: None,
            kind,
            remaining: 1,
        }
    }

    /// Only match reads/writes of this attribute
    pub fn on_attribute(mut self, attribute: DataAttribute) -> Self {
        self.attribute = Some(attribute);
        self
    }

    pub fn times(mut self, count: u32) -> Self {
        self.remaining = count;
        self
    }

    fn matches(&self, call: &ClientCall) -> bool {
        if self.remaining == 0 || self.call != call.kind() {
            return false;
        }
        match (self.attribute, call.reference()) {
            (None, _) => true,
            (Some(attribute), Some(reference)) => node::parse_attribute_reference(reference)
                .is_some_and(|(_, attr)| attr == attribute),
            (Some(_), None) => false,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    devices: HashMap<String, VirtualDevice>,
    sessions: HashMap<SessionHandle, String>,
    next_handle: u64,
    faults: Vec<Fault>,
    journal: Vec<ClientCall>,
}

impl State {
    /// Journal the call, then fire the first matching fault
    fn record(&mut self, handle: Option<SessionHandle>, call: ClientCall) -> Result<()> {
        let fired = self
            .faults
            .iter_mut()
            .find(|fault| fault.matches(&call))
            .map(|fault| {
                fault.remaining -= 1;
                fault.kind
            });
        let result = match fired {
            Some(kind) => {
                if let (FaultKind::AssociationLost, Some(handle)) = (kind, handle) {
                    self.sessions.remove(&handle);
                }
                Err(kind.to_error(&call))
            },
            None => Ok(()),
        };
        self.journal.push(call);
        result
    }

    fn session_device(&self, handle: SessionHandle) -> Result<String> {
        self.sessions
            .get(&handle)
            .cloned()
            .ok_or_else(|| IecSrvError::connection(format!("Association {} is closed", handle)))
    }

    fn relay_mut(&mut self, device: &str, relay_index: u16) -> Result<&mut RelayState> {
        self.devices
            .get_mut(device)
            .and_then(|d| d.relays.get_mut(&relay_index))
            .ok_or_else(|| {
                IecSrvError::protocol(format!("{} has no relay {}", device, relay_index))
            })
    }
}

/// Resolve a reference and check its functional constraint
fn resolve_attribute(
    reference: &ObjectReference,
    fc: FunctionalConstraint,
) -> Result<(u16, DataAttribute)> {
    let (relay_index, attribute) = node::parse_attribute_reference(reference)
        .ok_or_else(|| IecSrvError::protocol(format!("Unknown object reference {}", reference)))?;
    if attribute.functional_constraint() != fc {
        return Err(IecSrvError::protocol(format!(
            "{} is not accessible with FC {}",
            reference, fc
        )));
    }
    Ok((relay_index, attribute))
}

/// In-memory protocol client
#[derive(Debug, Default)]
pub struct VirtualClient {
    state: Mutex<State>,
    response_delay: Mutex<Duration>,
}

impl VirtualClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// One virtual device per configuration, relays at the internal indices
    pub fn from_device_configs<'a>(configs: impl IntoIterator<Item = &'a DeviceConfig>) -> Self {
        let client = Self::new();
        for config in configs {
            client.add_device(
                &config.device_identification,
                config.output_settings.iter().map(|s| s.internal_index),
            );
        }
        client
    }

    /// Register a device; relays start with control disabled and position off
    pub fn add_device(&self, device_identification: &str, relays: impl IntoIterator<Item = u16>) {
        let device = VirtualDevice {
            relays: relays
                .into_iter()
                .map(|index| (index, RelayState::default()))
                .collect(),
            accepts_control_enable: true,
        };
        self.state
            .lock()
            .devices
            .insert(device_identification.to_string(), device);
    }

    pub fn set_relay(&self, device_identification: &str, relay_index: u16, relay: RelayState) {
        if let Some(device) = self.state.lock().devices.get_mut(device_identification) {
            device.relays.insert(relay_index, relay);
        }
    }

    pub fn relay(&self, device_identification: &str, relay_index: u16) -> Option<RelayState> {
        self.state
            .lock()
            .devices
            .get(device_identification)
            .and_then(|d| d.relays.get(&relay_index).copied())
    }

    /// Writes to `ctlModel` are acknowledged but ignored
    pub fn reject_control_enable(&self, device_identification: &str) {
        if let Some(device) = self.state.lock().devices.get_mut(device_identification) {
            device.accepts_control_enable = false;
        }
    }

    pub fn inject_fault(&self, fault: Fault) {
        self.state.lock().faults.push(fault);
    }

    /// Journal snapshot
    pub fn calls(&self) -> Vec<ClientCall> {
        self.state.lock().journal.clone()
    }

    pub fn calls_of(&self, kind: CallKind) -> Vec<ClientCall> {
        self.state
            .lock()
            .journal
            .iter()
            .filter(|call| call.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn count(&self, kind: CallKind) -> usize {
        self.state
            .lock()
            .journal
            .iter()
            .filter(|call| call.kind() == kind)
            .count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().journal.clear();
    }

    pub fn open_sessions(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Delay every read and write, simulating a device that stops answering
    pub fn set_response_delay(&self, delay: Duration) {
        *self.response_delay.lock() = delay;
    }

    async fn respond_late(&self) {
        let delay = *self.response_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ProtocolClient for VirtualClient {
    async fn connect(&self, addr: SocketAddr, device_identification: &str) -> Result<SessionHandle> {
        let mut state = self.state.lock();
        state.record(None, ClientCall::Connect {
            device: device_identification.to_string(),
        })?;

        if !state.devices.contains_key(device_identification) {
            return Err(IecSrvError::connection(format!(
                "Association to {} at {} refused",
                device_identification, addr
            )));
        }

        state.next_handle += 1;
        let handle = SessionHandle(state.next_handle);
        state
            .sessions
            .insert(handle, device_identification.to_string());
        debug!("Virtual association {} opened to {} at {}", handle, device_identification, addr);
        Ok(handle)
    }

    async fn retrieve_model(&self, handle: SessionHandle) -> Result<ServerModel> {
        let mut state = self.state.lock();
        let device = state.session_device(handle)?;
        state.record(Some(handle), ClientCall::RetrieveModel {
            device: device.clone(),
        })?;

        let mut model = ServerModel::new();
        if let Some(virtual_device) = state.devices.get(&device) {
            for relay_index in virtual_device.relays.keys() {
                if LogicalNode::for_relay(*relay_index).is_err() {
                    continue;
                }
                for attribute in DataAttribute::ALL {
                    let reference = node::attribute_reference(*relay_index, attribute)?;
                    model.add_node(reference, attribute.functional_constraint());
                }
            }
        }
        Ok(model)
    }

    async fn read_point(
        &self,
        handle: SessionHandle,
        reference: &ObjectReference,
        fc: FunctionalConstraint,
    ) -> Result<DataValue> {
        self.respond_late().await;
        let mut state = self.state.lock();
        let device = state.session_device(handle)?;
        state.record(Some(handle), ClientCall::Read {
            device: device.clone(),
            reference: reference.clone(),
            fc,
        })?;

        let (relay_index, attribute) = resolve_attribute(reference, fc)?;
        let relay = state.relay_mut(&device, relay_index)?;
        match attribute {
            DataAttribute::CtlModel => Ok(DataValue::Int8(relay.ctl_model)),
            DataAttribute::StVal => Ok(DataValue::Bool(relay.st_val)),
            DataAttribute::CtlVal => Err(IecSrvError::protocol(format!(
                "{} is write-only",
                reference
            ))),
        }
    }

    async fn write_point(
        &self,
        handle: SessionHandle,
        reference: &ObjectReference,
        fc: FunctionalConstraint,
        value: DataValue,
    ) -> Result<()> {
        self.respond_late().await;
        let mut state = self.state.lock();
        let device = state.session_device(handle)?;
        state.record(Some(handle), ClientCall::Write {
            device: device.clone(),
            reference: reference.clone(),
            fc,
            value,
        })?;

        let (relay_index, attribute) = resolve_attribute(reference, fc)?;
        let accepts_control_enable = state
            .devices
            .get(&device)
            .is_some_and(|d| d.accepts_control_enable);
        let relay = state.relay_mut(&device, relay_index)?;

        match (attribute, value) {
            (DataAttribute::CtlModel, value) => {
                let ctl_model = value
                    .as_int()
                    .and_then(|v| i8::try_from(v).ok())
                    .ok_or_else(|| {
                        IecSrvError::protocol(format!("Invalid ctlModel value {}", value))
                    })?;
                if accepts_control_enable {
                    relay.ctl_model = ctl_model;
                }
                Ok(())
            },
            (DataAttribute::CtlVal, DataValue::Bool(on)) => {
                if relay.ctl_model == 0 {
                    return Err(IecSrvError::protocol(format!(
                        "Control disabled for {}",
                        reference
                    )));
                }
                relay.st_val = on;
                Ok(())
            },
            (DataAttribute::CtlVal, other) => Err(IecSrvError::protocol(format!(
                "Type mismatch writing {} to {}",
                other, reference
            ))),
            (DataAttribute::StVal, _) => Err(IecSrvError::protocol(format!(
                "{} is read-only",
                reference
            ))),
        }
    }

    async fn close(&self, handle: SessionHandle) -> Result<()> {
        let mut state = self.state.lock();
        let device = state.session_device(handle)?;
        state.record(Some(handle), ClientCall::Close { device })?;
        state.sessions.remove(&handle);
        debug!("Virtual association {} closed", handle);
        Ok(())
    }
}
