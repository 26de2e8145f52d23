//! Relay control state machine
//!
//! `Idle -> ControlModelChecked -> [ControlModelEnabled] -> PositionWritten -> Done`
//!
//! The control model is enabled in its own write and confirmed before the
//! position is written. The whole sequence is one retry unit: a transient
//! failure anywhere restarts from the control-model read with a fresh machine
//! on a fresh association.

use tracing::{debug, info};

use crate::error::{IecSrvError, Result};
use crate::protocol::node::{self, DataAttribute};
use crate::protocol::{DataValue, ObjectReference};
use crate::retry::RetryExecutor;
use crate::session::{DeviceSession, SessionLease};

const CONTROL_DISABLED: i8 = 0;
const CONTROL_ENABLED: i8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayControlState {
    Idle,
    ControlModelChecked { enabled: bool },
    ControlModelEnabled,
    PositionWritten,
    Done,
}

/// One "switch relay n to on/off" sequence
#[derive(Debug, Clone)]
pub struct RelayControl {
    relay_index: u16,
    on: bool,
    ctl_model: ObjectReference,
    ctl_val: ObjectReference,
    state: RelayControlState,
}

impl RelayControl {
    /// Resolve the relay's references; no I/O
    pub fn new(relay_index: u16, on: bool) -> Result<Self> {
        Ok(Self {
            relay_index,
            on,
            ctl_model: node::attribute_reference(relay_index, DataAttribute::CtlModel)?,
            ctl_val: node::attribute_reference(relay_index, DataAttribute::CtlVal)?,
            state: RelayControlState::Idle,
        })
    }

    pub fn state(&self) -> RelayControlState {
        self.state
    }

    /// Drive the machine to `Done`
    pub async fn execute(mut self, session: &DeviceSession) -> Result<()> {
        while let Some(next) = self.step(session).await? {
            debug!(
                "Relay {} on {}: {:?} -> {:?}",
                self.relay_index,
                session.device_identification(),
                self.state,
                next
            );
            self.state = next;
        }
        Ok(())
    }

    /// Next state, `None` once finished
    async fn step(&self, session: &DeviceSession) -> Result<Option<RelayControlState>> {
        match self.state {
            RelayControlState::Idle => {
                let ctl_model = self.read_ctl_model(session).await?;
                Ok(Some(RelayControlState::ControlModelChecked {
                    enabled: ctl_model != CONTROL_DISABLED,
                }))
            },
            RelayControlState::ControlModelChecked { enabled: false } => {
                info!(
                    "Enabling control model of relay {} on {}",
                    self.relay_index,
                    session.device_identification()
                );
                session
                    .write(
                        &self.ctl_model,
                        DataAttribute::CtlModel.functional_constraint(),
                        DataValue::Int8(CONTROL_ENABLED),
                    )
                    .await?;

                if self.read_ctl_model(session).await? == CONTROL_DISABLED {
                    return Err(IecSrvError::protocol(format!(
                        "{} did not accept enabling {}",
                        session.device_identification(),
                        self.ctl_model
                    )));
                }
                Ok(Some(RelayControlState::ControlModelEnabled))
            },
            RelayControlState::ControlModelChecked { enabled: true }
            | RelayControlState::ControlModelEnabled => {
                session
                    .write(
                        &self.ctl_val,
                        DataAttribute::CtlVal.functional_constraint(),
                        DataValue::Bool(self.on),
                    )
                    .await?;
                Ok(Some(RelayControlState::PositionWritten))
            },
            RelayControlState::PositionWritten => Ok(Some(RelayControlState::Done)),
            RelayControlState::Done => Ok(None),
        }
    }

    async fn read_ctl_model(&self, session: &DeviceSession) -> Result<i8> {
        let value = session
            .read(
                &self.ctl_model,
                DataAttribute::CtlModel.functional_constraint(),
            )
            .await?;
        value.as_int().and_then(|v| i8::try_from(v).ok()).ok_or_else(|| {
            IecSrvError::protocol(format!(
                "Unexpected value {} for {}",
                value, self.ctl_model
            ))
        })
    }
}

/// Switch one relay under the retry envelope
pub async fn switch_relay(
    executor: &RetryExecutor,
    lease: &SessionLease<'_>,
    relay_index: u16,
    on: bool,
) -> Result<()> {
    let operation_name = format!(
        "Switching relay {} of {}",
        relay_index,
        lease.device_identification()
    );
    lease
        .run(executor, &operation_name, |session| async move {
            RelayControl::new(relay_index, on)?.execute(&session).await
        })
        .await?;
    info!(
        "Relay {} of {} switched {}",
        relay_index,
        lease.device_identification(),
        if on { "on" } else { "off" }
    );
    Ok(())
}
