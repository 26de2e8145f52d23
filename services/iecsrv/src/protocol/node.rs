//! Logical node definitions for the SSLD relay model
//!
//! Relays live in the `SWDeviceGenericIO` logical device as switch controller
//! nodes `XSWC1`..`XSWC4`; every relay exposes a `Pos` data object.

use serde::{Deserialize, Serialize};

use super::FunctionalConstraint;
use crate::error::{IecSrvError, Result};

pub const LOGICAL_DEVICE: &str = "SWDeviceGenericIO";
pub const POSITION: &str = "Pos";

/// Switch controller logical nodes, one per relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalNode {
    SwitchComponentOne,
    SwitchComponentTwo,
    SwitchComponentThree,
    SwitchComponentFour,
}

impl LogicalNode {
    pub const ALL: [LogicalNode; 4] = [
        LogicalNode::SwitchComponentOne,
        LogicalNode::SwitchComponentTwo,
        LogicalNode::SwitchComponentThree,
        LogicalNode::SwitchComponentFour,
    ];

    pub fn for_relay(relay_index: u16) -> Result<Self> {
        match relay_index {
            1 => Ok(Self::SwitchComponentOne),
            2 => Ok(Self::SwitchComponentTwo),
            3 => Ok(Self::SwitchComponentThree),
            4 => Ok(Self::SwitchComponentFour),
            other => Err(IecSrvError::protocol(format!(
                "No logical node for relay index {}",
                other
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::SwitchComponentOne => "XSWC1",
            Self::SwitchComponentTwo => "XSWC2",
            Self::SwitchComponentThree => "XSWC3",
            Self::SwitchComponentFour => "XSWC4",
        }
    }

    pub fn relay_index(self) -> u16 {
        match self {
            Self::SwitchComponentOne => 1,
            Self::SwitchComponentTwo => 2,
            Self::SwitchComponentThree => 3,
            Self::SwitchComponentFour => 4,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|node| node.name() == name)
    }
}

/// Attributes of the `Pos` data object used by the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataAttribute {
    /// `ctlModel`, 0 means control disabled
    CtlModel,
    /// `Oper.ctlVal`, the commanded position
    CtlVal,
    /// `stVal`, the current position
    StVal,
}

impl DataAttribute {
    pub const ALL: [DataAttribute; 3] = [
        DataAttribute::CtlModel,
        DataAttribute::CtlVal,
        DataAttribute::StVal,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Self::CtlModel => "ctlModel",
            Self::CtlVal => "Oper.ctlVal",
            Self::StVal => "stVal",
        }
    }

    pub fn functional_constraint(self) -> FunctionalConstraint {
        match self {
            Self::CtlModel => FunctionalConstraint::Cf,
            Self::CtlVal => FunctionalConstraint::Co,
            Self::StVal => FunctionalConstraint::St,
        }
    }

    fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|attr| attr.path() == path)
    }
}

/// Object reference in `LD/LN.DO[.DA]` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectReference(String);

impl ObjectReference {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Append a child path: `XSWC1.Pos` + `stVal` -> `XSWC1.Pos.stVal`
    pub fn child(&self, path: &str) -> Self {
        Self(format!("{}.{}", self.0, path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// `SWDeviceGenericIO/XSWC{n}.Pos` for relay `n`
pub fn position_reference(relay_index: u16) -> Result<ObjectReference> {
    let node = LogicalNode::for_relay(relay_index)?;
    Ok(ObjectReference(format!(
        "{}/{}.{}",
        LOGICAL_DEVICE,
        node.name(),
        POSITION
    )))
}

/// Full reference of one attribute of a relay's position object
pub fn attribute_reference(relay_index: u16, attribute: DataAttribute) -> Result<ObjectReference> {
    Ok(position_reference(relay_index)?.child(attribute.path()))
}

/// Inverse of [`attribute_reference`]
pub fn parse_attribute_reference(reference: &ObjectReference) -> Option<(u16, DataAttribute)> {
    let rest = reference
        .as_str()
        .strip_prefix(LOGICAL_DEVICE)?
        .strip_prefix('/')?;
    let (node_name, rest) = rest.split_once('.')?;
    let attribute_path = rest.strip_prefix(POSITION)?.strip_prefix('.')?;

    let node = LogicalNode::from_name(node_name)?;
    let attribute = DataAttribute::from_path(attribute_path)?;
    Some((node.relay_index(), attribute))
}
