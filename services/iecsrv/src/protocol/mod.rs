//! Protocol capability consumed by the adapter
//!
//! The wire protocol itself (MMS encoding, association setup, model discovery)
//! stays behind [`ProtocolClient`]; the adapter only sees object references,
//! functional constraints and typed values.

pub mod node;
pub mod virt;

use std::collections::HashSet;
use std::net::SocketAddr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
pub use node::{DataAttribute, LogicalNode, ObjectReference};
pub use virt::VirtualClient;

/// IEC 61850 functional constraint of a data attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FunctionalConstraint {
    /// Status information
    St,
    /// Configuration
    Cf,
    /// Control
    Co,
}

impl std::fmt::Display for FunctionalConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::St => "ST",
            Self::Cf => "CF",
            Self::Co => "CO",
        };
        f.write_str(name)
    }
}

/// Typed attribute value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataValue {
    Bool(bool),
    Int8(i8),
    Int32(i32),
}

impl DataValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DataValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            DataValue::Int8(v) => Some(i64::from(*v)),
            DataValue::Int32(v) => Some(i64::from(*v)),
            DataValue::Bool(_) => None,
        }
    }
}

impl std::fmt::Display for DataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataValue::Bool(v) => write!(f, "{}", v),
            DataValue::Int8(v) => write!(f, "{}", v),
            DataValue::Int32(v) => write!(f, "{}", v),
        }
    }
}

/// Opaque handle of an open association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle(pub u64);

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Remote data model retrieved once per association
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerModel {
    nodes: HashSet<(ObjectReference, FunctionalConstraint)>,
}

impl ServerModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, reference: ObjectReference, fc: FunctionalConstraint) -> Self {
        self.add_node(reference, fc);
        self
    }

    pub fn add_node(&mut self, reference: ObjectReference, fc: FunctionalConstraint) {
        self.nodes.insert((reference, fc));
    }

    /// Whether the model has `reference` under functional constraint `fc`
    pub fn find_model_node(&self, reference: &ObjectReference, fc: FunctionalConstraint) -> bool {
        self.nodes.contains(&(reference.clone(), fc))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Protocol client library seam
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Open an association with the device
    async fn connect(&self, addr: SocketAddr, device_identification: &str) -> Result<SessionHandle>;

    /// Retrieve the remote data model of an open association
    async fn retrieve_model(&self, handle: SessionHandle) -> Result<ServerModel>;

    async fn read_point(
        &self,
        handle: SessionHandle,
        reference: &ObjectReference,
        fc: FunctionalConstraint,
    ) -> Result<DataValue>;

    async fn write_point(
        &self,
        handle: SessionHandle,
        reference: &ObjectReference,
        fc: FunctionalConstraint,
        value: DataValue,
    ) -> Result<()>;

    /// Close the association
    async fn close(&self, handle: SessionHandle) -> Result<()>;
}
