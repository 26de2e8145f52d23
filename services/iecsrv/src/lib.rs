//! IEC 61850 device-control adapter
//!
//! Talks to street-lighting field devices (SSLDs) over a stateful,
//! model-based protocol: reads relay status and switches relays, mapping the
//! application's light indices onto protocol control points.
//!
//! # Architecture
//!
//! ```text
//! DeviceService ──► DeviceConfigStore ──► resolver (switch only)
//!      │
//!      ├─► ConnectionSessionManager ──► SessionLease ──► ProtocolClient
//!      │
//!      └─► RelayControl | assemble_status ──► SessionLease::run (RetryExecutor)
//! ```
//!
//! - **`protocol`**: client trait, typed values, logical node references,
//!   in-memory virtual client
//! - **`session`**: per-device association with cached server model, and the
//!   request-scoped lease that reconnects after transient failures
//! - **`retry`**: transient-failure retry primitive
//! - **`relay`** / **`status`**: the protocol sequences behind switch and status
//! - **`service`**: boundary API returning response or failure messages

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod protocol;
pub mod relay;
pub mod resolver;
pub mod retry;
pub mod service;
pub mod session;
pub mod status;
pub mod store;

pub use config::IecSrvConfig;
pub use error::{FunctionalErrorType, IecSrvError, Result};
pub use model::{
    DeviceConfig, DeviceIdentity, DeviceRequest, DeviceStatus, FailureResponse,
    GetStatusResponse, LightValue, OkResponse, OutputSetting, RelayType, SetLightRequest,
};
pub use service::DeviceService;
pub use store::{DeviceConfigStore, InMemoryDeviceStore};
