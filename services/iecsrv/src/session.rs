//! Connection session manager
//!
//! One [`DeviceSession`] per device identifier: the open association plus the
//! remote model fetched right after the handshake. Acquisition fails fast;
//! retrying it is the caller's business.
//!
//! A request holds its session through a [`SessionLease`]. The lease replaces
//! the association after a transient failure and gives it back when the
//! request ends, including when the request future is dropped mid-flight.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use errors::ClassifiedError;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{IecSrvError, Result};
use crate::model::DeviceIdentity;
use crate::protocol::{
    DataValue, FunctionalConstraint, ObjectReference, ProtocolClient, ServerModel, SessionHandle,
};
use crate::retry::RetryExecutor;

/// Established association with one device
pub struct DeviceSession {
    device_identification: String,
    addr: SocketAddr,
    handle: SessionHandle,
    model: ServerModel,
    client: Arc<dyn ProtocolClient>,
    operation_timeout: Duration,
    established_at: DateTime<Utc>,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device_identification", &self.device_identification)
            .field("addr", &self.addr)
            .field("handle", &self.handle)
            .field("model_nodes", &self.model.len())
            .field("established_at", &self.established_at)
            .finish()
    }
}

impl DeviceSession {
    pub fn device_identification(&self) -> &str {
        &self.device_identification
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn model(&self) -> &ServerModel {
        &self.model
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    fn ensure_node(&self, reference: &ObjectReference, fc: FunctionalConstraint) -> Result<()> {
        if self.model.find_model_node(reference, fc) {
            Ok(())
        } else {
            Err(IecSrvError::protocol(format!(
                "{} [{}] not found in server model of {}",
                reference, fc, self.device_identification
            )))
        }
    }

    /// Run one protocol call under the operation timeout
    async fn bounded<T>(
        &self,
        action: &str,
        reference: &ObjectReference,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.operation_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(IecSrvError::timeout(format!(
                "{} {} on {} timed out after {:?}",
                action, reference, self.device_identification, self.operation_timeout
            ))),
        }
    }

    /// Read one attribute, checked against the cached model
    pub async fn read(
        &self,
        reference: &ObjectReference,
        fc: FunctionalConstraint,
    ) -> Result<DataValue> {
        self.ensure_node(reference, fc)?;
        let value = self
            .bounded("Reading", reference, self.client.read_point(self.handle, reference, fc))
            .await?;
        debug!("{} read {} [{}] = {}", self.device_identification, reference, fc, value);
        Ok(value)
    }

    /// Write one attribute, checked against the cached model
    pub async fn write(
        &self,
        reference: &ObjectReference,
        fc: FunctionalConstraint,
        value: DataValue,
    ) -> Result<()> {
        self.ensure_node(reference, fc)?;
        self.bounded(
            "Writing",
            reference,
            self.client.write_point(self.handle, reference, fc, value),
        )
        .await?;
        debug!("{} wrote {} [{}] = {}", self.device_identification, reference, fc, value);
        Ok(())
    }
}

async fn close_association(
    client: &dyn ProtocolClient,
    device_identification: &str,
    handle: SessionHandle,
) {
    match client.close(handle).await {
        Ok(()) => debug!("Session {} with {} released", handle, device_identification),
        Err(e) => warn!(
            "Closing session {} with {} failed: {}",
            handle, device_identification, e
        ),
    }
}

/// Session table keyed by device identifier
pub struct ConnectionSessionManager {
    client: Arc<dyn ProtocolClient>,
    port: u16,
    connect_timeout: Duration,
    operation_timeout: Duration,
    sessions: DashMap<String, Arc<DeviceSession>>,
}

impl ConnectionSessionManager {
    pub fn new(client: Arc<dyn ProtocolClient>, config: &ConnectionConfig) -> Self {
        Self {
            client,
            port: config.port,
            connect_timeout: config.connect_timeout(),
            operation_timeout: config.operation_timeout(),
            sessions: DashMap::new(),
        }
    }

    /// Open an association and fetch the server model once
    ///
    /// A key that is already present is replaced: concurrent requests for
    /// the same device are not serialized here.
    pub async fn acquire(&self, identity: &DeviceIdentity) -> Result<Arc<DeviceSession>> {
        let device_identification = identity.device_identification.as_str();
        let addr = SocketAddr::new(identity.ip_address, self.port);

        let handle = match tokio::time::timeout(
            self.connect_timeout,
            self.client.connect(addr, device_identification),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(IecSrvError::timeout(format!(
                    "Connecting to {} at {} timed out after {:?}",
                    device_identification, addr, self.connect_timeout
                )))
            },
        };

        let model = match self.client.retrieve_model(handle).await {
            Ok(model) => model,
            Err(e) => {
                // Do not leak the association when discovery fails
                if let Err(close_err) = self.client.close(handle).await {
                    warn!(
                        "Closing association {} to {} failed: {}",
                        handle, device_identification, close_err
                    );
                }
                return Err(e);
            },
        };

        let session = Arc::new(DeviceSession {
            device_identification: device_identification.to_string(),
            addr,
            handle,
            model,
            client: Arc::clone(&self.client),
            operation_timeout: self.operation_timeout,
            established_at: Utc::now(),
        });

        if let Some(previous) = self
            .sessions
            .insert(device_identification.to_string(), Arc::clone(&session))
        {
            warn!(
                "Replacing active session {} for {} with {}",
                previous.handle, device_identification, handle
            );
        }

        info!(
            "Session {} established with {} at {} ({} model nodes)",
            handle,
            device_identification,
            addr,
            session.model.len()
        );
        Ok(session)
    }

    /// Request-scoped handle on the session of one device; nothing is opened yet
    pub fn lease(&self, identity: DeviceIdentity) -> SessionLease<'_> {
        SessionLease {
            manager: self,
            identity,
            current: Mutex::new(None),
        }
    }

    /// Close a session obtained from [`acquire`](Self::acquire)
    ///
    /// The table entry is only removed when it still points at this session.
    pub async fn release_session(&self, session: &DeviceSession) {
        self.forget(session);
        close_association(
            self.client.as_ref(),
            &session.device_identification,
            session.handle,
        )
        .await;
    }

    /// Like [`release_session`](Self::release_session) without waiting for the close
    ///
    /// The table entry goes immediately; the close runs on the current runtime.
    pub fn release_detached(&self, session: Arc<DeviceSession>) {
        self.forget(&session);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let client = Arc::clone(&self.client);
                runtime.spawn(async move {
                    close_association(
                        client.as_ref(),
                        &session.device_identification,
                        session.handle,
                    )
                    .await;
                });
            },
            Err(_) => warn!(
                "No runtime to close session {} with {}",
                session.handle, session.device_identification
            ),
        }
    }

    /// Remove and close the active session of a device; no-op when absent
    pub async fn release(&self, device_identification: &str) {
        if let Some((_, session)) = self.sessions.remove(device_identification) {
            close_association(self.client.as_ref(), device_identification, session.handle)
                .await;
        }
    }

    fn forget(&self, session: &DeviceSession) {
        self.sessions.remove_if(&session.device_identification, |_, current| {
            current.handle == session.handle
        });
    }

    pub fn get(&self, device_identification: &str) -> Option<Arc<DeviceSession>> {
        self.sessions
            .get(device_identification)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

/// Session of one request
///
/// Opens the association on first use and drops it after a transient
/// failure, so the next attempt runs on a fresh association. Dropping the
/// lease releases whatever session it still holds.
pub struct SessionLease<'a> {
    manager: &'a ConnectionSessionManager,
    identity: DeviceIdentity,
    current: Mutex<Option<Arc<DeviceSession>>>,
}

impl SessionLease<'_> {
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn device_identification(&self) -> &str {
        &self.identity.device_identification
    }

    /// Current session, opening one when there is none
    pub async fn session(&self) -> Result<Arc<DeviceSession>> {
        let current = self.current.lock().clone();
        if let Some(session) = current {
            return Ok(session);
        }
        let session = self.manager.acquire(&self.identity).await?;
        *self.current.lock() = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Open the session, retrying transient failures
    pub async fn connect(&self, executor: &RetryExecutor) -> Result<Arc<DeviceSession>> {
        let operation_name = format!("Connecting to {}", self.identity);
        executor.run(&operation_name, move || self.session()).await
    }

    /// Run `operation` on the session under the retry envelope
    ///
    /// Every attempt that fails transiently discards its session.
    pub async fn run<T, F, Fut>(
        &self,
        executor: &RetryExecutor,
        operation_name: &str,
        operation: F,
    ) -> Result<T>
    where
        F: Fn(Arc<DeviceSession>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let operation = &operation;
        executor
            .run(operation_name, move || async move {
                let session = self.session().await?;
                match operation(Arc::clone(&session)).await {
                    Err(e) if e.is_transient() => {
                        self.discard(&session).await;
                        Err(e)
                    },
                    result => result,
                }
            })
            .await
    }

    async fn discard(&self, session: &Arc<DeviceSession>) {
        {
            let mut current = self.current.lock();
            if current
                .as_ref()
                .is_some_and(|held| held.handle == session.handle)
            {
                *current = None;
            }
        }
        warn!(
            "Dropping session {} with {} after transient failure",
            session.handle, session.device_identification
        );
        self.manager.release_session(session).await;
    }

    /// Close the held session, if any
    pub async fn release(&self) {
        let current = self.current.lock().take();
        if let Some(session) = current {
            self.manager.release_session(&session).await;
        }
    }
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.current.get_mut().take() {
            debug!(
                "Request for {} abandoned, releasing session {}",
                session.device_identification, session.handle
            );
            self.manager.release_detached(session);
        }
    }
}
