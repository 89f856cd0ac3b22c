//! Portal transport seam.
//!
//! Confined clients cannot be granted playback or record by static policy;
//! the broker escalates those requests to the desktop portal, an
//! out-of-process arbiter that may put a dialog in front of the user. The
//! wire protocol is fixed:
//!
//! - method call `AccessDevice` on [`PORTAL_DEVICE_INTERFACE`] at
//!   [`PORTAL_OBJECT_PATH`] of [`PORTAL_DESTINATION`], carrying the
//!   client's trusted pid, the device tags derived from the hook, and an
//!   empty options dictionary;
//! - the reply is the object path of a portal Request;
//! - the verdict arrives later as the `Response` signal on
//!   [`PORTAL_REQUEST_INTERFACE`], whose first argument is a response code
//!   (`0` grants, anything else denies).
//!
//! [`PortalBus`] abstracts the bus connection so the broker stays
//! transport-agnostic; [`ChannelPortal`] is an in-process implementation
//! over Tokio channels for embedding hosts and tests.

use crate::hooks::AccessHook;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

/// Bus name the portal listens on.
pub const PORTAL_DESTINATION: &str = "org.freedesktop.portal.Desktop";
/// Object path of the portal entry point.
pub const PORTAL_OBJECT_PATH: &str = "/org/freedesktop/portal/desktop";
/// Interface carrying the `AccessDevice` method.
pub const PORTAL_DEVICE_INTERFACE: &str = "org.freedesktop.portal.Device";
/// Method name for device arbitration.
pub const PORTAL_ACCESS_METHOD: &str = "AccessDevice";
/// Interface of the per-call Request object.
pub const PORTAL_REQUEST_INTERFACE: &str = "org.freedesktop.portal.Request";
/// Signal member delivering the verdict.
pub const PORTAL_RESPONSE_MEMBER: &str = "Response";
/// Response code meaning the user granted access.
pub const RESPONSE_GRANTED: u32 = 0;

/// Device classes the portal can arbitrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceTag {
    Microphone,
    Speakers,
}

impl DeviceTag {
    /// Wire spelling of the tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceTag::Microphone => "microphone",
            DeviceTag::Speakers => "speakers",
        }
    }

    /// Device tags requested for a hook. Only record, playback, and sample
    /// playback are portal-arbitrated; every other hook has no device
    /// mapping and must not reach the portal.
    #[must_use]
    pub fn for_hook(hook: AccessHook) -> Option<&'static [DeviceTag]> {
        match hook {
            AccessHook::ConnectRecord => Some(&[DeviceTag::Microphone]),
            AccessHook::ConnectPlayback | AccessHook::PlaySample => Some(&[DeviceTag::Speakers]),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object path identifying one portal Request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestHandle(String);

impl RequestHandle {
    #[must_use]
    pub fn new(path: impl Into<String>) -> RequestHandle {
        RequestHandle(path.into())
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Failures on the portal transport.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PortalError {
    /// No bus connection is available.
    #[error("session bus is not available")]
    BusUnavailable,
    /// The method call could not be sent or returned an error.
    #[error("portal call failed: {0}")]
    CallFailed(String),
    /// The method reply did not carry a Request object path.
    #[error("portal reply carried no request handle")]
    MissingHandle,
    /// Subscribing to the Response signal failed.
    #[error("subscribing to portal responses failed: {0}")]
    SubscribeFailed(String),
    /// No arbitration is waiting under the given handle.
    #[error("no pending portal request for handle {0}")]
    UnknownHandle(String),
    /// The Response signal carried no usable response code.
    #[error("portal response was malformed")]
    MalformedResponse,
}

/// Connection to the portal.
///
/// `access_device` performs the method call and yields the Request handle;
/// `wait_response` resolves when that Request's `Response` signal arrives,
/// yielding the raw response code. The device tags are the only
/// hook-dependent call argument; bus implementations append the empty
/// options dictionary themselves. Implementations release any per-call
/// subscription state on every exit path, including cancellation: the
/// broker drops the `wait_response` future when an arbitration is timed
/// out or abandoned.
#[async_trait]
pub trait PortalBus: Send + Sync {
    async fn access_device(
        &self,
        pid: u32,
        devices: &[DeviceTag],
    ) -> Result<RequestHandle, PortalError>;

    async fn wait_response(&self, handle: &RequestHandle) -> Result<u32, PortalError>;
}

/// One arbitration as seen by the consumer of a [`ChannelPortal`].
#[derive(Debug)]
pub struct AccessQuery {
    pub pid: u32,
    pub devices: Vec<DeviceTag>,
    pub handle: RequestHandle,
    responder: oneshot::Sender<u32>,
}

impl AccessQuery {
    /// Deliver a raw response code.
    pub fn respond(self, code: u32) {
        let _ = self.responder.send(code);
    }

    /// Grant the request.
    pub fn grant(self) {
        self.respond(RESPONSE_GRANTED);
    }

    /// Deny the request.
    pub fn deny(self) {
        self.respond(2);
    }
}

/// In-process portal over Tokio channels.
///
/// Queries are delivered to the receiver returned by [`ChannelPortal::new`];
/// each carries a one-shot responder standing in for the Response signal.
/// Useful for embedding hosts that arbitrate internally, and for tests.
#[derive(Debug)]
pub struct ChannelPortal {
    serial: AtomicU64,
    queries: mpsc::UnboundedSender<AccessQuery>,
    waiting: Mutex<HashMap<RequestHandle, oneshot::Receiver<u32>>>,
}

impl ChannelPortal {
    /// Create a portal and the query stream its consumer drains.
    #[must_use]
    pub fn new() -> (Arc<ChannelPortal>, mpsc::UnboundedReceiver<AccessQuery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let portal = Arc::new(ChannelPortal {
            serial: AtomicU64::new(0),
            queries: tx,
            waiting: Mutex::new(HashMap::new()),
        });
        (portal, rx)
    }
}

#[async_trait]
impl PortalBus for ChannelPortal {
    async fn access_device(
        &self,
        pid: u32,
        devices: &[DeviceTag],
    ) -> Result<RequestHandle, PortalError> {
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        let handle = RequestHandle::new(format!("{PORTAL_OBJECT_PATH}/request/{serial}"));
        let (respond_tx, respond_rx) = oneshot::channel();

        let query = AccessQuery {
            pid,
            devices: devices.to_vec(),
            handle: handle.clone(),
            responder: respond_tx,
        };
        self.queries
            .send(query)
            .map_err(|_| PortalError::CallFailed("portal consumer is gone".into()))?;

        self.waiting.lock().unwrap().insert(handle.clone(), respond_rx);
        Ok(handle)
    }

    async fn wait_response(&self, handle: &RequestHandle) -> Result<u32, PortalError> {
        let rx = self
            .waiting
            .lock()
            .unwrap()
            .remove(handle)
            .ok_or_else(|| PortalError::UnknownHandle(handle.path().to_owned()))?;
        rx.await.map_err(|_| PortalError::MalformedResponse)
    }
}
