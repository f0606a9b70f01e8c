//! Boundary to the device-call layer.
//!
//! Customizers talk to the device through [`DeviceCall`]. Every call
//! returns a [`ReplyFuture`] that is resolved by the transport from any
//! thread; the customizer blocks on it with [`wait_for_reply`] when it
//! needs the result. A reply that does not arrive in time is reported as
//! [`DeviceError::Timeout`] and fails the customizer step like any other
//! device error. Transports own retries; the engine never retries.
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// A request sent to the device.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Message name (`sw_interface_add_del_address`, `gpe_enable_disable`, ...).
    pub name: String,
    /// Message fields.
    pub payload: Value,
}

impl Request {
    /// New request.
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// A successful device reply; the payload is interpreted by the customizer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reply {
    /// Reply fields.
    pub payload: Value,
}

impl Reply {
    /// Reply carrying `payload`.
    #[must_use]
    pub const fn new(payload: Value) -> Self {
        Self { payload }
    }

    /// Decode the payload into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Transport`] if the payload has the wrong shape.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DeviceError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| DeviceError::Transport(format!("unexpected reply payload: {e}")))
    }
}

/// Failure of one device call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device processed the request and refused it.
    #[error("{request} rejected by device (retval {retval}): {message}")]
    Rejected {
        /// Request name.
        request: String,
        /// Device return code.
        retval: i32,
        /// Device message.
        message: String,
    },

    /// No reply arrived within the bounded wait.
    #[error("{request} timed out after {waited:?}")]
    Timeout {
        /// Request name.
        request: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The transport dropped the request without replying.
    #[error("{request}: transport closed before replying")]
    Disconnected {
        /// Request name.
        request: String,
    },

    /// The transport failed in some other way.
    #[error("transport error: {0}")]
    Transport(String),
}

/// The device-call layer.
pub trait DeviceCall: Send + Sync {
    /// Send `request`; the reply is delivered through the returned future.
    fn invoke(&self, request: Request) -> ReplyFuture;
}

/// Pending result of a device call.
#[derive(Debug)]
pub struct ReplyFuture {
    request: String,
    rx: Receiver<Result<Reply, DeviceError>>,
}

/// Completion side of a [`ReplyFuture`], held by the transport.
#[derive(Debug)]
pub struct ReplyPromise {
    tx: SyncSender<Result<Reply, DeviceError>>,
}

impl ReplyFuture {
    /// Unresolved future for a request named `request`, with its promise.
    pub fn pending(request: impl Into<String>) -> (Self, ReplyPromise) {
        let (tx, rx) = mpsc::sync_channel(1);
        (
            Self {
                request: request.into(),
                rx,
            },
            ReplyPromise { tx },
        )
    }

    /// Future that is already resolved.
    pub fn ready(request: impl Into<String>, result: Result<Reply, DeviceError>) -> Self {
        let (future, promise) = Self::pending(request);
        promise.complete(result);
        future
    }

    /// Name of the request this future belongs to.
    #[must_use]
    pub fn request(&self) -> &str {
        &self.request
    }

    /// Block until the reply arrives or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns the device's error, [`DeviceError::Timeout`] when the wait
    /// expires, or [`DeviceError::Disconnected`] when the promise was
    /// dropped unresolved.
    pub fn wait(self, timeout: Duration) -> Result<Reply, DeviceError> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(DeviceError::Timeout {
                request: self.request,
                waited: timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(DeviceError::Disconnected {
                request: self.request,
            }),
        }
    }
}

impl ReplyPromise {
    /// Resolve the future. Completing a future nobody waits for any more
    /// is not an error.
    pub fn complete(self, result: Result<Reply, DeviceError>) {
        let _ = self.tx.send(result);
    }
}

/// Wait for `future` with a bounded `timeout`, logging the outcome.
///
/// # Errors
///
/// See [`ReplyFuture::wait`].
pub fn wait_for_reply(future: ReplyFuture, timeout: Duration) -> Result<Reply, DeviceError> {
    let request = future.request.clone();
    let started = Instant::now();
    let result = future.wait(timeout);
    match &result {
        Ok(_) => debug!(
            target: "treeconf::device",
            request = %request,
            elapsed_ms = started.elapsed().as_millis(),
            "reply received"
        ),
        Err(e) => warn!(target: "treeconf::device", request = %request, "device call failed: {e}"),
    }
    result
}
