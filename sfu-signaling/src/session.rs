//! Per-connection session state

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::{Result, SignalingError};
use crate::protocol::ServerEvent;
use crate::types::{DeviceCapabilities, PeerId};

/// Session lifecycle.
///
/// `Connecting → Negotiated → Producing`, and any state `→ Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Connected, device capabilities not loaded yet
    Connecting,
    /// Device capabilities recorded
    Negotiated,
    /// At least one producer created
    Producing,
    /// Torn down; every further call fails with `SessionClosed`
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Negotiated => "negotiated",
            Self::Producing => "producing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// One signaling connection
pub struct PeerSession {
    id: PeerId,
    name: String,
    connected_at: DateTime<Utc>,

    state: RwLock<SessionState>,
    /// Set once by `load_device`, immutable afterwards
    device_capabilities: RwLock<Option<DeviceCapabilities>>,

    /// Serializes this peer's mutating signaling calls
    gate: Mutex<()>,

    events: mpsc::Sender<ServerEvent>,
}

impl PeerSession {
    #[must_use]
    pub fn new(id: PeerId, name: String, events: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id,
            name,
            connected_at: Utc::now(),
            state: RwLock::new(SessionState::Connecting),
            device_capabilities: RwLock::new(None),
            gate: Mutex::new(()),
            events,
        }
    }

    #[must_use]
    pub const fn id(&self) -> &PeerId {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    #[must_use]
    pub fn device_capabilities(&self) -> Option<DeviceCapabilities> {
        self.device_capabilities.read().clone()
    }

    /// Wait for exclusive use of the session.
    ///
    /// Held for the whole of a mutating call, engine round-trips included.
    /// Disconnect never takes it.
    pub async fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(self.closed_error())
        } else {
            Ok(())
        }
    }

    /// Device capabilities, failing unless `load_device` has succeeded
    pub fn ensure_negotiated(&self) -> Result<DeviceCapabilities> {
        match self.state() {
            SessionState::Closed => Err(self.closed_error()),
            SessionState::Connecting => Err(SignalingError::ProtocolViolation(format!(
                "peer {} must load its device first",
                self.id
            ))),
            SessionState::Negotiated | SessionState::Producing => {
                self.device_capabilities().ok_or_else(|| {
                    SignalingError::invariant(format!(
                        "peer {} is negotiated without device capabilities",
                        self.id
                    ))
                })
            }
        }
    }

    /// Record device capabilities (`Connecting → Negotiated`)
    pub fn load_device(&self, capabilities: DeviceCapabilities) -> Result<()> {
        let mut state = self.state.write();
        match *state {
            SessionState::Closed => Err(self.closed_error()),
            SessionState::Negotiated | SessionState::Producing => {
                Err(SignalingError::AlreadyNegotiated(format!(
                    "peer {} already loaded its device",
                    self.id
                )))
            }
            SessionState::Connecting => {
                *self.device_capabilities.write() = Some(capabilities);
                *state = SessionState::Negotiated;
                Ok(())
            }
        }
    }

    /// `Negotiated → Producing` on the first producer; a no-op otherwise
    pub fn mark_producing(&self) {
        let mut state = self.state.write();
        if *state == SessionState::Negotiated {
            *state = SessionState::Producing;
        }
    }

    /// Move to `Closed`. Returns `false` if the session was already closed.
    pub fn close(&self) -> bool {
        let mut state = self.state.write();
        if *state == SessionState::Closed {
            return false;
        }
        *state = SessionState::Closed;
        true
    }

    /// Queue an event for the peer without blocking.
    ///
    /// Events for closed sessions are dropped, as are events that do not fit the
    /// outbound queue.
    pub fn emit(&self, event: ServerEvent) -> bool {
        if self.is_closed() {
            debug!(peer_id = %self.id, event = event.name(), "Dropping event for closed session");
            return false;
        }
        match self.events.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(peer_id = %self.id, event = event.name(), "Event queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!(peer_id = %self.id, event = event.name(), "Event receiver gone");
                false
            }
        }
    }

    fn closed_error(&self) -> SignalingError {
        SignalingError::SessionClosed(format!("peer {} is disconnected", self.id))
    }
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
