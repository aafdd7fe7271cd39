//! Media engine boundary
//!
//! The core never touches packets. Everything media-related goes through
//! [`EngineAdapter`], which any engine (a mediasoup worker over IPC, an in-process
//! test double, ...) can implement. Engine callbacks such as "DTLS closed" are
//! surfaced as [`EngineEvent`]s on a channel handed out once by
//! [`EngineAdapter::take_event_receiver`].

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{DeviceCapabilities, MediaKind, TransportRole};

pub use memory::{EngineOp, MemoryEngine, Suspension};

/// Engine-side transport handle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportHandle(pub String);

/// Engine-side producer handle (media or data)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProducerHandle(pub String);

/// Engine-side consumer handle (media or data)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerHandle(pub String);

impl TransportHandle {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl ProducerHandle {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl ConsumerHandle {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Any handle the engine can close
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EngineHandle {
    Transport(TransportHandle),
    Producer(ProducerHandle),
    Consumer(ConsumerHandle),
}

impl EngineHandle {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Transport(h) => h.id(),
            Self::Producer(h) => h.id(),
            Self::Consumer(h) => h.id(),
        }
    }
}

impl fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(h) => write!(f, "transport:{}", h.0),
            Self::Producer(h) => write!(f, "producer:{}", h.0),
            Self::Consumer(h) => write!(f, "consumer:{}", h.0),
        }
    }
}

/// Connection parameters the browser needs to build its side of a transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParameters {
    pub id: String,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: Value,
    pub sctp_parameters: Option<Value>,
}

/// Result of [`EngineAdapter::create_transport`]
#[derive(Debug, Clone)]
pub struct CreatedTransport {
    pub handle: TransportHandle,
    pub parameters: TransportParameters,
}

/// Outbound media description sent by the browser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaProduceParameters {
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    #[serde(default)]
    pub app_data: Value,
}

/// Outbound data-channel description sent by the browser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataProduceParameters {
    pub sctp_stream_parameters: Value,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub protocol: String,
}

/// Result of [`EngineAdapter::consume`]; the consumer is always paused
#[derive(Debug, Clone)]
pub struct CreatedConsumer {
    pub handle: ConsumerHandle,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
}

/// Result of [`EngineAdapter::consume_data`]
#[derive(Debug, Clone)]
pub struct CreatedDataConsumer {
    pub handle: ConsumerHandle,
    pub sctp_stream_parameters: Value,
    pub label: String,
    pub protocol: String,
}

/// Closures initiated by the engine itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// DTLS went to `closed` or the transport died inside the engine
    TransportClosed(TransportHandle),
    /// The producer was closed engine-side
    ProducerClosed(ProducerHandle),
}

/// Capability set the core requires from a media engine.
///
/// All async methods may suspend on network or IPC; callers must not hold
/// registry locks across them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    /// Router-level capabilities, shared by every peer.
    /// Fails with `EngineUnavailable` before the engine is initialized.
    async fn router_capabilities(&self) -> Result<DeviceCapabilities>;

    /// Fails with `EngineUnavailable` if the engine is not initialized.
    async fn create_transport(&self, role: TransportRole) -> Result<CreatedTransport>;

    /// Fails with `DtlsFailure`.
    async fn connect_transport(
        &self,
        transport: &TransportHandle,
        dtls_parameters: &Value,
    ) -> Result<()>;

    /// Fails with `UnsupportedMedia` if kind or RTP parameters are rejected.
    async fn produce(
        &self,
        transport: &TransportHandle,
        parameters: &MediaProduceParameters,
    ) -> Result<ProducerHandle>;

    async fn produce_data(
        &self,
        transport: &TransportHandle,
        parameters: &DataProduceParameters,
    ) -> Result<ProducerHandle>;

    /// Pure capability check; must be consulted before [`EngineAdapter::consume`].
    fn can_consume(&self, producer: &ProducerHandle, capabilities: &DeviceCapabilities) -> bool;

    /// Creates a paused consumer. Fails with `IncompatibleCapabilities`.
    async fn consume(
        &self,
        transport: &TransportHandle,
        producer: &ProducerHandle,
        capabilities: &DeviceCapabilities,
    ) -> Result<CreatedConsumer>;

    async fn consume_data(
        &self,
        transport: &TransportHandle,
        producer: &ProducerHandle,
    ) -> Result<CreatedDataConsumer>;

    async fn resume(&self, consumer: &ConsumerHandle) -> Result<()>;

    /// Idempotent.
    async fn close(&self, handle: &EngineHandle);

    /// Engine-initiated closures. Returns `None` after the first call.
    ///
    /// Unbounded, so every closure reaches the registry.
    fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<EngineEvent>>;
}
