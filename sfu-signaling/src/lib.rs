//! SFU signaling core
//!
//! Session and resource orchestration for a WebRTC Selective Forwarding Unit.
//! Packet forwarding, DTLS/ICE and codec negotiation stay inside the media engine;
//! this crate decides which transports, producers and consumers may exist, drives
//! each peer through the signaling handshake, and tears everything down again when
//! a peer leaves.
//!
//! ## Architecture
//!
//! - **`ResourceRegistry`**: keyed store of transports, producers and consumers with
//!   cascading removal
//! - **`PeerSession`**: per-connection state (`Connecting → Negotiated → Producing →
//!   Closed`) and outbound event queue
//! - **`EngineAdapter`**: the capability set required from a media engine
//! - **`SignalingOrchestrator`**: the per-peer protocol state machine
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sfu_signaling::{
//!     EngineConfig, MemoryEngine, SfuConfig, SignalingOrchestrator, TransportRole,
//! };
//! use std::sync::Arc;
//!
//! let engine = Arc::new(MemoryEngine::new(EngineConfig::default()));
//! let orchestrator = SignalingOrchestrator::new(engine, SfuConfig::default());
//!
//! let alice = orchestrator.connect("alice")?;
//! let caps = orchestrator.request_capabilities(&alice.peer_id).await?;
//! orchestrator.load_device(&alice.peer_id, caps).await?;
//! let send = orchestrator.create_transport(&alice.peer_id, TransportRole::Producer).await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod types;

pub use config::{Config, EngineConfig, LoggingConfig, MediaCodecConfig, ServerConfig, SfuConfig};
pub use engine::{EngineAdapter, EngineEvent, EngineHandle, MemoryEngine};
pub use error::{ErrorBody, Result, SignalingError};
pub use orchestrator::{OrchestratorStats, PeerConnection, SignalingOrchestrator};
pub use protocol::{RequestFrame, ResponseFrame, ServerEvent, SignalingRequest};
pub use registry::{RegistryStats, RemovedResources, ResourceRegistry};
pub use session::{PeerSession, SessionState};
pub use types::{
    ConsumerId, DeviceCapabilities, MediaKind, PeerId, ProducerId, StreamKind, TransportId,
    TransportRole,
};
