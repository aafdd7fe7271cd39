//! Signaling orchestrator
//!
//! Drives each peer through the negotiation sequence
//!
//! ```text
//! getCapabilities → loadDevice → createTransport → connectTransport
//!     → produce / produceData → call → consume / consumeData → resumeConsumer
//! ```
//!
//! validating preconditions, calling the engine, and committing results to the
//! [`ResourceRegistry`].
//!
//! ## Concurrency
//!
//! Calls for different peers run concurrently. Mutating calls for the same peer are
//! serialized by the session gate ([`PeerSession::exclusive`]). No registry entry
//! is held across an engine await: state is read, the engine is called, and the
//! result is committed afterwards. The commit re-validates everything (the peer may
//! have disconnected, the producer may have closed); if it fails, the engine handle
//! just created is closed before the error is returned.
//!
//! The gate is the only lock held across an engine await. That is safe because
//! disconnect, the sole cancellation trigger, never takes it.
//!
//! Disconnect does not wait for the gate. It closes the session, removes the peer
//! from the registry (the linearization point), and releases every removed engine
//! handle exactly once.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SfuConfig;
use crate::engine::{
    DataProduceParameters, EngineAdapter, EngineEvent, EngineHandle, MediaProduceParameters,
    TransportParameters,
};
use crate::error::{Result, SignalingError};
use crate::protocol::{
    CallOffer, ConsumerParameters, DataConsumerParameters, ProduceResponse, ServerEvent,
    SignalingRequest,
};
use crate::registry::{
    ConsumerRecord, ConsumerState, ProducerRecord, RemovedResources, ResourceRegistry,
    TransportRecord, TransportState,
};
use crate::session::PeerSession;
use crate::types::{
    ConsumerId, DeviceCapabilities, PeerId, ProducerId, StreamKind, TransportId, TransportRole,
};

/// A freshly accepted connection
#[derive(Debug)]
pub struct PeerConnection {
    pub peer_id: PeerId,
    /// Server events for this peer, starting with `connectionSuccess`
    pub events: mpsc::Receiver<ServerEvent>,
}

/// Orchestrator statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorStats {
    pub peers: usize,
    pub transports: usize,
    pub producers: usize,
    pub consumers: usize,
}

/// Signaling state machine for every connected peer
pub struct SignalingOrchestrator {
    engine: Arc<dyn EngineAdapter>,
    registry: ResourceRegistry,
    sessions: DashMap<PeerId, Arc<PeerSession>>,
    /// Display name → peer, for `call`
    names: DashMap<String, PeerId>,
    /// Admitted peers, reserved before a session exists
    admitted: AtomicUsize,
    config: SfuConfig,
}

impl SignalingOrchestrator {
    /// Create the orchestrator and start consuming engine events.
    ///
    /// Engine events are only processed when this is called inside a Tokio runtime.
    pub fn new(engine: Arc<dyn EngineAdapter>, config: SfuConfig) -> Arc<Self> {
        let orchestrator = Arc::new(Self {
            registry: ResourceRegistry::new(config.max_consumer_transports_per_peer),
            engine,
            sessions: DashMap::new(),
            names: DashMap::new(),
            admitted: AtomicUsize::new(0),
            config,
        });

        if let Some(events) = orchestrator.engine.take_event_receiver() {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(Self::engine_event_loop(Arc::downgrade(&orchestrator), events));
                }
                Err(_) => warn!("No Tokio runtime, engine events will not be processed"),
            }
        }

        orchestrator
    }

    async fn engine_event_loop(
        orchestrator: Weak<Self>,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
    ) {
        while let Some(event) = events.recv().await {
            let Some(orchestrator) = orchestrator.upgrade() else {
                break;
            };
            orchestrator.handle_engine_event(event).await;
        }
        debug!("Engine event loop stopped");
    }

    #[must_use]
    pub const fn config(&self) -> &SfuConfig {
        &self.config
    }

    #[must_use]
    pub const fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Live session of a peer
    #[must_use]
    pub fn session(&self, peer_id: &PeerId) -> Option<Arc<PeerSession>> {
        self.sessions.get(peer_id).map(|s| Arc::clone(s.value()))
    }

    #[must_use]
    pub fn stats(&self) -> OrchestratorStats {
        let registry = self.registry.stats();
        OrchestratorStats {
            peers: self.sessions.len(),
            transports: registry.transports,
            producers: registry.producers,
            consumers: registry.consumers,
        }
    }

    /// Accept a new peer under a unique display name
    pub fn connect(&self, name: impl Into<String>) -> Result<PeerConnection> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(SignalingError::ProtocolViolation(
                "peer name must not be empty".to_string(),
            ));
        }
        self.reserve_slot()?;

        let peer_id = PeerId::generate();
        match self.names.entry(name.clone()) {
            Entry::Occupied(_) => {
                self.release_slot();
                return Err(SignalingError::ProtocolViolation(format!(
                    "peer name \"{name}\" is already in use"
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(peer_id.clone());
            }
        }
        if let Err(e) = self.registry.register_peer(&peer_id) {
            self.names.remove(&name);
            self.release_slot();
            return Err(e);
        }

        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));
        let session = Arc::new(PeerSession::new(peer_id.clone(), name.clone(), tx));
        session.emit(ServerEvent::ConnectionSuccess {
            peer_id: peer_id.clone(),
        });
        self.sessions.insert(peer_id.clone(), session);

        info!(peer_id = %peer_id, name = %name, "Peer connected");
        Ok(PeerConnection { peer_id, events: rx })
    }

    /// Tear down a peer and everything it owns.
    ///
    /// Returns `false` if the peer was already gone.
    pub async fn disconnect(&self, peer_id: &PeerId) -> bool {
        let Some((_, session)) = self.sessions.remove(peer_id) else {
            debug!(peer_id = %peer_id, "Disconnect for unknown peer");
            return false;
        };
        session.close();
        self.release_slot();
        self.names.remove_if(session.name(), |_, id| id == peer_id);

        let removed = self.registry.remove_by_peer(peer_id);
        let (transports, producers, consumers) =
            (removed.transports.len(), removed.producers.len(), removed.consumers.len());
        self.release(removed, Some(peer_id)).await;

        info!(
            peer_id = %peer_id,
            name = %session.name(),
            session_secs = (Utc::now() - session.connected_at()).num_seconds(),
            transports,
            producers,
            consumers,
            "Peer disconnected"
        );
        true
    }

    /// Disconnect every peer, e.g. on shutdown. Returns how many were removed.
    pub async fn disconnect_all(&self) -> usize {
        let peers: Vec<PeerId> = self.sessions.iter().map(|s| s.key().clone()).collect();
        let mut removed = 0;
        for peer_id in &peers {
            if self.disconnect(peer_id).await {
                removed += 1;
            }
        }
        removed
    }

    /// Router capabilities; allowed in any live state
    pub async fn request_capabilities(&self, peer_id: &PeerId) -> Result<DeviceCapabilities> {
        let session = self.live_session(peer_id)?;
        session.ensure_open()?;
        self.engine.router_capabilities().await
    }

    pub async fn load_device(
        &self,
        peer_id: &PeerId,
        capabilities: DeviceCapabilities,
    ) -> Result<()> {
        let session = self.live_session(peer_id)?;
        let _gate = session.exclusive().await;

        if capabilities.as_value().is_null() {
            return Err(SignalingError::ProtocolViolation(
                "device capabilities are required".to_string(),
            ));
        }
        session.load_device(capabilities)?;
        debug!(peer_id = %peer_id, "Device loaded");
        Ok(())
    }

    pub async fn create_transport(
        &self,
        peer_id: &PeerId,
        role: TransportRole,
    ) -> Result<TransportParameters> {
        let session = self.live_session(peer_id)?;
        let _gate = session.exclusive().await;
        session.ensure_negotiated()?;

        if role == TransportRole::Producer
            && self.registry.find_transport(peer_id, role)?.is_some()
        {
            warn!(peer_id = %peer_id, "Rejected second producer transport");
            return Err(SignalingError::DuplicateProducerTransport(format!(
                "peer {peer_id} already has a producer transport"
            )));
        }

        let created = self.engine.create_transport(role).await?;

        let record = TransportRecord::new(peer_id.clone(), role, created.handle.clone());
        let commit = session.ensure_open().and_then(|()| self.registry.add_transport(record));
        self.commit_or_release(EngineHandle::Transport(created.handle), commit)
            .await?;

        info!(
            peer_id = %peer_id,
            transport_id = %created.parameters.id,
            role = %role,
            "Transport created"
        );
        Ok(created.parameters)
    }

    pub async fn connect_transport(
        &self,
        peer_id: &PeerId,
        transport_id: &TransportId,
        dtls_parameters: Value,
    ) -> Result<()> {
        let session = self.live_session(peer_id)?;
        let _gate = session.exclusive().await;
        session.ensure_open()?;

        let transport = self.owned_transport(peer_id, transport_id)?;
        if transport.state == TransportState::Connected {
            return Err(SignalingError::ProtocolViolation(format!(
                "transport {transport_id} is already connected"
            )));
        }

        self.engine
            .connect_transport(&transport.handle, &dtls_parameters)
            .await?;

        session.ensure_open()?;
        self.registry.mark_transport_connected(transport_id)?;
        info!(peer_id = %peer_id, transport_id = %transport_id, "Transport connected");
        Ok(())
    }

    pub async fn produce(
        &self,
        peer_id: &PeerId,
        parameters: MediaProduceParameters,
    ) -> Result<ProducerId> {
        let session = self.live_session(peer_id)?;
        let _gate = session.exclusive().await;
        session.ensure_negotiated()?;

        if self.registry.find_producer_by_peer(peer_id)?.is_some() {
            return Err(SignalingError::ProtocolViolation(format!(
                "peer {peer_id} is already producing media"
            )));
        }
        let transport = self.connected_producer_transport(peer_id)?;

        let handle = self.engine.produce(&transport.handle, &parameters).await?;

        let record =
            ProducerRecord::media(peer_id.clone(), transport.id, parameters.kind, handle.clone());
        let producer_id = record.id.clone();
        let commit = session.ensure_open().and_then(|()| self.registry.add_producer(record));
        self.commit_or_release(EngineHandle::Producer(handle), commit)
            .await?;
        session.mark_producing();

        info!(
            peer_id = %peer_id,
            producer_id = %producer_id,
            kind = parameters.kind.as_str(),
            "Producer created"
        );
        Ok(producer_id)
    }

    pub async fn produce_data(
        &self,
        peer_id: &PeerId,
        parameters: DataProduceParameters,
    ) -> Result<ProducerId> {
        let session = self.live_session(peer_id)?;
        let _gate = session.exclusive().await;
        session.ensure_negotiated()?;

        if self.registry.find_data_producer_by_peer(peer_id)?.is_some() {
            return Err(SignalingError::ProtocolViolation(format!(
                "peer {peer_id} already has a data producer"
            )));
        }
        let transport = self.connected_producer_transport(peer_id)?;

        let handle = self.engine.produce_data(&transport.handle, &parameters).await?;

        let record = ProducerRecord::data(peer_id.clone(), transport.id, handle.clone());
        let producer_id = record.id.clone();
        let commit = session.ensure_open().and_then(|()| self.registry.add_data_producer(record));
        self.commit_or_release(EngineHandle::Producer(handle), commit)
            .await?;
        session.mark_producing();

        info!(
            peer_id = %peer_id,
            producer_id = %producer_id,
            label = %parameters.label,
            "Data producer created"
        );
        Ok(producer_id)
    }

    /// Offer the remote peer's producers to the caller.
    ///
    /// Emits `remoteProducer` / `remoteDataProducer` to the caller and returns the
    /// same ids.
    pub async fn call(&self, peer_id: &PeerId, remote_peer_name: &str) -> Result<CallOffer> {
        let session = self.live_session(peer_id)?;
        let _gate = session.exclusive().await;
        session.ensure_negotiated()?;

        let remote_id = self
            .names
            .get(remote_peer_name)
            .map(|id| id.value().clone())
            .ok_or_else(|| {
                SignalingError::PeerNotFound(format!("no peer named \"{remote_peer_name}\""))
            })?;
        let remote_gone = || {
            SignalingError::PeerNotFound(format!("peer \"{remote_peer_name}\" disconnected"))
        };
        let remote_live = self.session(&remote_id).is_some_and(|remote| !remote.is_closed());
        if !remote_live {
            return Err(remote_gone());
        }

        let producer = self
            .registry
            .find_producer_by_peer(&remote_id)
            .map_err(|_| remote_gone())?;
        let data_producer = self
            .registry
            .find_data_producer_by_peer(&remote_id)
            .map_err(|_| remote_gone())?;
        if producer.is_none() && data_producer.is_none() {
            return Err(SignalingError::NoProducer(format!(
                "peer \"{remote_peer_name}\" has not produced yet"
            )));
        }

        let offer = CallOffer {
            remote_peer_id: remote_id,
            producer_id: producer.map(|p| p.id),
            data_producer_id: data_producer.map(|p| p.id),
        };
        if let Some(producer_id) = &offer.producer_id {
            session.emit(ServerEvent::RemoteProducer {
                producer_id: producer_id.clone(),
            });
        }
        if let Some(producer_id) = &offer.data_producer_id {
            session.emit(ServerEvent::RemoteDataProducer {
                producer_id: producer_id.clone(),
            });
        }

        debug!(peer_id = %peer_id, remote_peer_id = %offer.remote_peer_id, "Call offered");
        Ok(offer)
    }

    /// Create a paused consumer of a remote media producer
    pub async fn consume(
        &self,
        peer_id: &PeerId,
        transport_id: &TransportId,
        remote_producer_id: &ProducerId,
        capabilities: Option<DeviceCapabilities>,
    ) -> Result<ConsumerParameters> {
        let session = self.live_session(peer_id)?;
        let _gate = session.exclusive().await;
        let device = session.ensure_negotiated()?;
        let capabilities = capabilities.unwrap_or(device);

        let transport = self.owned_consumer_transport(peer_id, transport_id)?;
        let producer = self.live_producer(remote_producer_id, StreamKind::Media)?;

        if !self.engine.can_consume(&producer.handle, &capabilities) {
            warn!(
                peer_id = %peer_id,
                producer_id = %remote_producer_id,
                "Device cannot consume producer"
            );
            return Err(SignalingError::IncompatibleCapabilities(format!(
                "device cannot consume producer {remote_producer_id}"
            )));
        }

        let created = self
            .engine
            .consume(&transport.handle, &producer.handle, &capabilities)
            .await?;

        let record = ConsumerRecord::new(
            peer_id.clone(),
            transport.id,
            producer.id.clone(),
            StreamKind::Media,
            created.handle.clone(),
            ConsumerState::Paused,
        );
        let consumer_id = record.id.clone();
        let commit = session.ensure_open().and_then(|()| self.registry.add_consumer(record));
        self.commit_or_release(EngineHandle::Consumer(created.handle), commit)
            .await?;

        info!(
            peer_id = %peer_id,
            consumer_id = %consumer_id,
            producer_id = %producer.id,
            "Consumer created"
        );
        Ok(ConsumerParameters {
            consumer_id,
            producer_id: producer.id,
            kind: created.kind,
            rtp_parameters: created.rtp_parameters,
        })
    }

    /// Create a consumer of a remote data producer; data consumers are never paused
    pub async fn consume_data(
        &self,
        peer_id: &PeerId,
        transport_id: &TransportId,
        remote_producer_id: &ProducerId,
    ) -> Result<DataConsumerParameters> {
        let session = self.live_session(peer_id)?;
        let _gate = session.exclusive().await;
        session.ensure_negotiated()?;

        let transport = self.owned_consumer_transport(peer_id, transport_id)?;
        let producer = self.live_producer(remote_producer_id, StreamKind::Data)?;

        let created = self
            .engine
            .consume_data(&transport.handle, &producer.handle)
            .await?;

        let record = ConsumerRecord::new(
            peer_id.clone(),
            transport.id,
            producer.id.clone(),
            StreamKind::Data,
            created.handle.clone(),
            ConsumerState::Active,
        );
        let consumer_id = record.id.clone();
        let commit = session.ensure_open().and_then(|()| self.registry.add_consumer(record));
        self.commit_or_release(EngineHandle::Consumer(created.handle), commit)
            .await?;

        info!(
            peer_id = %peer_id,
            consumer_id = %consumer_id,
            producer_id = %producer.id,
            "Data consumer created"
        );
        Ok(DataConsumerParameters {
            consumer_id,
            producer_id: producer.id,
            sctp_stream_parameters: created.sctp_stream_parameters,
            label: created.label,
            protocol: created.protocol,
        })
    }

    /// Start forwarding to a paused consumer. Resuming an active consumer is a no-op.
    pub async fn resume_consumer(&self, peer_id: &PeerId, consumer_id: &ConsumerId) -> Result<()> {
        let session = self.live_session(peer_id)?;
        let _gate = session.exclusive().await;
        session.ensure_open()?;

        let consumer = self.registry.find_consumer(consumer_id)?;
        if &consumer.owner != peer_id {
            return Err(SignalingError::Forbidden(format!(
                "consumer {consumer_id} belongs to another peer"
            )));
        }
        if consumer.state == ConsumerState::Active {
            debug!(peer_id = %peer_id, consumer_id = %consumer_id, "Consumer already active");
            return Ok(());
        }

        self.engine.resume(&consumer.handle).await?;

        session.ensure_open()?;
        self.registry.mark_consumer_active(consumer_id)?;
        debug!(peer_id = %peer_id, consumer_id = %consumer_id, "Consumer resumed");
        Ok(())
    }

    /// Close one of the peer's transports and everything built on it
    pub async fn close_transport(
        &self,
        peer_id: &PeerId,
        transport_id: &TransportId,
    ) -> Result<()> {
        let session = self.live_session(peer_id)?;
        let _gate = session.exclusive().await;
        session.ensure_open()?;

        self.owned_transport(peer_id, transport_id)?;
        let removed = self.registry.remove_transport(transport_id)?;
        info!(
            peer_id = %peer_id,
            transport_id = %transport_id,
            producers = removed.producers.len(),
            consumers = removed.consumers.len(),
            "Transport closed"
        );
        self.release(removed, Some(peer_id)).await;
        Ok(())
    }

    /// Close one of the peer's producers and every consumer of it
    pub async fn close_producer(&self, peer_id: &PeerId, producer_id: &ProducerId) -> Result<()> {
        let session = self.live_session(peer_id)?;
        let _gate = session.exclusive().await;
        session.ensure_open()?;

        let producer = self.registry.find_producer(producer_id)?;
        if &producer.owner != peer_id {
            return Err(SignalingError::Forbidden(format!(
                "producer {producer_id} belongs to another peer"
            )));
        }
        let removed = self.registry.remove_producer(producer_id)?;
        info!(
            peer_id = %peer_id,
            producer_id = %producer_id,
            consumers = removed.consumers.len(),
            "Producer closed"
        );
        self.release(removed, Some(peer_id)).await;
        Ok(())
    }

    /// Apply a closure reported by the engine
    pub async fn handle_engine_event(&self, event: EngineEvent) {
        let removed = match &event {
            EngineEvent::TransportClosed(handle) => {
                self.registry.remove_transport(&TransportId::new(handle.id()))
            }
            EngineEvent::ProducerClosed(handle) => {
                self.registry.remove_producer(&ProducerId::new(handle.id()))
            }
        };

        match removed {
            Ok(removed) => {
                info!(
                    event = ?event,
                    producers = removed.producers.len(),
                    consumers = removed.consumers.len(),
                    "Engine closed resource"
                );
                self.release(removed, None).await;
            }
            Err(_) => debug!(event = ?event, "Engine event for unknown resource"),
        }
    }

    /// Execute a decoded request. `None` is a bare acknowledgement.
    pub async fn handle_request(
        &self,
        peer_id: &PeerId,
        request: SignalingRequest,
    ) -> Result<Option<Value>> {
        match request {
            SignalingRequest::GetCapabilities => {
                to_data(&self.request_capabilities(peer_id).await?)
            }
            SignalingRequest::LoadDevice(params) => {
                self.load_device(peer_id, params.device_capabilities).await?;
                Ok(None)
            }
            SignalingRequest::CreateTransport(params) => {
                to_data(&self.create_transport(peer_id, params.role).await?)
            }
            SignalingRequest::ConnectTransport(params) => {
                self.connect_transport(peer_id, &params.transport_id, params.dtls_parameters)
                    .await?;
                Ok(None)
            }
            SignalingRequest::Produce(params) => {
                let producer_id = self.produce(peer_id, params).await?;
                to_data(&ProduceResponse { producer_id })
            }
            SignalingRequest::ProduceData(params) => {
                let producer_id = self.produce_data(peer_id, params).await?;
                to_data(&ProduceResponse { producer_id })
            }
            SignalingRequest::Call(params) => {
                to_data(&self.call(peer_id, &params.remote_peer_name).await?)
            }
            SignalingRequest::Consume(params) => to_data(
                &self
                    .consume(
                        peer_id,
                        &params.consumer_transport_id,
                        &params.remote_producer_id,
                        params.capabilities,
                    )
                    .await?,
            ),
            SignalingRequest::ConsumeData(params) => to_data(
                &self
                    .consume_data(
                        peer_id,
                        &params.consumer_transport_id,
                        &params.remote_producer_id,
                    )
                    .await?,
            ),
            SignalingRequest::ResumeConsumer(params) => {
                self.resume_consumer(peer_id, &params.consumer_id).await?;
                Ok(None)
            }
            SignalingRequest::CloseTransport(params) => {
                self.close_transport(peer_id, &params.transport_id).await?;
                Ok(None)
            }
            SignalingRequest::CloseProducer(params) => {
                self.close_producer(peer_id, &params.producer_id).await?;
                Ok(None)
            }
        }
    }

    fn reserve_slot(&self) -> Result<()> {
        let limit = self.config.max_peers;
        self.admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |admitted| {
                (limit == 0 || admitted < limit).then_some(admitted + 1)
            })
            .map(|_| ())
            .map_err(|_| {
                SignalingError::CapacityExceeded(format!("server is full ({limit} peers)"))
            })
    }

    fn release_slot(&self) {
        self.admitted.fetch_sub(1, Ordering::AcqRel);
    }

    fn live_session(&self, peer_id: &PeerId) -> Result<Arc<PeerSession>> {
        self.session(peer_id)
            .ok_or_else(|| {
                SignalingError::SessionClosed(format!("peer {peer_id} is not connected"))
            })
    }

    fn owned_transport(
        &self,
        peer_id: &PeerId,
        transport_id: &TransportId,
    ) -> Result<TransportRecord> {
        let transport = self.registry.find_transport_by_id(transport_id)?;
        if &transport.owner != peer_id {
            warn!(peer_id = %peer_id, transport_id = %transport_id, "Transport ownership mismatch");
            return Err(SignalingError::Forbidden(format!(
                "transport {transport_id} belongs to another peer"
            )));
        }
        Ok(transport)
    }

    fn owned_consumer_transport(
        &self,
        peer_id: &PeerId,
        transport_id: &TransportId,
    ) -> Result<TransportRecord> {
        let transport = self.owned_transport(peer_id, transport_id)?;
        if transport.role != TransportRole::Consumer {
            return Err(SignalingError::ProtocolViolation(format!(
                "transport {transport_id} is not a consumer transport"
            )));
        }
        Ok(transport)
    }

    fn connected_producer_transport(&self, peer_id: &PeerId) -> Result<TransportRecord> {
        let transport = self
            .registry
            .find_transport(peer_id, TransportRole::Producer)?
            .ok_or_else(|| {
                SignalingError::TransportNotReady(format!(
                    "peer {peer_id} has no producer transport"
                ))
            })?;
        if transport.state != TransportState::Connected {
            return Err(SignalingError::TransportNotReady(format!(
                "transport {} is not connected",
                transport.id
            )));
        }
        Ok(transport)
    }

    fn live_producer(&self, producer_id: &ProducerId, kind: StreamKind) -> Result<ProducerRecord> {
        let producer = self
            .registry
            .find_producer(producer_id)
            .map_err(|_| {
                SignalingError::ProducerGone(format!("producer {producer_id} is closed"))
            })?;
        if producer.kind != kind {
            return Err(SignalingError::ProtocolViolation(format!(
                "producer {producer_id} is a {} producer",
                match producer.kind {
                    StreamKind::Media => "media",
                    StreamKind::Data => "data",
                }
            )));
        }
        Ok(producer)
    }

    /// Close `handle` if the registry commit failed
    async fn commit_or_release<T>(&self, handle: EngineHandle, commit: Result<T>) -> Result<T> {
        match commit {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(handle = %handle, error = %e, "Commit failed, releasing engine handle");
                self.engine.close(&handle).await;
                Err(e)
            }
        }
    }

    /// Notify owners of cascaded consumers, then close the engine handles.
    ///
    /// `origin` is the peer whose action caused the removal; it is not notified.
    async fn release(&self, removed: RemovedResources, origin: Option<&PeerId>) {
        for consumer in &removed.consumers {
            if Some(&consumer.owner) == origin {
                continue;
            }
            if let Some(owner) = self.session(&consumer.owner) {
                owner.emit(ServerEvent::ConsumerClosed {
                    consumer_id: consumer.id.clone(),
                    producer_id: consumer.remote_producer_id.clone(),
                });
            }
        }

        for handle in removed.engine_handles() {
            self.engine.close(&handle).await;
        }
    }
}

fn to_data<T: Serialize>(value: &T) -> Result<Option<Value>> {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| SignalingError::invariant(format!("failed to encode response: {e}")))
}
