//! Resource registry
//!
//! Single source of truth for which transports, producers and consumers exist and
//! who owns them. The registry is a graph:
//!
//! - peer → transports
//! - transport → producers and consumers built on it
//! - producer → consumers that reference it (possibly owned by other peers)
//!
//! Every removal walks these edges ([`RemovedResources`]) so that closing a
//! transport closes its producers and consumers, closing a producer closes every
//! consumer of it, and removing a peer closes all of its transports.
//!
//! ## Locking
//!
//! Each map is a [`DashMap`], so unrelated peers only contend on shard locks.
//! Operations that touch several maps acquire entries in a fixed order
//! (peers → transports → producers → consumers) and never hold a map entry while
//! awaiting. Holding the owner's peer entry while inserting makes every `add_*`
//! linearizable with [`ResourceRegistry::remove_by_peer`]: an insert either lands
//! before the peer entry is taken (and is then part of the cascade) or fails with
//! `SessionClosed`.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::engine::{ConsumerHandle, EngineHandle, ProducerHandle, TransportHandle};
use crate::error::{Result, SignalingError};
use crate::types::{
    ConsumerId, MediaKind, PeerId, ProducerId, StreamKind, TransportId, TransportRole,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    Created,
    Connected,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProducerState {
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumerState {
    Paused,
    Active,
    Closed,
}

#[derive(Debug, Clone)]
pub struct TransportRecord {
    pub id: TransportId,
    pub owner: PeerId,
    pub role: TransportRole,
    pub handle: TransportHandle,
    pub state: TransportState,
    producers: HashSet<ProducerId>,
    consumers: HashSet<ConsumerId>,
}

impl TransportRecord {
    #[must_use]
    pub fn new(owner: PeerId, role: TransportRole, handle: TransportHandle) -> Self {
        Self {
            id: TransportId::new(handle.id()),
            owner,
            role,
            handle,
            state: TransportState::Created,
            producers: HashSet::new(),
            consumers: HashSet::new(),
        }
    }

    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }
}

#[derive(Debug, Clone)]
pub struct ProducerRecord {
    pub id: ProducerId,
    pub owner: PeerId,
    pub transport_id: TransportId,
    pub kind: StreamKind,
    /// Audio/video for media producers, `None` for data producers
    pub media_kind: Option<MediaKind>,
    pub handle: ProducerHandle,
    pub state: ProducerState,
    consumers: HashSet<ConsumerId>,
}

impl ProducerRecord {
    #[must_use]
    pub fn media(
        owner: PeerId,
        transport_id: TransportId,
        kind: MediaKind,
        handle: ProducerHandle,
    ) -> Self {
        Self {
            id: ProducerId::new(handle.id()),
            owner,
            transport_id,
            kind: StreamKind::Media,
            media_kind: Some(kind),
            handle,
            state: ProducerState::Active,
            consumers: HashSet::new(),
        }
    }

    #[must_use]
    pub fn data(owner: PeerId, transport_id: TransportId, handle: ProducerHandle) -> Self {
        Self {
            id: ProducerId::new(handle.id()),
            owner,
            transport_id,
            kind: StreamKind::Data,
            media_kind: None,
            handle,
            state: ProducerState::Active,
            consumers: HashSet::new(),
        }
    }

    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerRecord {
    pub id: ConsumerId,
    pub owner: PeerId,
    pub transport_id: TransportId,
    pub remote_producer_id: ProducerId,
    pub kind: StreamKind,
    pub handle: ConsumerHandle,
    pub state: ConsumerState,
}

impl ConsumerRecord {
    #[must_use]
    pub fn new(
        owner: PeerId,
        transport_id: TransportId,
        remote_producer_id: ProducerId,
        kind: StreamKind,
        handle: ConsumerHandle,
        state: ConsumerState,
    ) -> Self {
        Self {
            id: ConsumerId::new(handle.id()),
            owner,
            transport_id,
            remote_producer_id,
            kind,
            handle,
            state,
        }
    }
}

/// Per-peer index
#[derive(Debug, Default)]
struct PeerEntry {
    /// Creation order is kept so consumer-role lookups are deterministic
    transports: Vec<TransportId>,
    media_producer: Option<ProducerId>,
    data_producer: Option<ProducerId>,
}

/// Records removed by one cascade, already marked `Closed`
#[derive(Debug, Default)]
pub struct RemovedResources {
    pub transports: Vec<TransportRecord>,
    pub producers: Vec<ProducerRecord>,
    pub consumers: Vec<ConsumerRecord>,
}

impl RemovedResources {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transports.is_empty() && self.producers.is_empty() && self.consumers.is_empty()
    }

    /// Engine handles in release order: consumers, then producers, then transports
    #[must_use]
    pub fn engine_handles(&self) -> Vec<EngineHandle> {
        self.consumers
            .iter()
            .map(|c| EngineHandle::Consumer(c.handle.clone()))
            .chain(self.producers.iter().map(|p| EngineHandle::Producer(p.handle.clone())))
            .chain(self.transports.iter().map(|t| EngineHandle::Transport(t.handle.clone())))
            .collect()
    }

    fn merge(&mut self, other: Self) {
        self.transports.extend(other.transports);
        self.producers.extend(other.producers);
        self.consumers.extend(other.consumers);
    }
}

/// Snapshot of registry sizes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub transports: usize,
    pub producers: usize,
    pub consumers: usize,
}

/// In-memory registry of every live resource
pub struct ResourceRegistry {
    peers: DashMap<PeerId, PeerEntry>,
    transports: DashMap<TransportId, TransportRecord>,
    producers: DashMap<ProducerId, ProducerRecord>,
    consumers: DashMap<ConsumerId, ConsumerRecord>,
    /// Maximum consumer-role transports per peer (0 = unlimited)
    max_consumer_transports: usize,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ResourceRegistry {
    #[must_use]
    pub fn new(max_consumer_transports: usize) -> Self {
        Self {
            peers: DashMap::new(),
            transports: DashMap::new(),
            producers: DashMap::new(),
            consumers: DashMap::new(),
            max_consumer_transports,
        }
    }

    /// Register a live peer; resources can only be added for registered peers
    pub fn register_peer(&self, peer_id: &PeerId) -> Result<()> {
        match self.peers.entry(peer_id.clone()) {
            Entry::Occupied(_) => Err(SignalingError::invariant(format!(
                "peer {peer_id} registered twice"
            ))),
            Entry::Vacant(slot) => {
                slot.insert(PeerEntry::default());
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn contains_peer(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn add_transport(&self, record: TransportRecord) -> Result<()> {
        let mut peer = self.peers.get_mut(&record.owner).ok_or_else(|| {
            SignalingError::SessionClosed(format!("peer {} is disconnected", record.owner))
        })?;

        match record.role {
            TransportRole::Producer => {
                if peer.transports.iter().any(|id| {
                    self.transports
                        .get(id)
                        .is_some_and(|t| t.role == TransportRole::Producer)
                }) {
                    return Err(SignalingError::DuplicateProducerTransport(format!(
                        "peer {} already has a producer transport",
                        record.owner
                    )));
                }
            }
            TransportRole::Consumer => {
                let existing = peer
                    .transports
                    .iter()
                    .filter(|id| {
                        self.transports
                            .get(*id)
                            .is_some_and(|t| t.role == TransportRole::Consumer)
                    })
                    .count();
                if self.max_consumer_transports > 0 && existing >= self.max_consumer_transports {
                    return Err(SignalingError::CapacityExceeded(format!(
                        "peer {} reached the limit of {} consumer transports",
                        record.owner, self.max_consumer_transports
                    )));
                }
            }
        }

        let id = record.id.clone();
        match self.transports.entry(id.clone()) {
            Entry::Occupied(_) => {
                return Err(SignalingError::invariant(format!("duplicate transport id {id}")));
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
        peer.transports.push(id);
        Ok(())
    }

    pub fn mark_transport_connected(&self, id: &TransportId) -> Result<TransportRecord> {
        let mut transport = self
            .transports
            .get_mut(id)
            .ok_or_else(|| SignalingError::NotFound(format!("transport {id}")))?;
        transport.state = TransportState::Connected;
        Ok(transport.clone())
    }

    /// Register a media producer on its owner's connected producer transport
    pub fn add_producer(&self, record: ProducerRecord) -> Result<()> {
        if record.kind != StreamKind::Media {
            return Err(SignalingError::invariant(format!(
                "producer {} registered as media but is {:?}",
                record.id, record.kind
            )));
        }
        self.insert_producer(record)
    }

    /// Register a data producer on its owner's connected producer transport
    pub fn add_data_producer(&self, record: ProducerRecord) -> Result<()> {
        if record.kind != StreamKind::Data {
            return Err(SignalingError::invariant(format!(
                "producer {} registered as data but is {:?}",
                record.id, record.kind
            )));
        }
        self.insert_producer(record)
    }

    fn insert_producer(&self, record: ProducerRecord) -> Result<()> {
        let mut peer = self.peers.get_mut(&record.owner).ok_or_else(|| {
            SignalingError::SessionClosed(format!("peer {} is disconnected", record.owner))
        })?;
        let mut transport = self.transports.get_mut(&record.transport_id).ok_or_else(|| {
            SignalingError::TransportNotReady(format!(
                "transport {} is closed",
                record.transport_id
            ))
        })?;

        if transport.owner != record.owner || transport.role != TransportRole::Producer {
            return Err(SignalingError::invariant(format!(
                "producer {} placed on transport {} it cannot use",
                record.id, record.transport_id
            )));
        }
        if transport.state != TransportState::Connected {
            return Err(SignalingError::TransportNotReady(format!(
                "transport {} is not connected",
                record.transport_id
            )));
        }

        let slot = match record.kind {
            StreamKind::Media => &mut peer.media_producer,
            StreamKind::Data => &mut peer.data_producer,
        };
        if slot.is_some() {
            return Err(SignalingError::ProtocolViolation(format!(
                "peer {} already has a {} producer",
                record.owner,
                if record.kind == StreamKind::Media { "media" } else { "data" }
            )));
        }

        let id = record.id.clone();
        match self.producers.entry(id.clone()) {
            Entry::Occupied(_) => {
                return Err(SignalingError::invariant(format!("duplicate producer id {id}")));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(record);
            }
        }
        transport.producers.insert(id.clone());
        *slot = Some(id);
        Ok(())
    }

    /// Register a consumer of a live producer on one of the owner's consumer transports
    pub fn add_consumer(&self, record: ConsumerRecord) -> Result<()> {
        let _peer = self.peers.get_mut(&record.owner).ok_or_else(|| {
            SignalingError::SessionClosed(format!("peer {} is disconnected", record.owner))
        })?;
        let mut transport = self
            .transports
            .get_mut(&record.transport_id)
            .ok_or_else(|| SignalingError::NotFound(format!("transport {}", record.transport_id)))?;

        if transport.owner != record.owner {
            return Err(SignalingError::Forbidden(format!(
                "transport {} belongs to another peer",
                record.transport_id
            )));
        }
        if transport.role != TransportRole::Consumer {
            return Err(SignalingError::ProtocolViolation(format!(
                "transport {} is not a consumer transport",
                record.transport_id
            )));
        }

        let mut producer = self
            .producers
            .get_mut(&record.remote_producer_id)
            .ok_or_else(|| SignalingError::ProducerGone(record.remote_producer_id.to_string()))?;
        if producer.state != ProducerState::Active {
            return Err(SignalingError::ProducerGone(record.remote_producer_id.to_string()));
        }
        if producer.kind != record.kind {
            return Err(SignalingError::ProtocolViolation(format!(
                "producer {} cannot be consumed as {:?}",
                record.remote_producer_id, record.kind
            )));
        }

        let id = record.id.clone();
        match self.consumers.entry(id.clone()) {
            Entry::Occupied(_) => {
                return Err(SignalingError::invariant(format!("duplicate consumer id {id}")));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(record);
            }
        }
        transport.consumers.insert(id.clone());
        producer.consumers.insert(id);
        Ok(())
    }

    /// The peer's transport with `role`.
    ///
    /// A peer has at most one producer transport; finding two is reported as an
    /// invariant violation. For the consumer role the oldest transport is returned.
    pub fn find_transport(
        &self,
        peer_id: &PeerId,
        role: TransportRole,
    ) -> Result<Option<TransportRecord>> {
        let ids = self
            .peers
            .get(peer_id)
            .map(|peer| peer.transports.clone())
            .ok_or_else(|| SignalingError::NotFound(format!("peer {peer_id}")))?;

        let mut matches = ids
            .iter()
            .filter_map(|id| self.transports.get(id).map(|t| t.clone()))
            .filter(|t| t.role == role);

        let first = matches.next();
        if role == TransportRole::Producer && matches.next().is_some() {
            return Err(SignalingError::invariant(format!(
                "peer {peer_id} holds more than one producer transport"
            )));
        }
        Ok(first)
    }

    pub fn find_transport_by_id(&self, id: &TransportId) -> Result<TransportRecord> {
        self.transports
            .get(id)
            .map(|t| t.clone())
            .ok_or_else(|| SignalingError::NotFound(format!("transport {id}")))
    }

    /// The peer's media producer, if it has produced
    pub fn find_producer_by_peer(&self, peer_id: &PeerId) -> Result<Option<ProducerRecord>> {
        let id = self
            .peers
            .get(peer_id)
            .map(|peer| peer.media_producer.clone())
            .ok_or_else(|| SignalingError::NotFound(format!("peer {peer_id}")))?;
        Ok(id.and_then(|id| self.producers.get(&id).map(|p| p.clone())))
    }

    /// The peer's data producer, if it has one
    pub fn find_data_producer_by_peer(&self, peer_id: &PeerId) -> Result<Option<ProducerRecord>> {
        let id = self
            .peers
            .get(peer_id)
            .map(|peer| peer.data_producer.clone())
            .ok_or_else(|| SignalingError::NotFound(format!("peer {peer_id}")))?;
        Ok(id.and_then(|id| self.producers.get(&id).map(|p| p.clone())))
    }

    pub fn find_producer(&self, id: &ProducerId) -> Result<ProducerRecord> {
        self.producers
            .get(id)
            .map(|p| p.clone())
            .ok_or_else(|| SignalingError::NotFound(format!("producer {id}")))
    }

    pub fn find_consumer(&self, id: &ConsumerId) -> Result<ConsumerRecord> {
        self.consumers
            .get(id)
            .map(|c| c.clone())
            .ok_or_else(|| SignalingError::NotFound(format!("consumer {id}")))
    }

    /// Consumers currently attached to a producer
    #[must_use]
    pub fn consumers_of(&self, producer_id: &ProducerId) -> Vec<ConsumerRecord> {
        let ids: Vec<ConsumerId> = self
            .producers
            .get(producer_id)
            .map(|p| p.consumers.iter().cloned().collect())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.consumers.get(id).map(|c| c.clone()))
            .collect()
    }

    pub fn mark_consumer_active(&self, id: &ConsumerId) -> Result<ConsumerRecord> {
        let mut consumer = self
            .consumers
            .get_mut(id)
            .ok_or_else(|| SignalingError::NotFound(format!("consumer {id}")))?;
        consumer.state = ConsumerState::Active;
        Ok(consumer.clone())
    }

    /// Remove a peer and everything it owns
    pub fn remove_by_peer(&self, peer_id: &PeerId) -> RemovedResources {
        let Some((_, peer)) = self.peers.remove(peer_id) else {
            debug!(peer_id = %peer_id, "Peer already removed from registry");
            return RemovedResources::default();
        };

        let mut removed = RemovedResources::default();
        for transport_id in peer.transports {
            if let Some((_, transport)) = self.transports.remove(&transport_id) {
                removed.merge(self.cascade_transport(transport));
            }
        }

        debug!(
            peer_id = %peer_id,
            transports = removed.transports.len(),
            producers = removed.producers.len(),
            consumers = removed.consumers.len(),
            "Removed peer resources"
        );
        removed
    }

    /// Remove a transport and everything built on it
    pub fn remove_transport(&self, id: &TransportId) -> Result<RemovedResources> {
        let owner = self.find_transport_by_id(id)?.owner;

        let peer = self.peers.get_mut(&owner);
        let Some((_, transport)) = self.transports.remove(id) else {
            return Err(SignalingError::NotFound(format!("transport {id}")));
        };

        if let Some(mut peer) = peer {
            peer.transports.retain(|t| t != id);
            if peer.media_producer.as_ref().is_some_and(|p| transport.producers.contains(p)) {
                peer.media_producer = None;
            }
            if peer.data_producer.as_ref().is_some_and(|p| transport.producers.contains(p)) {
                peer.data_producer = None;
            }
        }

        Ok(self.cascade_transport(transport))
    }

    /// Remove a producer and every consumer referencing it
    pub fn remove_producer(&self, id: &ProducerId) -> Result<RemovedResources> {
        let record = self.find_producer(id)?;

        let peer = self.peers.get_mut(&record.owner);
        if let Some(mut transport) = self.transports.get_mut(&record.transport_id) {
            transport.producers.remove(id);
        }
        let Some((_, producer)) = self.producers.remove(id) else {
            return Err(SignalingError::NotFound(format!("producer {id}")));
        };

        if let Some(mut peer) = peer {
            if peer.media_producer.as_ref() == Some(id) {
                peer.media_producer = None;
            }
            if peer.data_producer.as_ref() == Some(id) {
                peer.data_producer = None;
            }
        }

        Ok(self.cascade_producer(producer))
    }

    /// Close everything hanging off an already unlinked transport
    fn cascade_transport(&self, mut transport: TransportRecord) -> RemovedResources {
        let mut removed = RemovedResources::default();

        for producer_id in transport.producers.drain() {
            if let Some((_, producer)) = self.producers.remove(&producer_id) {
                removed.merge(self.cascade_producer(producer));
            }
        }

        for consumer_id in transport.consumers.drain() {
            if let Some((_, mut consumer)) = self.consumers.remove(&consumer_id) {
                if let Some(mut producer) = self.producers.get_mut(&consumer.remote_producer_id) {
                    producer.consumers.remove(&consumer_id);
                }
                consumer.state = ConsumerState::Closed;
                removed.consumers.push(consumer);
            }
        }

        transport.state = TransportState::Closed;
        removed.transports.push(transport);
        removed
    }

    /// Close every consumer of an already unlinked producer
    fn cascade_producer(&self, mut producer: ProducerRecord) -> RemovedResources {
        let mut removed = RemovedResources::default();

        for consumer_id in producer.consumers.drain() {
            if let Some((_, mut consumer)) = self.consumers.remove(&consumer_id) {
                if let Some(mut transport) = self.transports.get_mut(&consumer.transport_id) {
                    transport.consumers.remove(&consumer_id);
                }
                consumer.state = ConsumerState::Closed;
                removed.consumers.push(consumer);
            }
        }

        producer.state = ProducerState::Closed;
        removed.producers.push(producer);
        removed
    }

    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            transports: self.transports.len(),
            producers: self.producers.len(),
            consumers: self.consumers.len(),
        }
    }
}
