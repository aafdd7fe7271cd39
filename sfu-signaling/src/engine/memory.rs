//! In-process engine
//!
//! Implements the full [`EngineAdapter`] contract with real bookkeeping but no
//! sockets: transports never carry packets, and "forwarding" is reported by
//! [`MemoryEngine::is_forwarding`]. It backs the bundled server in signaling-only
//! deployments and is the engine used throughout the test-suite, which is why it
//! can inject failures and suspend inside a call.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use super::{
    ConsumerHandle, CreatedConsumer, CreatedDataConsumer, CreatedTransport, DataProduceParameters,
    EngineAdapter, EngineEvent, EngineHandle, MediaProduceParameters, ProducerHandle,
    TransportHandle, TransportParameters,
};
use crate::config::EngineConfig;
use crate::error::{Result, SignalingError};
use crate::types::{DeviceCapabilities, MediaKind, StreamKind, TransportRole};

/// First dynamic RTP payload type handed out to router codecs
const FIRST_DYNAMIC_PAYLOAD_TYPE: u64 = 100;

/// Engine operations that can be failed or suspended from tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOp {
    CreateTransport,
    ConnectTransport,
    Produce,
    ProduceData,
    Consume,
    ConsumeData,
    Resume,
}

/// A parked engine call.
///
/// The call parks after it has taken effect inside the engine (the handle exists)
/// but before it returns. It signals [`Suspension::reached`] once parked and
/// continues after [`Suspension::release`].
#[derive(Debug, Default)]
pub struct Suspension {
    reached: Notify,
    released: Notify,
}

impl Suspension {
    /// Wait until the suspended call is parked inside the engine
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    /// Let the parked call continue
    pub fn release(&self) {
        self.released.notify_one();
    }
}

#[derive(Debug)]
struct MemoryTransport {
    role: TransportRole,
    connected: bool,
}

#[derive(Debug)]
struct MemoryProducer {
    stream: StreamKind,
    kind: Option<MediaKind>,
    /// Lowercased codec mime types from the producer's RTP parameters
    codecs: Vec<String>,
    rtp_parameters: Value,
    sctp_stream_parameters: Value,
    label: String,
    protocol: String,
}

#[derive(Debug)]
struct MemoryConsumer {
    paused: bool,
}

/// In-process [`EngineAdapter`] implementation
pub struct MemoryEngine {
    config: EngineConfig,
    available: AtomicBool,

    transports: DashMap<String, MemoryTransport>,
    producers: DashMap<String, MemoryProducer>,
    consumers: DashMap<String, MemoryConsumer>,

    /// Every `close` call per handle id, including idempotent repeats
    close_calls: DashMap<String, u64>,
    resume_calls: AtomicU64,

    failures: Mutex<HashMap<EngineOp, SignalingError>>,
    suspensions: Mutex<HashMap<EngineOp, Arc<Suspension>>>,

    event_tx: mpsc::UnboundedSender<EngineEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
}

impl MemoryEngine {
    /// Create an initialized engine
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        info!(
            listen_ip = %config.listen_ip,
            announced_ip = %config.public_ip(),
            port = config.port,
            codecs = config.media_codecs.len(),
            "Memory engine initialized"
        );

        Self {
            config,
            available: AtomicBool::new(true),
            transports: DashMap::new(),
            producers: DashMap::new(),
            consumers: DashMap::new(),
            close_calls: DashMap::new(),
            resume_calls: AtomicU64::new(0),
            failures: Mutex::new(HashMap::new()),
            suspensions: Mutex::new(HashMap::new()),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    /// Mark the engine as (un)initialized
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make the next call of `op` fail with `error`
    pub fn fail_next(&self, op: EngineOp, error: SignalingError) {
        self.failures.lock().insert(op, error);
    }

    /// Park the next call of `op` until the returned suspension is released
    pub fn suspend_next(&self, op: EngineOp) -> Arc<Suspension> {
        let suspension = Arc::new(Suspension::default());
        self.suspensions.lock().insert(op, Arc::clone(&suspension));
        suspension
    }

    /// Build the capability document a compatible browser device would report
    #[must_use]
    pub fn device_capabilities_for(mime_types: &[&str]) -> DeviceCapabilities {
        let codecs: Vec<Value> = mime_types
            .iter()
            .map(|mime| {
                let kind = if mime.to_lowercase().starts_with("audio/") {
                    "audio"
                } else {
                    "video"
                };
                json!({ "kind": kind, "mimeType": mime })
            })
            .collect();
        DeviceCapabilities::new(json!({ "codecs": codecs, "headerExtensions": [] }))
    }

    /// Simulate the DTLS state of a transport becoming `closed`.
    ///
    /// The transport dies engine-side and a [`EngineEvent::TransportClosed`] is
    /// queued for the orchestrator.
    pub fn simulate_transport_closed(&self, transport_id: &str) -> bool {
        if self.transports.remove(transport_id).is_none() {
            return false;
        }
        let event = EngineEvent::TransportClosed(TransportHandle(transport_id.to_string()));
        if let Err(e) = self.event_tx.send(event) {
            warn!(transport_id, error = %e, "Failed to queue engine event");
        }
        true
    }

    /// Simulate a producer being closed engine-side
    pub fn simulate_producer_closed(&self, producer_id: &str) -> bool {
        if self.producers.remove(producer_id).is_none() {
            return false;
        }
        let event = EngineEvent::ProducerClosed(ProducerHandle(producer_id.to_string()));
        if let Err(e) = self.event_tx.send(event) {
            warn!(producer_id, error = %e, "Failed to queue engine event");
        }
        true
    }

    #[must_use]
    pub fn live_transports(&self) -> usize {
        self.transports.len()
    }

    #[must_use]
    pub fn live_producers(&self) -> usize {
        self.producers.len()
    }

    #[must_use]
    pub fn live_consumers(&self) -> usize {
        self.consumers.len()
    }

    /// Role a live transport was created with
    #[must_use]
    pub fn transport_role(&self, transport_id: &str) -> Option<TransportRole> {
        self.transports.get(transport_id).map(|t| t.role)
    }

    /// Whether a handle id is still alive inside the engine
    #[must_use]
    pub fn is_live(&self, id: &str) -> bool {
        self.transports.contains_key(id)
            || self.producers.contains_key(id)
            || self.consumers.contains_key(id)
    }

    /// Number of `close` calls received for a handle id
    #[must_use]
    pub fn close_count(&self, id: &str) -> u64 {
        self.close_calls.get(id).map_or(0, |count| *count)
    }

    /// Number of `resume` calls that reached the engine
    #[must_use]
    pub fn resume_count(&self) -> u64 {
        self.resume_calls.load(Ordering::SeqCst)
    }

    /// Whether a consumer is paused (`None` if it does not exist)
    #[must_use]
    pub fn is_paused(&self, consumer_id: &str) -> Option<bool> {
        self.consumers.get(consumer_id).map(|c| c.paused)
    }

    /// Media flows to a consumer only once it exists and has been resumed
    #[must_use]
    pub fn is_forwarding(&self, consumer_id: &str) -> bool {
        self.is_paused(consumer_id) == Some(false)
    }

    /// Injected failure, checked before an operation does anything
    fn injected_failure(&self, op: EngineOp) -> Result<()> {
        match self.failures.lock().remove(&op) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Suspension point, reached after an operation has taken effect
    async fn suspension_point(&self, op: EngineOp) {
        let suspension = self.suspensions.lock().remove(&op);
        if let Some(suspension) = suspension {
            debug!(op = ?op, "Engine call suspended");
            suspension.reached.notify_one();
            suspension.released.notified().await;
        }
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SignalingError::EngineUnavailable(
                "media engine is not initialized".to_string(),
            ))
        }
    }

    fn router_codecs(&self) -> Vec<Value> {
        self.config
            .media_codecs
            .iter()
            .zip(FIRST_DYNAMIC_PAYLOAD_TYPE..)
            .map(|(codec, payload_type)| {
                let mut entry = json!({
                    "kind": codec.kind.as_str(),
                    "mimeType": codec.mime_type,
                    "clockRate": codec.clock_rate,
                    "preferredPayloadType": payload_type,
                    "parameters": codec.parameters,
                });
                if let Some(channels) = codec.channels {
                    entry["channels"] = json!(channels);
                }
                entry
            })
            .collect()
    }

    fn router_mime_types(&self) -> HashSet<String> {
        self.config
            .media_codecs
            .iter()
            .map(|codec| codec.mime_type.to_lowercase())
            .collect()
    }
}

/// Lowercased `codecs[].mimeType` entries of an RTP parameters / capabilities document
fn codec_mime_types(document: &Value) -> Vec<String> {
    document
        .get("codecs")
        .and_then(Value::as_array)
        .map(|codecs| {
            codecs
                .iter()
                .filter_map(|codec| codec.get("mimeType").and_then(Value::as_str))
                .map(str::to_lowercase)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl EngineAdapter for MemoryEngine {
    async fn router_capabilities(&self) -> Result<DeviceCapabilities> {
        self.ensure_available()?;
        Ok(DeviceCapabilities::new(json!({
            "codecs": self.router_codecs(),
            "headerExtensions": [],
        })))
    }

    async fn create_transport(&self, role: TransportRole) -> Result<CreatedTransport> {
        self.ensure_available()?;
        self.injected_failure(EngineOp::CreateTransport)?;

        let id = uuid::Uuid::new_v4().to_string();
        let parameters = TransportParameters {
            id: id.clone(),
            ice_parameters: json!({
                "usernameFragment": nanoid::nanoid!(16),
                "password": nanoid::nanoid!(32),
                "iceLite": true,
            }),
            ice_candidates: json!([{
                "foundation": "udpcandidate",
                "priority": 1_076_302_079_u32,
                "ip": self.config.public_ip(),
                "protocol": "udp",
                "port": self.config.port,
                "type": "host",
            }]),
            dtls_parameters: json!({
                "role": "auto",
                "fingerprints": [{
                    "algorithm": "sha-256",
                    "value": uuid::Uuid::new_v4().simple().to_string().to_uppercase(),
                }],
            }),
            sctp_parameters: Some(json!({
                "port": 5000,
                "OS": 1024,
                "MIS": 1024,
                "maxMessageSize": 262_144,
            })),
        };

        self.transports.insert(
            id.clone(),
            MemoryTransport {
                role,
                connected: false,
            },
        );
        debug!(transport_id = %id, role = %role, "Engine transport created");
        self.suspension_point(EngineOp::CreateTransport).await;

        Ok(CreatedTransport {
            handle: TransportHandle(id),
            parameters,
        })
    }

    async fn connect_transport(
        &self,
        transport: &TransportHandle,
        dtls_parameters: &Value,
    ) -> Result<()> {
        self.injected_failure(EngineOp::ConnectTransport)?;

        let has_fingerprint = dtls_parameters
            .get("fingerprints")
            .and_then(Value::as_array)
            .is_some_and(|fingerprints| !fingerprints.is_empty());
        if !has_fingerprint {
            return Err(SignalingError::DtlsFailure(
                "DTLS parameters carry no fingerprints".to_string(),
            ));
        }

        let mut entry = self.transports.get_mut(transport.id()).ok_or_else(|| {
            SignalingError::DtlsFailure(format!("transport {} is closed", transport.id()))
        })?;
        if entry.connected {
            return Err(SignalingError::DtlsFailure(format!(
                "transport {} is already connected",
                transport.id()
            )));
        }
        entry.connected = true;
        drop(entry);

        self.suspension_point(EngineOp::ConnectTransport).await;
        Ok(())
    }

    async fn produce(
        &self,
        transport: &TransportHandle,
        parameters: &MediaProduceParameters,
    ) -> Result<ProducerHandle> {
        self.injected_failure(EngineOp::Produce)?;

        let codecs = codec_mime_types(&parameters.rtp_parameters);
        if codecs.is_empty() {
            return Err(SignalingError::UnsupportedMedia(
                "RTP parameters declare no codecs".to_string(),
            ));
        }
        let prefix = format!("{}/", parameters.kind.as_str());
        let supported = self.router_mime_types();
        if let Some(codec) = codecs
            .iter()
            .find(|codec| !codec.starts_with(&prefix) || !supported.contains(*codec))
        {
            return Err(SignalingError::UnsupportedMedia(format!(
                "codec {codec} is not supported for {} producers",
                parameters.kind.as_str()
            )));
        }

        match self.transports.get(transport.id()) {
            Some(t) if t.connected => {}
            Some(_) => {
                return Err(SignalingError::UnsupportedMedia(format!(
                    "transport {} is not connected",
                    transport.id()
                )))
            }
            None => {
                return Err(SignalingError::UnsupportedMedia(format!(
                    "transport {} is closed",
                    transport.id()
                )))
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.producers.insert(
            id.clone(),
            MemoryProducer {
                stream: StreamKind::Media,
                kind: Some(parameters.kind),
                codecs,
                rtp_parameters: parameters.rtp_parameters.clone(),
                sctp_stream_parameters: Value::Null,
                label: String::new(),
                protocol: String::new(),
            },
        );
        self.suspension_point(EngineOp::Produce).await;
        Ok(ProducerHandle(id))
    }

    async fn produce_data(
        &self,
        transport: &TransportHandle,
        parameters: &DataProduceParameters,
    ) -> Result<ProducerHandle> {
        self.injected_failure(EngineOp::ProduceData)?;

        if !self.transports.contains_key(transport.id()) {
            return Err(SignalingError::UnsupportedMedia(format!(
                "transport {} is closed",
                transport.id()
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.producers.insert(
            id.clone(),
            MemoryProducer {
                stream: StreamKind::Data,
                kind: None,
                codecs: Vec::new(),
                rtp_parameters: Value::Null,
                sctp_stream_parameters: parameters.sctp_stream_parameters.clone(),
                label: parameters.label.clone(),
                protocol: parameters.protocol.clone(),
            },
        );
        self.suspension_point(EngineOp::ProduceData).await;
        Ok(ProducerHandle(id))
    }

    fn can_consume(&self, producer: &ProducerHandle, capabilities: &DeviceCapabilities) -> bool {
        let Some(producer) = self.producers.get(producer.id()) else {
            return false;
        };
        if producer.stream != StreamKind::Media {
            return false;
        }
        let device: HashSet<String> =
            codec_mime_types(capabilities.as_value()).into_iter().collect();
        producer.codecs.iter().all(|codec| device.contains(codec))
    }

    async fn consume(
        &self,
        transport: &TransportHandle,
        producer: &ProducerHandle,
        capabilities: &DeviceCapabilities,
    ) -> Result<CreatedConsumer> {
        self.injected_failure(EngineOp::Consume)?;

        if !self.can_consume(producer, capabilities) {
            return Err(SignalingError::IncompatibleCapabilities(format!(
                "device cannot consume producer {}",
                producer.id()
            )));
        }
        if !self.transports.contains_key(transport.id()) {
            return Err(SignalingError::IncompatibleCapabilities(format!(
                "transport {} is closed",
                transport.id()
            )));
        }

        let (kind, rtp_parameters) = {
            let source = self.producers.get(producer.id()).ok_or_else(|| {
                SignalingError::IncompatibleCapabilities(format!(
                    "producer {} is closed",
                    producer.id()
                ))
            })?;
            (source.kind.unwrap_or(MediaKind::Video), source.rtp_parameters.clone())
        };

        let id = uuid::Uuid::new_v4().to_string();
        self.consumers.insert(id.clone(), MemoryConsumer { paused: true });
        self.suspension_point(EngineOp::Consume).await;

        Ok(CreatedConsumer {
            handle: ConsumerHandle(id),
            kind,
            rtp_parameters,
        })
    }

    async fn consume_data(
        &self,
        transport: &TransportHandle,
        producer: &ProducerHandle,
    ) -> Result<CreatedDataConsumer> {
        self.injected_failure(EngineOp::ConsumeData)?;

        if !self.transports.contains_key(transport.id()) {
            return Err(SignalingError::UnsupportedMedia(format!(
                "transport {} is closed",
                transport.id()
            )));
        }

        let (sctp_stream_parameters, label, protocol) = {
            let source = self.producers.get(producer.id()).ok_or_else(|| {
                SignalingError::UnsupportedMedia(format!(
                    "data producer {} is closed",
                    producer.id()
                ))
            })?;
            if source.stream != StreamKind::Data {
                return Err(SignalingError::UnsupportedMedia(format!(
                    "producer {} is not a data producer",
                    producer.id()
                )));
            }
            (
                source.sctp_stream_parameters.clone(),
                source.label.clone(),
                source.protocol.clone(),
            )
        };

        let id = uuid::Uuid::new_v4().to_string();
        // Data consumers are never paused.
        self.consumers.insert(id.clone(), MemoryConsumer { paused: false });
        self.suspension_point(EngineOp::ConsumeData).await;

        Ok(CreatedDataConsumer {
            handle: ConsumerHandle(id),
            sctp_stream_parameters,
            label,
            protocol,
        })
    }

    async fn resume(&self, consumer: &ConsumerHandle) -> Result<()> {
        self.injected_failure(EngineOp::Resume)?;
        self.resume_calls.fetch_add(1, Ordering::SeqCst);

        let mut entry = self
            .consumers
            .get_mut(consumer.id())
            .ok_or_else(|| {
                SignalingError::NotFound(format!("consumer {} is closed", consumer.id()))
            })?;
        entry.paused = false;
        drop(entry);

        self.suspension_point(EngineOp::Resume).await;
        Ok(())
    }

    async fn close(&self, handle: &EngineHandle) {
        *self.close_calls.entry(handle.id().to_string()).or_insert(0) += 1;

        let removed = match handle {
            EngineHandle::Transport(h) => self.transports.remove(h.id()).is_some(),
            EngineHandle::Producer(h) => self.producers.remove(h.id()).is_some(),
            EngineHandle::Consumer(h) => self.consumers.remove(h.id()).is_some(),
        };
        if removed {
            debug!(handle = %handle, "Engine handle closed");
        } else {
            debug!(handle = %handle, "Engine handle already closed");
        }
    }

    fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<EngineEvent>> {
        self.event_rx.lock().take()
    }
}
