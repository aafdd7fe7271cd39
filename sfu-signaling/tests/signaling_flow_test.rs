// Integration tests for the signaling orchestrator
//
// Drives complete peer flows against the in-process engine:
// - Handshake ordering and the producer-transport rule
// - Cross-peer call / consume / resume
// - Cascades triggered by close requests, engine events and disconnects
// - Rollback of engine handles when a peer leaves mid-call

use serde_json::{json, Value};
use sfu_signaling::engine::{DataProduceParameters, EngineOp, MediaProduceParameters};
use sfu_signaling::protocol::{RequestFrame, ResponseFrame};
use sfu_signaling::registry::ConsumerState;
use sfu_signaling::{
    ConsumerId, DeviceCapabilities, EngineConfig, MediaKind, MemoryEngine, OrchestratorStats,
    PeerId, ProducerId, ServerEvent, SfuConfig, SignalingError, SignalingOrchestrator,
    TransportId, TransportRole,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Harness {
    engine: Arc<MemoryEngine>,
    orchestrator: Arc<SignalingOrchestrator>,
}

struct Peer {
    id: PeerId,
    events: mpsc::Receiver<ServerEvent>,
}

fn harness() -> Harness {
    let engine = Arc::new(MemoryEngine::new(EngineConfig::default()));
    let orchestrator = SignalingOrchestrator::new(engine.clone(), SfuConfig::default());
    Harness { engine, orchestrator }
}

fn browser_capabilities() -> DeviceCapabilities {
    MemoryEngine::device_capabilities_for(&["audio/opus", "video/H264"])
}

fn dtls() -> Value {
    json!({ "role": "client", "fingerprints": [{ "algorithm": "sha-256", "value": "AA:BB:CC" }] })
}

fn h264() -> MediaProduceParameters {
    MediaProduceParameters {
        kind: MediaKind::Video,
        rtp_parameters: json!({
            "codecs": [{ "mimeType": "video/H264", "payloadType": 101, "clockRate": 90000 }]
        }),
        app_data: Value::Null,
    }
}

fn chat_channel() -> DataProduceParameters {
    DataProduceParameters {
        sctp_stream_parameters: json!({ "streamId": 0, "ordered": true }),
        label: "chat".to_string(),
        protocol: "text".to_string(),
    }
}

impl Harness {
    async fn join_with(&self, name: &str, capabilities: DeviceCapabilities) -> Peer {
        let mut connection = self.orchestrator.connect(name).unwrap();
        assert!(matches!(
            connection.events.recv().await,
            Some(ServerEvent::ConnectionSuccess { .. })
        ));

        self.orchestrator.request_capabilities(&connection.peer_id).await.unwrap();
        self.orchestrator
            .load_device(&connection.peer_id, capabilities)
            .await
            .unwrap();

        Peer {
            id: connection.peer_id,
            events: connection.events,
        }
    }

    async fn join(&self, name: &str) -> Peer {
        self.join_with(name, browser_capabilities()).await
    }

    async fn send_transport(&self, peer: &Peer) -> TransportId {
        let params = self
            .orchestrator
            .create_transport(&peer.id, TransportRole::Producer)
            .await
            .unwrap();
        let id = TransportId::new(params.id);
        self.orchestrator.connect_transport(&peer.id, &id, dtls()).await.unwrap();
        id
    }

    async fn recv_transport(&self, peer: &Peer) -> TransportId {
        let params = self
            .orchestrator
            .create_transport(&peer.id, TransportRole::Consumer)
            .await
            .unwrap();
        TransportId::new(params.id)
    }

    /// Producer transport plus a video producer
    async fn publish(&self, peer: &Peer) -> (TransportId, ProducerId) {
        let transport = self.send_transport(peer).await;
        let producer = self.orchestrator.produce(&peer.id, h264()).await.unwrap();
        (transport, producer)
    }

    async fn subscribe(
        &self,
        peer: &Peer,
        transport: &TransportId,
        producer: &ProducerId,
    ) -> ConsumerId {
        self.orchestrator
            .consume(&peer.id, transport, producer, None)
            .await
            .unwrap()
            .consumer_id
    }

    /// Wait until the background engine-event loop has caught up
    async fn wait_for(&self, condition: impl Fn(&OrchestratorStats) -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition(&self.orchestrator.stats()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("engine event was not applied");
    }
}

#[tokio::test]
async fn test_second_producer_transport_is_rejected() {
    let h = harness();
    let alice = h.join("alice").await;

    h.orchestrator
        .create_transport(&alice.id, TransportRole::Producer)
        .await
        .unwrap();
    let second = h
        .orchestrator
        .create_transport(&alice.id, TransportRole::Producer)
        .await;

    assert!(matches!(second, Err(SignalingError::DuplicateProducerTransport(_))));
    assert_eq!(h.engine.live_transports(), 1);
}

#[tokio::test]
async fn test_concurrent_producer_transport_requests_for_one_peer() {
    let h = harness();
    let alice = h.join("alice").await;

    let (first, second) = tokio::join!(
        h.orchestrator.create_transport(&alice.id, TransportRole::Producer),
        h.orchestrator.create_transport(&alice.id, TransportRole::Producer),
    );

    assert_eq!(usize::from(first.is_ok()) + usize::from(second.is_ok()), 1);
    assert_eq!(h.engine.live_transports(), 1);
    assert!(h
        .orchestrator
        .registry()
        .find_transport(&alice.id, TransportRole::Producer)
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_stale_producer_after_disconnect() {
    let h = harness();
    let alice = h.join("alice").await;
    let (_, p1) = h.publish(&alice).await;

    let bob = h.join("bob").await;
    let recv = h.recv_transport(&bob).await;

    assert!(h.orchestrator.disconnect(&alice.id).await);

    let result = h.orchestrator.consume(&bob.id, &recv, &p1, None).await;
    assert!(matches!(result, Err(SignalingError::ProducerGone(_))));
    assert_eq!(h.engine.live_consumers(), 0);
}

#[tokio::test]
async fn test_call_before_and_after_remote_produces() {
    let h = harness();
    let mut alice = h.join("alice").await;
    let bob = h.join("bob").await;

    let early = h.orchestrator.call(&alice.id, "bob").await;
    assert!(matches!(early, Err(SignalingError::NoProducer(_))));

    let (_, bob_producer) = h.publish(&bob).await;
    let offer = h.orchestrator.call(&alice.id, "bob").await.unwrap();

    assert_eq!(offer.remote_peer_id, bob.id);
    assert_eq!(offer.producer_id, Some(bob_producer.clone()));
    assert_eq!(offer.data_producer_id, None);
    assert_eq!(
        alice.events.recv().await,
        Some(ServerEvent::RemoteProducer {
            producer_id: bob_producer
        })
    );

    assert!(matches!(
        h.orchestrator.call(&alice.id, "carol").await,
        Err(SignalingError::PeerNotFound(_))
    ));
}

#[tokio::test]
async fn test_consumer_starts_paused_and_resume_is_idempotent() {
    let h = harness();
    let alice = h.join("alice").await;
    let (_, producer) = h.publish(&alice).await;
    let bob = h.join("bob").await;
    let recv = h.recv_transport(&bob).await;

    let params = h
        .orchestrator
        .consume(&bob.id, &recv, &producer, None)
        .await
        .unwrap();
    assert_eq!(params.kind, MediaKind::Video);
    assert_eq!(params.producer_id, producer);

    let consumer_id = params.consumer_id;
    assert_eq!(h.engine.is_paused(consumer_id.as_str()), Some(true));
    assert!(!h.engine.is_forwarding(consumer_id.as_str()));
    assert_eq!(
        h.orchestrator.registry().find_consumer(&consumer_id).unwrap().state,
        ConsumerState::Paused
    );

    h.orchestrator.resume_consumer(&bob.id, &consumer_id).await.unwrap();
    assert!(h.engine.is_forwarding(consumer_id.as_str()));

    h.orchestrator.resume_consumer(&bob.id, &consumer_id).await.unwrap();
    assert_eq!(h.engine.resume_count(), 1);
    assert_eq!(
        h.orchestrator.registry().find_consumer(&consumer_id).unwrap().state,
        ConsumerState::Active
    );
}

#[tokio::test]
async fn test_incompatible_capabilities_create_nothing() {
    let h = harness();
    let alice = h.join("alice").await;
    let (_, producer) = h.publish(&alice).await;

    let bob = h
        .join_with("bob", MemoryEngine::device_capabilities_for(&["audio/opus", "video/VP8"]))
        .await;
    let recv = h.recv_transport(&bob).await;

    let result = h.orchestrator.consume(&bob.id, &recv, &producer, None).await;
    assert!(matches!(result, Err(SignalingError::IncompatibleCapabilities(_))));
    assert_eq!(h.engine.live_consumers(), 0);
    assert_eq!(h.orchestrator.stats().consumers, 0);

    // Capabilities sent with the request take precedence over the loaded device
    let params = h
        .orchestrator
        .consume(&bob.id, &recv, &producer, Some(browser_capabilities()))
        .await
        .unwrap();
    assert!(h.engine.is_live(params.consumer_id.as_str()));
}

#[tokio::test]
async fn test_ownership_is_enforced() {
    let h = harness();
    let alice = h.join("alice").await;
    let (alice_send, producer) = h.publish(&alice).await;
    let alice_recv = h.recv_transport(&alice).await;
    let bob = h.join("bob").await;
    let bob_recv = h.recv_transport(&bob).await;
    let consumer = h.subscribe(&bob, &bob_recv, &producer).await;

    assert!(matches!(
        h.orchestrator.connect_transport(&bob.id, &alice_recv, dtls()).await,
        Err(SignalingError::Forbidden(_))
    ));
    assert!(matches!(
        h.orchestrator.consume(&bob.id, &alice_recv, &producer, None).await,
        Err(SignalingError::Forbidden(_))
    ));
    assert!(matches!(
        h.orchestrator.resume_consumer(&alice.id, &consumer).await,
        Err(SignalingError::Forbidden(_))
    ));
    assert!(matches!(
        h.orchestrator.close_transport(&bob.id, &alice_send).await,
        Err(SignalingError::Forbidden(_))
    ));
    assert!(matches!(
        h.orchestrator.close_producer(&bob.id, &producer).await,
        Err(SignalingError::Forbidden(_))
    ));
    assert!(matches!(
        h.orchestrator
            .resume_consumer(&bob.id, &ConsumerId::from("missing"))
            .await,
        Err(SignalingError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_connect_twice_is_rejected() {
    let h = harness();
    let alice = h.join("alice").await;
    let send = h.send_transport(&alice).await;

    assert!(matches!(
        h.orchestrator.connect_transport(&alice.id, &send, dtls()).await,
        Err(SignalingError::ProtocolViolation(_))
    ));
}

#[tokio::test]
async fn test_closing_producer_cascades_to_remote_consumers() {
    let h = harness();
    let alice = h.join("alice").await;
    let (_, producer) = h.publish(&alice).await;
    let mut bob = h.join("bob").await;
    let recv = h.recv_transport(&bob).await;
    let consumer = h.subscribe(&bob, &recv, &producer).await;

    h.orchestrator.close_producer(&alice.id, &producer).await.unwrap();

    assert_eq!(
        bob.events.recv().await,
        Some(ServerEvent::ConsumerClosed {
            consumer_id: consumer.clone(),
            producer_id: producer.clone(),
        })
    );
    assert!(matches!(
        h.orchestrator.registry().find_consumer(&consumer),
        Err(SignalingError::NotFound(_))
    ));
    assert_eq!(h.engine.close_count(consumer.as_str()), 1);
    assert_eq!(h.engine.close_count(producer.as_str()), 1);
    assert!(!h.engine.is_live(consumer.as_str()));

    // The media slot is free again
    h.orchestrator.produce(&alice.id, h264()).await.unwrap();
}

#[tokio::test]
async fn test_dtls_close_reported_by_engine_cascades() {
    let h = harness();
    let alice = h.join("alice").await;
    let (send, producer) = h.publish(&alice).await;
    let mut bob = h.join("bob").await;
    let recv = h.recv_transport(&bob).await;
    let consumer = h.subscribe(&bob, &recv, &producer).await;

    assert!(h.engine.simulate_transport_closed(send.as_str()));
    h.wait_for(|stats| stats.producers == 0 && stats.consumers == 0).await;

    assert_eq!(
        bob.events.recv().await,
        Some(ServerEvent::ConsumerClosed {
            consumer_id: consumer.clone(),
            producer_id: producer.clone(),
        })
    );
    assert!(!h.engine.is_live(consumer.as_str()));
    assert!(h.orchestrator.registry().find_transport_by_id(&recv).is_ok());
    assert!(h
        .orchestrator
        .registry()
        .find_transport(&alice.id, TransportRole::Producer)
        .unwrap()
        .is_none());

    // A fresh producer transport may be created afterwards
    h.send_transport(&alice).await;
}

#[tokio::test]
async fn test_producer_closed_by_engine_cascades() {
    let h = harness();
    let alice = h.join("alice").await;
    let (_, producer) = h.publish(&alice).await;
    let bob = h.join("bob").await;
    let recv = h.recv_transport(&bob).await;
    h.subscribe(&bob, &recv, &producer).await;

    assert!(h.engine.simulate_producer_closed(producer.as_str()));
    h.wait_for(|stats| stats.producers == 0 && stats.consumers == 0).await;

    assert!(matches!(
        h.orchestrator.consume(&bob.id, &recv, &producer, None).await,
        Err(SignalingError::ProducerGone(_))
    ));
}

#[tokio::test]
async fn test_data_channel_flow() {
    let h = harness();
    let alice = h.join("alice").await;
    h.send_transport(&alice).await;
    let data_producer = h
        .orchestrator
        .produce_data(&alice.id, chat_channel())
        .await
        .unwrap();
    assert!(matches!(
        h.orchestrator.produce_data(&alice.id, chat_channel()).await,
        Err(SignalingError::ProtocolViolation(_))
    ));

    let mut bob = h.join("bob").await;
    let offer = h.orchestrator.call(&bob.id, "alice").await.unwrap();
    assert_eq!(offer.producer_id, None);
    assert_eq!(offer.data_producer_id, Some(data_producer.clone()));
    assert_eq!(
        bob.events.recv().await,
        Some(ServerEvent::RemoteDataProducer {
            producer_id: data_producer.clone()
        })
    );

    let recv = h.recv_transport(&bob).await;
    let params = h
        .orchestrator
        .consume_data(&bob.id, &recv, &data_producer)
        .await
        .unwrap();
    assert_eq!(params.label, "chat");
    assert_eq!(params.protocol, "text");
    assert_eq!(params.sctp_stream_parameters["streamId"], 0);
    assert_eq!(
        h.orchestrator.registry().find_consumer(&params.consumer_id).unwrap().state,
        ConsumerState::Active
    );

    // Media and data producers are not interchangeable
    assert!(matches!(
        h.orchestrator.consume(&bob.id, &recv, &data_producer, None).await,
        Err(SignalingError::ProtocolViolation(_))
    ));
}

#[tokio::test]
async fn test_disconnect_closes_every_handle_exactly_once() {
    let h = harness();
    let alice = h.join("alice").await;
    let (alice_send, alice_producer) = h.publish(&alice).await;
    let alice_data = h
        .orchestrator
        .produce_data(&alice.id, chat_channel())
        .await
        .unwrap();
    let alice_recv = h.recv_transport(&alice).await;

    let mut bob = h.join("bob").await;
    let (bob_send, bob_producer) = h.publish(&bob).await;
    let bob_recv = h.recv_transport(&bob).await;

    let alice_consumer = h.subscribe(&alice, &alice_recv, &bob_producer).await;
    let bob_consumer = h.subscribe(&bob, &bob_recv, &alice_producer).await;
    let bob_data_consumer = h
        .orchestrator
        .consume_data(&bob.id, &bob_recv, &alice_data)
        .await
        .unwrap()
        .consumer_id;

    h.orchestrator.disconnect(&alice.id).await;

    let alice_owned = [
        alice_send.to_string(),
        alice_recv.to_string(),
        alice_producer.to_string(),
        alice_data.to_string(),
        alice_consumer.to_string(),
    ];
    for id in &alice_owned {
        assert_eq!(h.engine.close_count(id), 1, "handle {id}");
        assert!(!h.engine.is_live(id));
    }
    for id in [bob_consumer.as_str(), bob_data_consumer.as_str()] {
        assert_eq!(h.engine.close_count(id), 1, "handle {id}");
    }
    for id in [bob_send.as_str(), bob_recv.as_str(), bob_producer.as_str()] {
        assert_eq!(h.engine.close_count(id), 0);
        assert!(h.engine.is_live(id));
    }

    // Bob is told about both consumers he lost
    let mut closed = Vec::new();
    while let Ok(event) = bob.events.try_recv() {
        if let ServerEvent::ConsumerClosed { consumer_id, .. } = event {
            closed.push(consumer_id);
        }
    }
    closed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    let mut expected = vec![bob_consumer, bob_data_consumer];
    expected.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    assert_eq!(closed, expected);

    assert_eq!(
        h.orchestrator.stats(),
        OrchestratorStats {
            peers: 1,
            transports: 2,
            producers: 1,
            consumers: 0,
        }
    );

    // A second disconnect releases nothing again
    assert!(!h.orchestrator.disconnect(&alice.id).await);
    for id in &alice_owned {
        assert_eq!(h.engine.close_count(id), 1);
    }

    h.orchestrator.disconnect(&bob.id).await;
    assert_eq!(h.orchestrator.stats(), OrchestratorStats::default());
    assert_eq!(h.engine.live_transports(), 0);
    assert_eq!(h.engine.live_producers(), 0);
    assert_eq!(h.engine.live_consumers(), 0);
}

#[tokio::test]
async fn test_calls_after_disconnect_fail_with_session_closed() {
    let h = harness();
    let alice = h.join("alice").await;
    let send = h.send_transport(&alice).await;
    h.orchestrator.disconnect(&alice.id).await;

    assert!(matches!(
        h.orchestrator.produce(&alice.id, h264()).await,
        Err(SignalingError::SessionClosed(_))
    ));
    assert!(matches!(
        h.orchestrator.connect_transport(&alice.id, &send, dtls()).await,
        Err(SignalingError::SessionClosed(_))
    ));
    assert!(matches!(
        h.orchestrator.load_device(&alice.id, browser_capabilities()).await,
        Err(SignalingError::SessionClosed(_))
    ));
}

#[tokio::test]
async fn test_disconnect_during_produce_releases_new_producer() {
    let h = harness();
    let alice = h.join("alice").await;
    h.send_transport(&alice).await;

    let suspension = h.engine.suspend_next(EngineOp::Produce);
    let pending = {
        let orchestrator = Arc::clone(&h.orchestrator);
        let peer = alice.id.clone();
        tokio::spawn(async move { orchestrator.produce(&peer, h264()).await })
    };

    suspension.reached().await;
    // The producer exists engine-side but is not registered yet
    assert_eq!(h.engine.live_producers(), 1);
    h.orchestrator.disconnect(&alice.id).await;
    suspension.release();

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(SignalingError::SessionClosed(_))));
    assert_eq!(h.engine.live_producers(), 0);
    assert_eq!(h.engine.live_transports(), 0);
    assert_eq!(h.orchestrator.stats(), OrchestratorStats::default());
}

#[tokio::test]
async fn test_disconnect_during_create_transport_releases_transport() {
    let h = harness();
    let alice = h.join("alice").await;

    let suspension = h.engine.suspend_next(EngineOp::CreateTransport);
    let pending = {
        let orchestrator = Arc::clone(&h.orchestrator);
        let peer = alice.id.clone();
        tokio::spawn(async move {
            orchestrator
                .create_transport(&peer, TransportRole::Consumer)
                .await
        })
    };

    suspension.reached().await;
    h.orchestrator.disconnect(&alice.id).await;
    suspension.release();

    assert!(matches!(
        pending.await.unwrap(),
        Err(SignalingError::SessionClosed(_))
    ));
    assert_eq!(h.engine.live_transports(), 0);
}

#[tokio::test]
async fn test_producer_closed_during_consume_is_rolled_back() {
    let h = harness();
    let alice = h.join("alice").await;
    let (_, producer) = h.publish(&alice).await;
    let bob = h.join("bob").await;
    let recv = h.recv_transport(&bob).await;

    let suspension = h.engine.suspend_next(EngineOp::Consume);
    let pending = {
        let orchestrator = Arc::clone(&h.orchestrator);
        let (peer, recv, producer) = (bob.id.clone(), recv.clone(), producer.clone());
        tokio::spawn(async move { orchestrator.consume(&peer, &recv, &producer, None).await })
    };

    suspension.reached().await;
    h.orchestrator.close_producer(&alice.id, &producer).await.unwrap();
    suspension.release();

    assert!(matches!(
        pending.await.unwrap(),
        Err(SignalingError::ProducerGone(_))
    ));
    assert_eq!(h.engine.live_consumers(), 0);
    assert_eq!(h.orchestrator.stats().consumers, 0);
}

#[tokio::test]
async fn test_engine_failures_are_surfaced() {
    let h = harness();
    let alice = h.join("alice").await;

    h.engine.fail_next(
        EngineOp::CreateTransport,
        SignalingError::EngineUnavailable("worker restarting".to_string()),
    );
    assert_eq!(
        h.orchestrator
            .create_transport(&alice.id, TransportRole::Producer)
            .await
            .unwrap_err()
            .kind(),
        "EngineUnavailable"
    );

    let params = h
        .orchestrator
        .create_transport(&alice.id, TransportRole::Producer)
        .await
        .unwrap();
    let send = TransportId::new(params.id);
    assert!(matches!(
        h.orchestrator.connect_transport(&alice.id, &send, json!({})).await,
        Err(SignalingError::DtlsFailure(_))
    ));
    h.orchestrator.connect_transport(&alice.id, &send, dtls()).await.unwrap();

    let opus_as_video = MediaProduceParameters {
        kind: MediaKind::Video,
        rtp_parameters: json!({ "codecs": [{ "mimeType": "audio/opus" }] }),
        app_data: Value::Null,
    };
    assert!(matches!(
        h.orchestrator.produce(&alice.id, opus_as_video).await,
        Err(SignalingError::UnsupportedMedia(_))
    ));
    assert_eq!(h.orchestrator.stats().producers, 0);
}

#[tokio::test]
async fn test_peers_progress_concurrently() {
    let h = harness();
    let mut tasks = Vec::new();
    for i in 0..16 {
        let orchestrator = Arc::clone(&h.orchestrator);
        tasks.push(tokio::spawn(async move {
            let peer = orchestrator.connect(format!("peer-{i}")).unwrap().peer_id;
            orchestrator.load_device(&peer, browser_capabilities()).await.unwrap();
            let send = orchestrator
                .create_transport(&peer, TransportRole::Producer)
                .await
                .unwrap();
            let send = TransportId::new(send.id);
            orchestrator.connect_transport(&peer, &send, dtls()).await.unwrap();
            orchestrator.produce(&peer, h264()).await.unwrap();
            orchestrator
                .create_transport(&peer, TransportRole::Consumer)
                .await
                .unwrap();
            peer
        }));
    }

    let mut peers = Vec::new();
    for task in tasks {
        peers.push(task.await.unwrap());
    }
    assert_eq!(
        h.orchestrator.stats(),
        OrchestratorStats {
            peers: 16,
            transports: 32,
            producers: 16,
            consumers: 0,
        }
    );

    for peer in &peers {
        h.orchestrator.disconnect(peer).await;
    }
    assert_eq!(h.orchestrator.stats(), OrchestratorStats::default());
}

#[tokio::test]
async fn test_wire_frames_round_trip_through_orchestrator() {
    let h = harness();
    let alice = h.join("alice").await;

    let (id, request) =
        RequestFrame::parse(r#"{"id":11,"method":"createTransport","params":{"role":"consumer"}}"#);
    let result = match request {
        Ok(request) => h.orchestrator.handle_request(&alice.id, request).await,
        Err(e) => Err(e),
    };
    let response = serde_json::to_value(ResponseFrame::from_result(id, result)).unwrap();

    assert_eq!(response["id"], 11);
    assert_eq!(response["ok"], true);
    assert!(response["data"]["iceParameters"].is_object());
    assert!(response["data"]["dtlsParameters"]["fingerprints"].is_array());

    let (id, request) =
        RequestFrame::parse(r#"{"id":12,"method":"call","params":{"remotePeerName":"nobody"}}"#);
    let result = h.orchestrator.handle_request(&alice.id, request.unwrap()).await;
    let response = serde_json::to_value(ResponseFrame::from_result(id, result)).unwrap();
    assert_eq!(response["ok"], false);
    assert_eq!(response["error"]["kind"], "PeerNotFound");
}
