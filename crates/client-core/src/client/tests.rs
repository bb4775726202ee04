//! Scenario tests for the session orchestrator
//!
//! Every scenario drives a [`MediaClient`] backed by the in-memory mock
//! transport, feeding it server messages and inspecting the notifications and
//! outbound signaling it produces.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use indexmap::IndexMap;
use serde_json::json;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing_test::traced_test;

use crate::bitrate::{TrackBandwidthLimit, TrackBitrates};
use crate::client::{ClientBuilder, MediaClient};
use crate::error::{ClientError, ClientResult};
use crate::events::ClientEvent;
use crate::signaling::{EndpointInfo, MediaEvent, TrackCounts, TrackInfo};
use crate::track::{
    EndpointId, MediaStreamTrack, NegotiationStatus, SimulcastConfig, TrackId, VadStatus, Variant,
};
use crate::transport::mock::MockTransportFactory;
use crate::transport::{ConnectionState, IceCandidate, IceConnectionState, TransportEvent};

struct Harness {
    client: Arc<MediaClient>,
    factory: Arc<MockTransportFactory>,
    events: broadcast::Receiver<ClientEvent>,
    outbound: mpsc::UnboundedReceiver<Bytes>,
}

impl Harness {
    fn new() -> Self {
        let factory = Arc::new(MockTransportFactory::default());
        let client = ClientBuilder::new()
            .transport_factory(factory.clone())
            .build()
            .expect("default configuration is valid");
        let events = client.subscribe_events();
        let outbound = client.take_outbound().expect("outbound stream available");
        Self { client, factory, events, outbound }
    }

    async fn receive(&self, event: MediaEvent) {
        self.client.handle_media_event(event).await.expect("inbound event handled");
    }

    /// Join as `me` with the given peers in the roster
    async fn join(&mut self, peers: Vec<EndpointInfo>) {
        let mut endpoints = vec![endpoint("me", vec![])];
        endpoints.extend(peers);
        self.receive(MediaEvent::Connected { endpoint_id: EndpointId::from("me"), endpoints }).await;
    }

    /// Notifications emitted so far
    fn drain(&mut self) -> Vec<ClientEvent> {
        let mut out = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => out.push(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return out,
            }
        }
    }

    /// Outbound signaling sent so far
    fn drain_wire(&mut self) -> Vec<MediaEvent> {
        let mut out = Vec::new();
        while let Ok(payload) = self.outbound.try_recv() {
            out.push(MediaEvent::decode(&payload).expect("outbound payload decodes"));
        }
        out
    }

    /// Wait for the next outbound message
    async fn next_wire(&mut self) -> MediaEvent {
        let payload = tokio::time::timeout(Duration::from_secs(1), self.outbound.recv())
            .await
            .expect("timed out waiting for outbound signaling")
            .expect("outbound channel open");
        MediaEvent::decode(&payload).expect("outbound payload decodes")
    }

    fn spawn_add_track(&self, track: MediaStreamTrack, simulcast: SimulcastConfig) -> JoinHandle<ClientResult<TrackId>> {
        let client = self.client.clone();
        tokio::spawn(async move {
            client.add_track(track, None, simulcast, TrackBandwidthLimit::default()).await
        })
    }

    /// Answer a renegotiation request with a full offer/answer cycle and return the offer
    async fn negotiate(&mut self) -> MediaEvent {
        self.receive(MediaEvent::OfferData { tracks_types: TrackCounts::default() }).await;
        let offer = self.next_wire().await;
        assert!(matches!(offer, MediaEvent::SdpOffer { .. }), "expected an offer, got {:?}", offer);
        self.receive(answer()).await;
        offer
    }

    /// Join and publish one track through a complete negotiation
    async fn publish(&mut self, track: MediaStreamTrack, simulcast: SimulcastConfig) -> TrackId {
        let task = self.spawn_add_track(track, simulcast);
        assert_eq!(self.next_wire().await, MediaEvent::RenegotiateTracks);
        self.negotiate().await;
        let track_id = resolve(task).await.expect("track published");
        self.drain();
        self.drain_wire();
        track_id
    }
}

fn endpoint(id: &str, tracks: Vec<(&str, TrackInfo)>) -> EndpointInfo {
    EndpointInfo {
        id: EndpointId::from(id),
        metadata: None,
        tracks: tracks.into_iter().map(|(id, info)| (TrackId::from(id), info)).collect(),
    }
}

fn simulcast_info() -> TrackInfo {
    TrackInfo {
        metadata: Some(json!({"source": "camera"})),
        simulcast_config: SimulcastConfig::with_variants([Variant::Low, Variant::Medium, Variant::High]),
    }
}

fn answer() -> MediaEvent {
    MediaEvent::SdpAnswer { sdp: "v=0 answer".to_string(), mid_to_track_id: IndexMap::new() }
}

async fn resolve<T>(task: JoinHandle<T>) -> T {
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("command resolved in time")
        .expect("command task completed")
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

// ===== SESSION ESTABLISHMENT =====

#[tokio::test]
async fn test_empty_room_connects_without_remote_tracks() {
    let mut h = Harness::new();
    h.join(vec![]).await;

    let events = h.drain();
    assert_eq!(events.len(), 1);
    match &events[0] {
        ClientEvent::Connected { endpoint_id, endpoints } => {
            assert_eq!(endpoint_id, &EndpointId::from("me"));
            assert_eq!(endpoints.len(), 1);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(h.client.remote_endpoints().await.is_empty());
    assert_eq!(h.client.local_endpoint().await.id, Some(EndpointId::from("me")));
}

#[tokio::test]
async fn test_roster_with_simulcast_track_announces_it_once() {
    let mut h = Harness::new();
    h.join(vec![endpoint("peer", vec![("peer:cam", simulcast_info())])]).await;

    let events = h.drain();
    let added: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            ClientEvent::TrackAdded { track } => Some(track.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].track_id, TrackId::from("peer:cam"));
    assert_eq!(added[0].endpoint_id, EndpointId::from("peer"));
    assert!(added[0].simulcast_config.enabled);
    assert!(!events.iter().any(|event| matches!(event, ClientEvent::EndpointAdded { .. })));

    match events.last() {
        Some(ClientEvent::Connected { endpoints, .. }) => assert_eq!(endpoints.len(), 2),
        other => panic!("expected connected last, got {:?}", other),
    }
}

#[tokio::test]
async fn test_events_before_connected_are_ignored() {
    let mut h = Harness::new();
    h.receive(MediaEvent::EndpointAdded { endpoint_id: EndpointId::from("peer"), metadata: None }).await;

    assert!(h.drain().is_empty());
    assert!(h.drain_wire().is_empty());
    assert!(h.client.remote_endpoints().await.is_empty());
}

#[tokio::test]
async fn test_connect_sends_metadata_and_rejects_second_connect() {
    let mut h = Harness::new();
    h.client.connect(Some(json!({"name": "alice"}))).await.unwrap();
    assert_eq!(h.drain_wire(), vec![MediaEvent::Connect { metadata: Some(json!({"name": "alice"})) }]);

    h.join(vec![]).await;
    let err = h.client.connect(None).await.unwrap_err();
    assert_eq!(err, ClientError::AlreadyConnected { endpoint_id: EndpointId::from("me") });
    assert_eq!(err.to_string(), "Session is already connected as me");
    assert!(err.is_precondition());
}

// ===== COMMAND SERIALIZATION =====

#[tokio::test]
async fn test_add_track_resolves_after_answer() {
    let mut h = Harness::new();
    h.join(vec![]).await;

    let task = h.spawn_add_track(MediaStreamTrack::audio("mic"), SimulcastConfig::disabled());
    assert_eq!(h.next_wire().await, MediaEvent::RenegotiateTracks);
    assert!(!task.is_finished());

    h.receive(MediaEvent::OfferData { tracks_types: TrackCounts { audio: 1, video: 0 } }).await;
    match h.next_wire().await {
        MediaEvent::SdpOffer { sdp_offer, track_id_to_track_metadata, mid_to_track_id, .. } => {
            assert!(sdp_offer.sdp.starts_with("v=0"));
            assert_eq!(track_id_to_track_metadata.len(), 1);
            assert_eq!(mid_to_track_id.len(), 1);
        }
        other => panic!("expected offer, got {:?}", other),
    }
    settle().await;
    assert!(!task.is_finished());

    h.receive(answer()).await;
    let track_id = resolve(task).await.unwrap();

    let tracks = h.client.local_tracks().await;
    assert_eq!(tracks[&track_id].negotiation, NegotiationStatus::Done);
    assert!(tracks[&track_id].media_line.is_negotiated());
    assert!(track_id.as_str().starts_with("me:"));
    assert_eq!(h.factory.created_count(), 1);
}

#[tokio::test]
async fn test_second_command_waits_for_first_renegotiation() {
    let mut h = Harness::new();
    h.join(vec![]).await;

    let first = h.spawn_add_track(MediaStreamTrack::audio("mic"), SimulcastConfig::disabled());
    assert_eq!(h.next_wire().await, MediaEvent::RenegotiateTracks);
    let second = h.spawn_add_track(MediaStreamTrack::video("cam"), SimulcastConfig::disabled());

    settle().await;
    assert!(!h.drain_wire().contains(&MediaEvent::RenegotiateTracks));
    assert_eq!(h.client.local_tracks().await.len(), 1);

    h.negotiate().await;
    resolve(first).await.unwrap();
    assert_eq!(h.next_wire().await, MediaEvent::RenegotiateTracks);

    h.negotiate().await;
    resolve(second).await.unwrap();
    assert_eq!(h.client.session_stats().await.offers_sent, 2);
}

#[tokio::test]
async fn test_remote_renegotiation_blocks_commands_until_answer() {
    let mut h = Harness::new();
    h.join(vec![endpoint("peer", vec![])]).await;

    h.receive(MediaEvent::TracksAdded {
        endpoint_id: EndpointId::from("peer"),
        tracks: [(TrackId::from("peer:cam"), simulcast_info())].into_iter().collect(),
    })
    .await;
    assert!(h.client.session_stats().await.negotiating);

    let task = h.spawn_add_track(MediaStreamTrack::audio("mic"), SimulcastConfig::disabled());
    settle().await;
    assert!(!h.drain_wire().contains(&MediaEvent::RenegotiateTracks));

    h.negotiate().await;
    assert_eq!(h.next_wire().await, MediaEvent::RenegotiateTracks);
    h.negotiate().await;
    resolve(task).await.unwrap();
}

#[tokio::test]
async fn test_add_track_before_connect_fails_without_side_effects() {
    let mut h = Harness::new();
    let result = h
        .client
        .add_track(MediaStreamTrack::audio("mic"), None, SimulcastConfig::disabled(), TrackBandwidthLimit::default())
        .await;

    assert!(matches!(result, Err(ClientError::NotConnected)));
    assert!(h.drain().is_empty());
    assert!(h.drain_wire().is_empty());
    assert_eq!(h.client.session_stats().await.pending_commands, 0);
}

#[tokio::test]
async fn test_simulcast_audio_track_is_rejected() {
    let mut h = Harness::new();
    h.join(vec![]).await;
    let result = h
        .client
        .add_track(
            MediaStreamTrack::audio("mic"),
            None,
            SimulcastConfig::with_variants([Variant::Low]),
            TrackBandwidthLimit::default(),
        )
        .await;
    assert!(matches!(result, Err(ClientError::InvalidTrackConfiguration { .. })));
}

#[tokio::test]
async fn test_unstable_connection_holds_commands() {
    let mut h = Harness::new();
    h.join(vec![]).await;

    h.client
        .handle_transport_event(TransportEvent::ConnectionStateChanged(ConnectionState::Disconnected))
        .await
        .unwrap();
    let task = h.spawn_add_track(MediaStreamTrack::audio("mic"), SimulcastConfig::disabled());
    settle().await;
    assert!(h.drain_wire().is_empty());

    h.client
        .handle_transport_event(TransportEvent::ConnectionStateChanged(ConnectionState::Connected))
        .await
        .unwrap();
    assert_eq!(h.next_wire().await, MediaEvent::RenegotiateTracks);
    h.negotiate().await;
    resolve(task).await.unwrap();
}

#[tokio::test]
async fn test_remove_track_renegotiates() {
    let mut h = Harness::new();
    h.join(vec![]).await;
    let track_id = h.publish(MediaStreamTrack::audio("mic"), SimulcastConfig::disabled()).await;

    let client = h.client.clone();
    let id = track_id.clone();
    let task = tokio::spawn(async move { client.remove_track(&id).await });
    assert_eq!(h.next_wire().await, MediaEvent::RenegotiateTracks);
    h.negotiate().await;
    resolve(task).await.unwrap();

    assert!(h.client.local_tracks().await.is_empty());
    let transport = h.factory.last().unwrap();
    assert!(transport.lines().iter().all(|line| line.sender.is_none()));
}

#[tokio::test]
async fn test_remove_unknown_track_fails() {
    let mut h = Harness::new();
    h.join(vec![]).await;
    let err = h.client.remove_track(&TrackId::from("me:ghost")).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_offer_failure_rejects_waiting_command() {
    let mut h = Harness::new();
    h.join(vec![]).await;
    h.publish(MediaStreamTrack::audio("mic"), SimulcastConfig::disabled()).await;
    let transport = h.factory.last().unwrap();

    let task = h.spawn_add_track(MediaStreamTrack::video("cam"), SimulcastConfig::disabled());
    assert_eq!(h.next_wire().await, MediaEvent::RenegotiateTracks);

    transport.fail_offer.store(true, Ordering::SeqCst);
    let err = h
        .client
        .handle_media_event(MediaEvent::OfferData { tracks_types: TrackCounts::default() })
        .await
        .unwrap_err();
    assert_eq!(err, ClientError::transport_failed("offer rejected"));
    assert_eq!(resolve(task).await, Err(ClientError::transport_failed("offer rejected")));
    assert!(!h.client.session_stats().await.negotiating);
    assert!(h.drain_wire().is_empty());

    transport.fail_offer.store(false, Ordering::SeqCst);
    let retry = h.spawn_add_track(MediaStreamTrack::video("screen"), SimulcastConfig::disabled());
    assert_eq!(h.next_wire().await, MediaEvent::RenegotiateTracks);
    h.negotiate().await;
    resolve(retry).await.unwrap();
}

#[tokio::test]
async fn test_huge_bandwidth_limit_is_announced_saturated() {
    let mut h = Harness::new();
    h.join(vec![]).await;

    let client = h.client.clone();
    let task = tokio::spawn(async move {
        client
            .add_track(
                MediaStreamTrack::video("cam"),
                None,
                SimulcastConfig::disabled(),
                TrackBandwidthLimit::Total(5_000_000),
            )
            .await
    });
    assert_eq!(h.next_wire().await, MediaEvent::RenegotiateTracks);

    match h.negotiate().await {
        MediaEvent::SdpOffer { track_id_to_track_bitrates, .. } => {
            let bitrates: Vec<_> = track_id_to_track_bitrates.values().cloned().collect();
            assert_eq!(bitrates, vec![TrackBitrates::Single(u32::MAX)]);
        }
        other => panic!("expected offer, got {:?}", other),
    }
    let track_id = resolve(task).await.unwrap();

    let sender = h.client.local_tracks().await[&track_id].sender.unwrap();
    assert_eq!(h.factory.last().unwrap().encodings(sender)[0].max_bitrate_bps, Some(u32::MAX));
}

// ===== REMOTE STATE =====

#[tokio::test]
async fn test_endpoint_removal_cascades_to_tracks() {
    let mut h = Harness::new();
    h.join(vec![endpoint(
        "peer",
        vec![("peer:cam", simulcast_info()), ("peer:mic", TrackInfo::default())],
    )])
    .await;
    h.drain();

    h.receive(MediaEvent::EndpointRemoved { endpoint_id: EndpointId::from("peer") }).await;

    let events = h.drain();
    let removed = events.iter().filter(|event| matches!(event, ClientEvent::TrackRemoved { .. })).count();
    assert_eq!(removed, 2);
    assert!(matches!(events.last(), Some(ClientEvent::EndpointRemoved { .. })));

    let first = h.client.remote_tracks().await;
    let second = h.client.remote_tracks().await;
    assert!(first.is_empty());
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_self_echoes_are_ignored() {
    let mut h = Harness::new();
    h.join(vec![]).await;
    h.drain();

    h.receive(MediaEvent::TracksAdded {
        endpoint_id: EndpointId::from("me"),
        tracks: [(TrackId::from("me:a"), TrackInfo::default())].into_iter().collect(),
    })
    .await;
    h.receive(MediaEvent::EndpointUpdated { endpoint_id: EndpointId::from("me"), metadata: None }).await;

    assert!(h.drain().is_empty());
    assert!(h.drain_wire().is_empty());
    assert!(!h.client.session_stats().await.negotiating);
}

#[tokio::test]
async fn test_variant_switch_with_unknown_endpoint_uses_track_id() {
    let mut h = Harness::new();
    h.join(vec![endpoint("peer", vec![("peer:cam", simulcast_info())])]).await;
    h.drain();

    h.receive(MediaEvent::TrackVariantSwitched {
        endpoint_id: EndpointId::from("ghost"),
        track_id: TrackId::from("peer:cam"),
        variant: Variant::High,
        reason: None,
    })
    .await;

    let events = h.drain();
    assert_eq!(
        events,
        vec![ClientEvent::TrackEncodingChanged {
            endpoint_id: EndpointId::from("ghost"),
            track_id: TrackId::from("peer:cam"),
            variant: Variant::High,
            reason: None,
        }]
    );
    let tracks = h.client.remote_tracks().await;
    assert_eq!(tracks[&TrackId::from("peer:cam")].encoding, Some(Variant::High));
}

#[tokio::test]
async fn test_vad_speech_emits_once() {
    let mut h = Harness::new();
    h.join(vec![endpoint("peer", vec![("peer:mic", TrackInfo::default())])]).await;
    h.drain();

    h.receive(MediaEvent::VadNotification { track_id: TrackId::from("peer:mic"), status: "speech".to_string() })
        .await;

    assert_eq!(
        h.drain(),
        vec![ClientEvent::VoiceActivityChanged { track_id: TrackId::from("peer:mic"), status: VadStatus::Speech }]
    );
}

#[tokio::test]
#[traced_test]
async fn test_unknown_vad_status_is_logged_and_ignored() {
    let mut h = Harness::new();
    h.join(vec![endpoint("peer", vec![("peer:mic", TrackInfo::default())])]).await;
    h.drain();

    h.receive(MediaEvent::VadNotification { track_id: TrackId::from("peer:mic"), status: "shouting".to_string() })
        .await;

    assert!(h.drain().is_empty());
    assert!(logs_contain("Ignoring unknown voice activity status"));
}

#[tokio::test]
async fn test_remote_track_becomes_ready_on_its_media_line() {
    let mut h = Harness::new();
    h.join(vec![endpoint("peer", vec![("peer:mic", TrackInfo::default())])]).await;
    h.receive(MediaEvent::OfferData { tracks_types: TrackCounts { audio: 1, video: 0 } }).await;
    h.next_wire().await;
    h.receive(MediaEvent::SdpAnswer {
        sdp: "v=0 answer".to_string(),
        mid_to_track_id: [("0".to_string(), TrackId::from("peer:mic"))].into_iter().collect(),
    })
    .await;
    h.drain();

    let sender = h.factory.events.lock().unwrap().clone().unwrap();
    sender
        .send(TransportEvent::RemoteTrack { mid: "0".to_string(), track: MediaStreamTrack::audio("remote-mic") })
        .unwrap();
    settle().await;

    let events = h.drain();
    assert!(matches!(events.as_slice(), [ClientEvent::TrackReady { track }] if track.is_ready()));
}

#[tokio::test]
async fn test_target_encoding_request() {
    let mut h = Harness::new();
    h.join(vec![endpoint(
        "peer",
        vec![(
            "peer:cam",
            TrackInfo { metadata: None, simulcast_config: SimulcastConfig::with_variants([Variant::Low]) },
        )],
    )])
    .await;
    h.drain();

    let err = h.client.set_target_track_encoding(&TrackId::from("peer:cam"), Variant::High).await.unwrap_err();
    assert!(matches!(err, ClientError::VariantNotAvailable { variant: Variant::High, .. }));

    h.client.set_target_track_encoding(&TrackId::from("peer:cam"), Variant::Low).await.unwrap();
    assert_eq!(
        h.drain_wire(),
        vec![MediaEvent::SetTargetTrackVariant { track_id: TrackId::from("peer:cam"), variant: Variant::Low }]
    );
}

// ===== METADATA =====

#[tokio::test]
async fn test_track_metadata_update_deferred_until_answer() {
    let mut h = Harness::new();
    h.join(vec![]).await;

    let task = h.spawn_add_track(MediaStreamTrack::audio("mic"), SimulcastConfig::disabled());
    assert_eq!(h.next_wire().await, MediaEvent::RenegotiateTracks);
    h.receive(MediaEvent::OfferData { tracks_types: TrackCounts::default() }).await;
    assert!(matches!(h.next_wire().await, MediaEvent::SdpOffer { .. }));

    let track_id = h.client.local_tracks().await.keys().next().cloned().unwrap();
    h.client.update_track_metadata(&track_id, Some(json!({"muted": true}))).await.unwrap();

    assert!(h.drain_wire().is_empty());
    let events = h.drain();
    assert!(events.contains(&ClientEvent::LocalTrackMetadataChanged {
        track_id: track_id.clone(),
        metadata: Some(json!({"muted": true})),
    }));

    h.receive(answer()).await;
    resolve(task).await.unwrap();

    let updates: Vec<_> = h
        .drain_wire()
        .into_iter()
        .filter(|event| matches!(event, MediaEvent::UpdateTrackMetadata { .. }))
        .collect();
    assert_eq!(
        updates,
        vec![MediaEvent::UpdateTrackMetadata { track_id: track_id.clone(), metadata: Some(json!({"muted": true})) }]
    );

    h.client.update_track_metadata(&track_id, None).await.unwrap();
    assert_eq!(h.drain_wire(), vec![MediaEvent::UpdateTrackMetadata { track_id, metadata: None }]);
}

#[tokio::test]
async fn test_endpoint_metadata_update() {
    let mut h = Harness::new();
    h.client.update_endpoint_metadata(Some(json!({"name": "early"}))).await.unwrap();
    assert!(h.drain_wire().is_empty());
    let events = h.drain();
    assert!(events.contains(&ClientEvent::LocalEndpointMetadataChanged { metadata: Some(json!({"name": "early"})) }));

    h.join(vec![]).await;
    h.drain();
    h.client.update_endpoint_metadata(Some(json!({"name": "late"}))).await.unwrap();
    assert_eq!(
        h.drain_wire(),
        vec![MediaEvent::UpdateEndpointMetadata { metadata: Some(json!({"name": "late"})) }]
    );
    assert_eq!(h.client.local_endpoint().await.metadata, Some(json!({"name": "late"})));
}

// ===== OUTBOUND DELIVERY =====

#[tokio::test(start_paused = true)]
async fn test_reconnecting_buffers_both_queues() {
    let mut h = Harness::new();
    h.join(vec![]).await;
    h.drain();

    h.client.set_reconnecting(true);
    let candidate = IceCandidate {
        candidate: "candidate:1 1 udp 2122260223 10.0.0.1 50000 typ host".to_string(),
        sdp_m_line_index: Some(0),
        sdp_mid: Some("0".to_string()),
        username_fragment: None,
    };
    h.client.handle_transport_event(TransportEvent::LocalCandidate(candidate.clone())).await.unwrap();
    h.client.update_endpoint_metadata(Some(json!({"name": "bob"}))).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(h.drain_wire().is_empty());
    assert_eq!(h.client.session_stats().await.buffered_outbound, 2);

    h.client.set_reconnecting(false);
    assert_eq!(
        h.drain_wire(),
        vec![
            MediaEvent::Candidate(candidate),
            MediaEvent::UpdateEndpointMetadata { metadata: Some(json!({"name": "bob"})) },
        ]
    );

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(h.drain_wire().is_empty());
}

#[tokio::test]
async fn test_outbound_burst_survives_a_small_event_channel() {
    let factory = Arc::new(MockTransportFactory::default());
    let client = ClientBuilder::new()
        .transport_factory(factory)
        .event_channel_capacity(2)
        .build()
        .unwrap();
    let mut outbound = client.take_outbound().unwrap();
    assert!(client.take_outbound().is_none());
    client
        .handle_media_event(MediaEvent::Connected {
            endpoint_id: EndpointId::from("me"),
            endpoints: vec![endpoint("me", vec![])],
        })
        .await
        .unwrap();

    client.set_reconnecting(true);
    for rev in 0..4 {
        client.update_endpoint_metadata(Some(json!({"rev": rev}))).await.unwrap();
    }
    assert_eq!(client.session_stats().await.buffered_outbound, 4);
    client.set_reconnecting(false);

    let mut delivered = Vec::new();
    while let Ok(payload) = outbound.try_recv() {
        delivered.push(MediaEvent::decode(&payload).unwrap());
    }
    let expected: Vec<_> = (0..4)
        .map(|rev| MediaEvent::UpdateEndpointMetadata { metadata: Some(json!({"rev": rev})) })
        .collect();
    assert_eq!(delivered, expected);
    assert_eq!(client.session_stats().await.buffered_outbound, 0);
}

#[tokio::test]
async fn test_ice_disconnect_requests_renegotiation() {
    let mut h = Harness::new();
    h.join(vec![]).await;
    h.drain();

    h.client
        .handle_transport_event(TransportEvent::IceConnectionStateChanged(IceConnectionState::Disconnected))
        .await
        .unwrap();
    assert_eq!(h.drain_wire(), vec![MediaEvent::RenegotiateTracks]);

    h.client
        .handle_transport_event(TransportEvent::IceConnectionStateChanged(IceConnectionState::Failed))
        .await
        .unwrap();
    assert!(h.drain().iter().any(|event| matches!(event, ClientEvent::ConnectionError { .. })));
}

// ===== LOCAL TRACK CONTROL =====

#[tokio::test]
async fn test_replace_failure_rolls_back() {
    let mut h = Harness::new();
    h.join(vec![]).await;
    let track_id = h.publish(MediaStreamTrack::audio("mic"), SimulcastConfig::disabled()).await;
    let transport = h.factory.last().unwrap();
    transport.fail_replace.store(true, Ordering::SeqCst);

    let err = h.client.replace_track(&track_id, Some(MediaStreamTrack::audio("mic-2"))).await.unwrap_err();
    assert!(matches!(err, ClientError::TransportFailed { .. }));

    assert_eq!(
        h.drain(),
        vec![
            ClientEvent::LocalTrackReplaced {
                track_id: track_id.clone(),
                track: Some(MediaStreamTrack::audio("mic-2")),
            },
            ClientEvent::LocalTrackReplaced { track_id: track_id.clone(), track: Some(MediaStreamTrack::audio("mic")) },
        ]
    );
    let tracks = h.client.local_tracks().await;
    assert_eq!(tracks[&track_id].track, Some(MediaStreamTrack::audio("mic")));
}

#[tokio::test]
async fn test_remove_failure_keeps_the_track() {
    let mut h = Harness::new();
    h.join(vec![]).await;
    let track_id = h.publish(MediaStreamTrack::audio("mic"), SimulcastConfig::disabled()).await;
    let transport = h.factory.last().unwrap();
    transport.fail_remove.store(true, Ordering::SeqCst);

    let err = h.client.remove_track(&track_id).await.unwrap_err();
    assert!(matches!(err, ClientError::TransportFailed { .. }));

    let tracks = h.client.local_tracks().await;
    assert!(tracks[&track_id].sender.is_some());
    assert!(!h
        .drain()
        .iter()
        .any(|event| matches!(event, ClientEvent::LocalTrackRemoved { .. })));
    assert!(h.drain_wire().is_empty());

    transport.fail_remove.store(false, Ordering::SeqCst);
    let client = h.client.clone();
    let id = track_id.clone();
    let task = tokio::spawn(async move { client.remove_track(&id).await });
    assert_eq!(h.next_wire().await, MediaEvent::RenegotiateTracks);
    h.negotiate().await;
    resolve(task).await.unwrap();
    assert!(h.client.local_tracks().await.is_empty());
}

#[tokio::test]
async fn test_replace_with_none_mutes() {
    let mut h = Harness::new();
    h.join(vec![]).await;
    let track_id = h.publish(MediaStreamTrack::audio("mic"), SimulcastConfig::disabled()).await;

    h.client.replace_track(&track_id, None).await.unwrap();
    assert_eq!(h.drain(), vec![ClientEvent::LocalTrackMuted { track_id: track_id.clone() }]);

    let sender = h.client.local_tracks().await[&track_id].sender.unwrap();
    assert_eq!(h.factory.last().unwrap().payload(sender), None);

    h.client.replace_track(&track_id, Some(MediaStreamTrack::audio("mic"))).await.unwrap();
    assert_eq!(h.drain(), vec![ClientEvent::LocalTrackUnmuted { track_id }]);
}

#[tokio::test]
async fn test_encoding_bandwidth_reaches_transport_and_server() {
    let mut h = Harness::new();
    h.join(vec![]).await;
    let track_id = h
        .publish(MediaStreamTrack::video("cam"), SimulcastConfig::with_variants([Variant::Low, Variant::High]))
        .await;

    h.client.set_encoding_bandwidth(&track_id, Variant::High, 800).await.unwrap();

    let sender = h.client.local_tracks().await[&track_id].sender.unwrap();
    let encodings = h.factory.last().unwrap().encodings(sender);
    let high = encodings.iter().find(|encoding| encoding.rid == Some(Variant::High)).unwrap();
    assert_eq!(high.max_bitrate_bps, Some(800_000));

    assert!(h
        .drain_wire()
        .iter()
        .any(|event| matches!(event, MediaEvent::TrackBitrates { track_id: id, .. } if id == &track_id)));

    let err = h.client.set_encoding_bandwidth(&track_id, Variant::Medium, 300).await.unwrap_err();
    assert!(matches!(err, ClientError::VariantNotAvailable { .. }));
}

#[tokio::test]
async fn test_disable_and_enable_encoding() {
    let mut h = Harness::new();
    h.join(vec![]).await;
    let track_id = h
        .publish(MediaStreamTrack::video("cam"), SimulcastConfig::with_variants([Variant::Low, Variant::High]))
        .await;

    h.client.disable_track_encoding(&track_id, Variant::Low).await.unwrap();
    assert_eq!(
        h.next_wire().await,
        MediaEvent::DisableTrackVariant { track_id: track_id.clone(), variant: Variant::Low }
    );
    let sender = h.client.local_tracks().await[&track_id].sender.unwrap();
    let low = h
        .factory
        .last()
        .unwrap()
        .encodings(sender)
        .into_iter()
        .find(|encoding| encoding.rid == Some(Variant::Low))
        .unwrap();
    assert!(!low.active);

    h.client.enable_track_encoding(&track_id, Variant::Low).await.unwrap();
    assert_eq!(
        h.next_wire().await,
        MediaEvent::EnableTrackVariant { track_id, variant: Variant::Low }
    );
}

#[tokio::test]
async fn test_toggle_encoding_without_sender_fails() {
    let mut h = Harness::new();
    h.join(vec![]).await;
    let task = h.spawn_add_track(
        MediaStreamTrack::video("cam"),
        SimulcastConfig::with_variants([Variant::Low, Variant::High]),
    );
    assert_eq!(h.next_wire().await, MediaEvent::RenegotiateTracks);

    let track_id = h.client.local_tracks().await.keys().next().cloned().unwrap();
    let err = h.client.disable_track_encoding(&track_id, Variant::Low).await.unwrap_err();
    assert!(matches!(err, ClientError::NoActiveSender { .. }));

    h.negotiate().await;
    resolve(task).await.unwrap();
}

// ===== TEARDOWN =====

#[tokio::test]
async fn test_disconnect_during_offer_drops_the_offer() {
    let mut h = Harness::new();
    let gate = Arc::new(Notify::new());
    *h.factory.offer_gate.lock().unwrap() = Some(gate.clone());
    h.join(vec![]).await;
    h.drain();

    let client = h.client.clone();
    let offer = tokio::spawn(async move {
        client.handle_media_event(MediaEvent::OfferData { tracks_types: TrackCounts::default() }).await
    });
    settle().await;

    h.client.disconnect().await.unwrap();
    gate.notify_one();
    resolve(offer).await.unwrap();

    let sent = h.drain_wire();
    assert_eq!(sent, vec![MediaEvent::Disconnect]);
    assert!(h.factory.last().unwrap().is_closed());
    assert_eq!(h.client.local_endpoint().await.id, None);
}

#[tokio::test]
async fn test_command_pushed_while_offer_is_built_waits_for_next_offer() {
    let mut h = Harness::new();
    let gate = Arc::new(Notify::new());
    *h.factory.offer_gate.lock().unwrap() = Some(gate.clone());
    h.join(vec![]).await;

    let client = h.client.clone();
    let offer = tokio::spawn(async move {
        client.handle_media_event(MediaEvent::OfferData { tracks_types: TrackCounts::default() }).await
    });
    settle().await;
    assert!(h.client.session_stats().await.negotiating);

    let task = h.spawn_add_track(MediaStreamTrack::audio("mic"), SimulcastConfig::disabled());
    settle().await;
    assert!(h.drain_wire().is_empty());
    assert!(h.client.local_tracks().await.is_empty());

    gate.notify_one();
    resolve(offer).await.unwrap();
    match h.next_wire().await {
        MediaEvent::SdpOffer { track_id_to_track_metadata, mid_to_track_id, .. } => {
            assert!(track_id_to_track_metadata.is_empty());
            assert!(mid_to_track_id.is_empty());
        }
        other => panic!("expected offer, got {:?}", other),
    }
    h.receive(answer()).await;

    assert_eq!(h.next_wire().await, MediaEvent::RenegotiateTracks);
    settle().await;
    assert!(!task.is_finished());

    gate.notify_one();
    match h.negotiate().await {
        MediaEvent::SdpOffer { mid_to_track_id, .. } => assert_eq!(mid_to_track_id.len(), 1),
        other => panic!("expected offer, got {:?}", other),
    }
    let track_id = resolve(task).await.unwrap();
    assert_eq!(h.client.local_tracks().await[&track_id].negotiation, NegotiationStatus::Done);
}

#[tokio::test]
async fn test_server_error_tears_down_and_abandons_commands() {
    let mut h = Harness::new();
    h.join(vec![endpoint("peer", vec![("peer:mic", TrackInfo::default())])]).await;

    let task = h.spawn_add_track(MediaStreamTrack::audio("mic"), SimulcastConfig::disabled());
    assert_eq!(h.next_wire().await, MediaEvent::RenegotiateTracks);

    h.receive(MediaEvent::Error { message: "room closed".to_string() }).await;

    assert!(matches!(resolve(task).await, Err(ClientError::SessionClosed)));
    assert!(h
        .drain()
        .contains(&ClientEvent::SignalingError { message: "room closed".to_string() }));
    let stats = h.client.session_stats().await;
    assert!(!stats.connected);
    assert_eq!(stats.remote_tracks, 0);
    assert_eq!(stats.local_tracks, 0);
}

#[tokio::test]
async fn test_self_removal_disconnects() {
    let mut h = Harness::new();
    h.join(vec![]).await;
    h.publish(MediaStreamTrack::audio("mic"), SimulcastConfig::disabled()).await;

    h.receive(MediaEvent::EndpointRemoved { endpoint_id: EndpointId::from("me") }).await;

    assert!(h.drain().contains(&ClientEvent::Disconnected));
    assert!(h.factory.last().unwrap().is_closed());
    assert!(!h.client.session_stats().await.has_transport);
}

#[tokio::test]
async fn test_clean_up_allows_a_fresh_session() {
    let mut h = Harness::new();
    h.join(vec![]).await;
    h.publish(MediaStreamTrack::audio("mic"), SimulcastConfig::disabled()).await;

    h.client.clean_up().await;
    assert!(h.drain().is_empty());

    h.join(vec![]).await;
    h.publish(MediaStreamTrack::audio("mic"), SimulcastConfig::disabled()).await;
    assert_eq!(h.factory.created_count(), 2);
}
