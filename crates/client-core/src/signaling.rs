//! Signaling message model
//!
//! Every message exchanged with the server is one [`MediaEvent`]. Messages are
//! JSON objects of the form `{"type": "<name>", "data": {...}}`; the codec is
//! [`MediaEvent::encode`] / [`MediaEvent::decode`]. The same enum is used in
//! both directions, some variants only ever travel one way.

use bytes::Bytes;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::bitrate::TrackBitrates;
use crate::delivery::DeliveryClass;
use crate::error::ClientResult;
use crate::track::{EncodingReason, EndpointId, Metadata, SimulcastConfig, TrackId, Variant};
use crate::transport::{IceCandidate, SessionDescription};

/// Track description as announced by the server
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub simulcast_config: SimulcastConfig,
}

/// Roster entry of a `connected` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointInfo {
    pub id: EndpointId,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub tracks: IndexMap<TrackId, TrackInfo>,
}

/// Number of tracks per kind the server expects the local side to receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackCounts {
    #[serde(default)]
    pub audio: usize,
    #[serde(default)]
    pub video: usize,
}

/// A signaling message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum MediaEvent {
    /// Join the session
    Connect { metadata: Metadata },
    /// The server accepted the local endpoint; the roster includes it
    Connected { endpoint_id: EndpointId, endpoints: Vec<EndpointInfo> },
    /// The server wants a fresh local offer
    OfferData { tracks_types: TrackCounts },
    SdpOffer {
        sdp_offer: SessionDescription,
        track_id_to_track_metadata: IndexMap<TrackId, Metadata>,
        track_id_to_track_bitrates: IndexMap<TrackId, TrackBitrates>,
        mid_to_track_id: IndexMap<String, TrackId>,
    },
    SdpAnswer {
        sdp: String,
        #[serde(default)]
        mid_to_track_id: IndexMap<String, TrackId>,
    },
    Candidate(IceCandidate),
    TracksAdded { endpoint_id: EndpointId, tracks: IndexMap<TrackId, TrackInfo> },
    TracksRemoved { endpoint_id: EndpointId, track_ids: Vec<TrackId> },
    TrackUpdated {
        endpoint_id: EndpointId,
        track_id: TrackId,
        #[serde(default)]
        metadata: Metadata,
    },
    EndpointAdded {
        endpoint_id: EndpointId,
        #[serde(default)]
        metadata: Metadata,
    },
    EndpointUpdated {
        endpoint_id: EndpointId,
        #[serde(default)]
        metadata: Metadata,
    },
    EndpointRemoved { endpoint_id: EndpointId },
    UpdateEndpointMetadata { metadata: Metadata },
    UpdateTrackMetadata { track_id: TrackId, metadata: Metadata },
    EnableTrackVariant { track_id: TrackId, variant: Variant },
    DisableTrackVariant { track_id: TrackId, variant: Variant },
    /// Ask the server to forward a specific variant of a remote track
    SetTargetTrackVariant { track_id: TrackId, variant: Variant },
    TrackVariantSwitched {
        endpoint_id: EndpointId,
        track_id: TrackId,
        variant: Variant,
        #[serde(default)]
        reason: Option<EncodingReason>,
    },
    TrackBitrates { track_id: TrackId, bitrates: TrackBitrates },
    VadNotification { track_id: TrackId, status: String },
    /// Server side bandwidth estimate for the local endpoint, in bps
    BandwidthEstimation { estimation: f64 },
    RenegotiateTracks,
    Disconnect,
    Error { message: String },
}

impl MediaEvent {
    /// Wire name of the message, for logging
    pub fn name(&self) -> &'static str {
        match self {
            MediaEvent::Connect { .. } => "connect",
            MediaEvent::Connected { .. } => "connected",
            MediaEvent::OfferData { .. } => "offerData",
            MediaEvent::SdpOffer { .. } => "sdpOffer",
            MediaEvent::SdpAnswer { .. } => "sdpAnswer",
            MediaEvent::Candidate(_) => "candidate",
            MediaEvent::TracksAdded { .. } => "tracksAdded",
            MediaEvent::TracksRemoved { .. } => "tracksRemoved",
            MediaEvent::TrackUpdated { .. } => "trackUpdated",
            MediaEvent::EndpointAdded { .. } => "endpointAdded",
            MediaEvent::EndpointUpdated { .. } => "endpointUpdated",
            MediaEvent::EndpointRemoved { .. } => "endpointRemoved",
            MediaEvent::UpdateEndpointMetadata { .. } => "updateEndpointMetadata",
            MediaEvent::UpdateTrackMetadata { .. } => "updateTrackMetadata",
            MediaEvent::EnableTrackVariant { .. } => "enableTrackVariant",
            MediaEvent::DisableTrackVariant { .. } => "disableTrackVariant",
            MediaEvent::SetTargetTrackVariant { .. } => "setTargetTrackVariant",
            MediaEvent::TrackVariantSwitched { .. } => "trackVariantSwitched",
            MediaEvent::TrackBitrates { .. } => "trackBitrates",
            MediaEvent::VadNotification { .. } => "vadNotification",
            MediaEvent::BandwidthEstimation { .. } => "bandwidthEstimation",
            MediaEvent::RenegotiateTracks => "renegotiateTracks",
            MediaEvent::Disconnect => "disconnect",
            MediaEvent::Error { .. } => "error",
        }
    }

    /// Outbound queue a locally produced message travels through
    pub fn delivery_class(&self) -> DeliveryClass {
        match self {
            MediaEvent::UpdateEndpointMetadata { .. }
            | MediaEvent::UpdateTrackMetadata { .. }
            | MediaEvent::TrackBitrates { .. }
            | MediaEvent::EnableTrackVariant { .. }
            | MediaEvent::DisableTrackVariant { .. }
            | MediaEvent::SetTargetTrackVariant { .. } => DeliveryClass::StateSync,
            _ => DeliveryClass::Control,
        }
    }

    pub fn encode(&self) -> ClientResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(bytes: &[u8]) -> ClientResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
