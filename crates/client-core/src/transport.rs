//! Transport capability boundary
//!
//! The peer connection (ICE, DTLS, codecs, RTP) lives outside this crate. The
//! engine consumes it through the [`Transport`] trait and creates one per
//! connection through a [`TransportFactory`]. The transport reports
//! asynchronous happenings (local candidates, remote tracks, state changes)
//! as [`TransportEvent`]s on the channel it receives at creation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ClientResult;
use crate::track::{MediaStreamTrack, SenderId, TrackKind, Variant};

/// Type of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// A session description as exchanged with the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { sdp_type: SdpType::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { sdp_type: SdpType::Answer, sdp: sdp.into() }
    }
}

/// An ICE candidate in either direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_m_line_index: Option<u16>,
    pub sdp_mid: Option<String>,
    pub username_fragment: Option<String>,
}

/// Direction of a media line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

/// Snapshot of one media line of the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaLineInfo {
    /// Assigned once a local description has been applied
    pub mid: Option<String>,
    pub kind: TrackKind,
    pub direction: Direction,
    pub sender: Option<SenderId>,
}

/// Send parameters of one encoding of a sender
#[derive(Debug, Clone, PartialEq)]
pub struct EncodingParameters {
    /// Simulcast variant, `None` for a non-simulcast sender
    pub rid: Option<Variant>,
    pub active: bool,
    pub max_bitrate_bps: Option<u32>,
    pub scale_resolution_down_by: Option<f64>,
}

/// Overall peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Whether mutating operations should wait for the connection to settle
    pub fn is_unstable(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed)
    }
}

/// ICE connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Notifications pushed by the transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A local ICE candidate was gathered
    LocalCandidate(IceCandidate),
    /// Media started arriving on a receive media line
    RemoteTrack { mid: String, track: MediaStreamTrack },
    ConnectionStateChanged(ConnectionState),
    IceConnectionStateChanged(IceConnectionState),
}

/// Peer connection operations used by the engine
#[async_trait]
pub trait Transport: Send + Sync {
    /// Attach a sender for a local track; `track` is `None` for a muted track
    async fn add_sender(
        &self,
        kind: TrackKind,
        track: Option<&MediaStreamTrack>,
        encodings: Vec<EncodingParameters>,
    ) -> ClientResult<SenderId>;

    async fn remove_sender(&self, sender: SenderId) -> ClientResult<()>;

    /// Swap the payload of a sender without renegotiation
    async fn replace_sender_track(
        &self,
        sender: SenderId,
        track: Option<&MediaStreamTrack>,
    ) -> ClientResult<()>;

    /// Make sure at least `count` receive-only media lines of `kind` exist
    async fn ensure_receive_only(&self, kind: TrackKind, count: usize) -> ClientResult<()>;

    async fn create_offer(&self) -> ClientResult<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> ClientResult<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> ClientResult<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> ClientResult<()>;

    async fn media_lines(&self) -> Vec<MediaLineInfo>;

    async fn encoding_parameters(&self, sender: SenderId) -> ClientResult<Vec<EncodingParameters>>;

    async fn set_encoding_parameters(
        &self,
        sender: SenderId,
        encodings: Vec<EncodingParameters>,
    ) -> ClientResult<()>;

    async fn close(&self);
}

/// Creates a transport for a new connection
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> ClientResult<Arc<dyn Transport>>;
}
