//! Track and endpoint data model
//!
//! Identifiers, media kinds, simulcast configuration and the per-track state
//! machines shared by the local and remote registries.
//!
//! Negotiation progress is modelled with explicit states instead of nullable
//! fields: a local track is [`NegotiationStatus::Awaiting`] until it is part of
//! an offer, [`NegotiationStatus::Offered`] while the answer is pending and
//! [`NegotiationStatus::Done`] afterwards. Its media line moves through
//! [`MediaLine::Unassigned`], [`MediaLine::Pending`] and [`MediaLine::Negotiated`]
//! in the same rhythm.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, user-defined metadata attached to endpoints and tracks
pub type Metadata = Option<serde_json::Value>;

/// Unique identifier of a session participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(pub String);

impl EndpointId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EndpointId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Globally unique track identifier
///
/// Local tracks are namespaced by the local endpoint id (`<endpoint>:<uuid>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub String);

impl TrackId {
    /// Generate a fresh id for a track owned by `endpoint_id`
    pub fn generate(endpoint_id: &EndpointId) -> Self {
        Self(format!("{}:{}", endpoint_id, Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TrackId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TrackId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// One of the alternative quality encodings of a simulcast track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Variant {
    #[serde(rename = "l")]
    Low,
    #[serde(rename = "m")]
    Medium,
    #[serde(rename = "h")]
    High,
}

impl Variant {
    pub const ALL: [Variant; 3] = [Variant::Low, Variant::Medium, Variant::High];

    /// Wire identifier, also used as the RTP stream id
    pub fn rid(&self) -> &'static str {
        match self {
            Variant::Low => "l",
            Variant::Medium => "m",
            Variant::High => "h",
        }
    }

    /// Factor the source resolution is divided by for this variant
    pub fn scale_resolution_down_by(&self) -> f64 {
        match self {
            Variant::Low => 4.0,
            Variant::Medium => 2.0,
            Variant::High => 1.0,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rid())
    }
}

/// Simulcast configuration of a track, fixed at creation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulcastConfig {
    pub enabled: bool,
    #[serde(default)]
    pub active_encodings: BTreeSet<Variant>,
}

impl SimulcastConfig {
    /// Simulcast disabled; the track has a single encoding
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Simulcast enabled with the given variants active
    pub fn with_variants(variants: impl IntoIterator<Item = Variant>) -> Self {
        Self { enabled: true, active_encodings: variants.into_iter().collect() }
    }

    /// Whether the server may be asked for `variant`
    pub fn supports(&self, variant: Variant) -> bool {
        self.enabled && self.active_encodings.contains(&variant)
    }
}

/// Opaque reference to a captured media payload
///
/// Capture and processing happen outside this crate; the engine only needs a
/// stable id and the media kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaStreamTrack {
    pub id: String,
    pub kind: TrackKind,
}

impl MediaStreamTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self { id: id.into(), kind }
    }

    pub fn audio(id: impl Into<String>) -> Self {
        Self::new(id, TrackKind::Audio)
    }

    pub fn video(id: impl Into<String>) -> Self {
        Self::new(id, TrackKind::Video)
    }
}

/// Handle to a media sender owned by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SenderId(pub u64);

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sender-{}", self.0)
    }
}

/// Progress of a local track through the offer/answer cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationStatus {
    /// Not yet part of any offer; metadata changes ride along with the next offer
    Awaiting,
    /// Included in the outstanding offer; metadata changes are deferred
    Offered,
    /// Negotiated; metadata changes are sent immediately
    Done,
}

/// Binding of a track to a media line of the session description
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MediaLine {
    Unassigned,
    /// Assigned by the transport for the outstanding offer, not yet confirmed
    Pending(String),
    Negotiated(String),
}

impl MediaLine {
    /// The media line id, whether confirmed or not
    pub fn mid(&self) -> Option<&str> {
        match self {
            MediaLine::Unassigned => None,
            MediaLine::Pending(mid) | MediaLine::Negotiated(mid) => Some(mid),
        }
    }

    pub fn is_negotiated(&self) -> bool {
        matches!(self, MediaLine::Negotiated(_))
    }
}

/// Voice activity reported for an audio track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadStatus {
    Speech,
    #[default]
    Silence,
}

impl VadStatus {
    /// Map the wire value; unknown values yield `None`
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "speech" => Some(VadStatus::Speech),
            "silence" => Some(VadStatus::Silence),
            _ => None,
        }
    }
}

/// Why the server switched the variant it forwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingReason {
    /// The sender stopped producing the previously forwarded variant
    EncodingInactive,
    /// The receiver's bandwidth estimate dropped
    LowBandwidth,
    /// The receiver asked for another variant
    Other,
}
