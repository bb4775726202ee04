//! Public notifications produced by the client
//!
//! Everything the application layer can observe about the session is a
//! [`ClientEvent`], fanned out to subscribers over a tokio broadcast channel.
//! Outbound signaling does not travel here: a lagging subscriber may miss
//! notifications, while every encoded message must reach the server. See
//! [`MediaClient::take_outbound`](crate::MediaClient::take_outbound).
//!
//! # Event Types
//!
//! - **Session Events** - connected, disconnected, signaling and connection errors
//! - **Remote Events** - endpoints and tracks announced by the server
//! - **Local Events** - changes to locally originated tracks and metadata
//!
//! # Usage Examples
//!
//! ```rust
//! use meshroom_client_core::events::{ClientEvent, EventEmitter, EventPriority};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let emitter = EventEmitter::new(16);
//! let mut events = emitter.subscribe();
//!
//! emitter.emit(ClientEvent::Disconnected);
//!
//! let event = events.recv().await.unwrap();
//! assert_eq!(event.priority(), EventPriority::Critical);
//! # }
//! ```

use std::collections::HashSet;

use tokio::sync::broadcast;
use tracing::trace;

use crate::bitrate::TrackBandwidthLimit;
use crate::registry::remote::{RemoteEndpoint, RemoteTrack};
use crate::signaling::EndpointInfo;
use crate::track::{
    EncodingReason, EndpointId, Metadata, MediaStreamTrack, SimulcastConfig, TrackId, TrackKind,
    VadStatus, Variant,
};

/// Event priority levels for filtering and handling
///
/// ```rust
/// use meshroom_client_core::events::EventPriority;
///
/// assert!(EventPriority::Critical > EventPriority::High);
/// assert!(EventPriority::Normal > EventPriority::Low);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    /// Routine status updates (voice activity, bandwidth estimates)
    Low,
    /// Track and endpoint changes
    Normal,
    /// Session establishment and outbound signaling
    High,
    /// Failures and teardown
    Critical,
}

/// Notification emitted by the client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The server confirmed the local endpoint; the roster includes it
    Connected { endpoint_id: EndpointId, endpoints: Vec<EndpointInfo> },
    /// The session was torn down by the server
    Disconnected,
    /// The server reported an error; the session is gone
    SignalingError { message: String },
    /// The transport reached a failed state
    ConnectionError { message: String },

    TrackAdded { track: RemoteTrack },
    /// Media started flowing on a remote track
    TrackReady { track: RemoteTrack },
    TrackUpdated { track: RemoteTrack },
    TrackRemoved { track: RemoteTrack },
    TrackEncodingEnabled { track_id: TrackId, variant: Variant },
    TrackEncodingDisabled { track_id: TrackId, variant: Variant },
    /// The server now forwards another variant of a remote track
    TrackEncodingChanged {
        endpoint_id: EndpointId,
        track_id: TrackId,
        variant: Variant,
        reason: Option<EncodingReason>,
    },

    EndpointAdded { endpoint: RemoteEndpoint },
    EndpointUpdated { endpoint: RemoteEndpoint },
    EndpointRemoved { endpoint: RemoteEndpoint },

    LocalTrackAdded {
        track_id: TrackId,
        kind: TrackKind,
        metadata: Metadata,
        simulcast_config: SimulcastConfig,
    },
    LocalTrackRemoved { track_id: TrackId },
    LocalTrackReplaced { track_id: TrackId, track: Option<MediaStreamTrack> },
    LocalTrackMuted { track_id: TrackId },
    LocalTrackUnmuted { track_id: TrackId },
    LocalTrackMetadataChanged { track_id: TrackId, metadata: Metadata },
    LocalEndpointMetadataChanged { metadata: Metadata },
    LocalTrackBandwidthSet { track_id: TrackId, limit: TrackBandwidthLimit },
    LocalTrackEncodingBandwidthSet { track_id: TrackId, variant: Variant, kbps: u32 },
    LocalTrackEncodingEnabled { track_id: TrackId, variant: Variant },
    LocalTrackEncodingDisabled { track_id: TrackId, variant: Variant },

    /// A specific variant of a remote track was requested from the server
    TargetEncodingRequested { track_id: TrackId, variant: Variant },
    VoiceActivityChanged { track_id: TrackId, status: VadStatus },
    /// Server side bandwidth estimate in bps
    BandwidthEstimationChanged { estimation: f64 },
}

impl ClientEvent {
    /// Get the priority of this event
    pub fn priority(&self) -> EventPriority {
        match self {
            ClientEvent::Disconnected
            | ClientEvent::SignalingError { .. }
            | ClientEvent::ConnectionError { .. } => EventPriority::Critical,

            ClientEvent::Connected { .. } => EventPriority::High,

            ClientEvent::VoiceActivityChanged { .. }
            | ClientEvent::BandwidthEstimationChanged { .. }
            | ClientEvent::TrackEncodingChanged { .. } => EventPriority::Low,

            _ => EventPriority::Normal,
        }
    }

    /// Get the track this event is about (if any)
    pub fn track_id(&self) -> Option<&TrackId> {
        match self {
            ClientEvent::TrackAdded { track }
            | ClientEvent::TrackReady { track }
            | ClientEvent::TrackUpdated { track }
            | ClientEvent::TrackRemoved { track } => Some(&track.track_id),

            ClientEvent::TrackEncodingEnabled { track_id, .. }
            | ClientEvent::TrackEncodingDisabled { track_id, .. }
            | ClientEvent::TrackEncodingChanged { track_id, .. }
            | ClientEvent::LocalTrackAdded { track_id, .. }
            | ClientEvent::LocalTrackRemoved { track_id }
            | ClientEvent::LocalTrackReplaced { track_id, .. }
            | ClientEvent::LocalTrackMuted { track_id }
            | ClientEvent::LocalTrackUnmuted { track_id }
            | ClientEvent::LocalTrackMetadataChanged { track_id, .. }
            | ClientEvent::LocalTrackBandwidthSet { track_id, .. }
            | ClientEvent::LocalTrackEncodingBandwidthSet { track_id, .. }
            | ClientEvent::LocalTrackEncodingEnabled { track_id, .. }
            | ClientEvent::LocalTrackEncodingDisabled { track_id, .. }
            | ClientEvent::TargetEncodingRequested { track_id, .. }
            | ClientEvent::VoiceActivityChanged { track_id, .. } => Some(track_id),

            _ => None,
        }
    }

    /// Check if this event passes the given filter
    pub fn passes_filter(&self, filter: &EventFilter) -> bool {
        if let Some(min_priority) = filter.min_priority {
            if self.priority() < min_priority {
                return false;
            }
        }

        if let Some(track_ids) = &filter.track_ids {
            match self.track_id() {
                Some(track_id) if track_ids.contains(track_id) => {}
                _ => return false,
            }
        }

        true
    }
}

/// Event filtering options for selective consumption
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Minimum event priority level (None = all priorities)
    pub min_priority: Option<EventPriority>,
    /// Only events about these tracks (None = all events)
    pub track_ids: Option<HashSet<TrackId>>,
}

/// Fan-out point for [`ClientEvent`]s
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<ClientEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; it is dropped when nobody listens
    pub fn emit(&self, event: ClientEvent) {
        trace!(priority = ?event.priority(), "emitting {:?}", event);
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
