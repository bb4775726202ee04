//! Remote endpoints and tracks as announced by the server

use std::collections::BTreeSet;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, EventEmitter};
use crate::signaling::{EndpointInfo, TrackInfo};
use crate::track::{
    EncodingReason, EndpointId, MediaLine, MediaStreamTrack, Metadata, SimulcastConfig, TrackId,
    VadStatus, Variant,
};

/// A track sent by a remote endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTrack {
    pub track_id: TrackId,
    /// Owner, resolved through the registry
    pub endpoint_id: EndpointId,
    pub metadata: Metadata,
    pub simulcast_config: SimulcastConfig,
    pub media_line: MediaLine,
    /// Media payload, present once the transport reports the track
    pub track: Option<MediaStreamTrack>,
    /// Variant the server currently forwards
    pub encoding: Option<Variant>,
    pub encoding_reason: Option<EncodingReason>,
    /// Variants the sender stopped producing
    pub disabled_encodings: BTreeSet<Variant>,
    pub vad_status: VadStatus,
}

impl RemoteTrack {
    fn new(track_id: TrackId, endpoint_id: EndpointId, info: TrackInfo) -> Self {
        Self {
            track_id,
            endpoint_id,
            metadata: info.metadata,
            simulcast_config: info.simulcast_config,
            media_line: MediaLine::Unassigned,
            track: None,
            encoding: None,
            encoding_reason: None,
            disabled_encodings: BTreeSet::new(),
            vad_status: VadStatus::default(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.track.is_some()
    }
}

/// A remote session participant
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEndpoint {
    pub id: EndpointId,
    pub metadata: Metadata,
    pub tracks: IndexSet<TrackId>,
}

/// Mirror of the server's view of the other participants
#[derive(Debug)]
pub struct RemoteRegistry {
    endpoints: IndexMap<EndpointId, RemoteEndpoint>,
    tracks: IndexMap<TrackId, RemoteTrack>,
    events: EventEmitter,
}

impl RemoteRegistry {
    pub fn new(events: EventEmitter) -> Self {
        Self { endpoints: IndexMap::new(), tracks: IndexMap::new(), events }
    }

    /// Add an endpoint announced after the session started
    pub fn add_endpoint(&mut self, endpoint_id: EndpointId, metadata: Metadata) -> ClientResult<()> {
        let endpoint = self.insert_endpoint(endpoint_id, metadata)?;
        self.events.emit(ClientEvent::EndpointAdded { endpoint });
        Ok(())
    }

    /// Apply a roster entry of the `connected` message
    ///
    /// Only the tracks are announced; the roster itself travels in the
    /// `Connected` notification.
    pub fn add_roster_endpoint(&mut self, info: EndpointInfo) -> ClientResult<()> {
        let endpoint_id = info.id.clone();
        self.insert_endpoint(info.id, info.metadata)?;
        if !info.tracks.is_empty() {
            self.add_tracks(&endpoint_id, info.tracks)?;
        }
        Ok(())
    }

    fn insert_endpoint(&mut self, endpoint_id: EndpointId, metadata: Metadata) -> ClientResult<RemoteEndpoint> {
        if self.endpoints.contains_key(&endpoint_id) {
            return Err(ClientError::EndpointAlreadyExists { endpoint_id });
        }
        debug!(endpoint_id = %endpoint_id, "Remote endpoint added");
        let endpoint = RemoteEndpoint { id: endpoint_id.clone(), metadata, tracks: IndexSet::new() };
        self.endpoints.insert(endpoint_id, endpoint.clone());
        Ok(endpoint)
    }

    pub fn add_tracks(
        &mut self,
        endpoint_id: &EndpointId,
        tracks: IndexMap<TrackId, TrackInfo>,
    ) -> ClientResult<()> {
        let endpoint = self
            .endpoints
            .get_mut(endpoint_id)
            .ok_or_else(|| ClientError::endpoint_not_found(endpoint_id))?;

        let mut added = Vec::with_capacity(tracks.len());
        for (track_id, info) in tracks {
            if self.tracks.contains_key(&track_id) {
                warn!(track_id = %track_id, "Ignoring duplicate track announcement");
                continue;
            }
            endpoint.tracks.insert(track_id.clone());
            let track = RemoteTrack::new(track_id.clone(), endpoint_id.clone(), info);
            self.tracks.insert(track_id, track.clone());
            added.push(track);
        }

        for track in added {
            debug!(track_id = %track.track_id, endpoint_id = %endpoint_id, "Remote track added");
            self.events.emit(ClientEvent::TrackAdded { track });
        }
        Ok(())
    }

    /// Remove tracks; nothing is removed if any id is unknown
    pub fn remove_tracks(&mut self, track_ids: &[TrackId]) -> ClientResult<()> {
        if let Some(unknown) = track_ids.iter().find(|id| !self.tracks.contains_key(*id)) {
            return Err(ClientError::track_not_found(unknown));
        }
        for track_id in track_ids {
            self.remove_track(track_id);
        }
        Ok(())
    }

    fn remove_track(&mut self, track_id: &TrackId) {
        let Some(track) = self.tracks.shift_remove(track_id) else {
            return;
        };
        if let Some(endpoint) = self.endpoints.get_mut(&track.endpoint_id) {
            endpoint.tracks.shift_remove(track_id);
        }
        debug!(track_id = %track_id, "Remote track removed");
        self.events.emit(ClientEvent::TrackRemoved { track });
    }

    /// Remove an endpoint together with all of its tracks
    pub fn remove_endpoint(&mut self, endpoint_id: &EndpointId) -> ClientResult<()> {
        let track_ids: Vec<TrackId> = self
            .endpoints
            .get(endpoint_id)
            .ok_or_else(|| ClientError::endpoint_not_found(endpoint_id))?
            .tracks
            .iter()
            .cloned()
            .collect();

        for track_id in &track_ids {
            self.remove_track(track_id);
        }

        if let Some(endpoint) = self.endpoints.shift_remove(endpoint_id) {
            debug!(endpoint_id = %endpoint_id, tracks = track_ids.len(), "Remote endpoint removed");
            self.events.emit(ClientEvent::EndpointRemoved { endpoint });
        }
        Ok(())
    }

    pub fn update_endpoint(&mut self, endpoint_id: &EndpointId, metadata: Metadata) -> ClientResult<()> {
        let endpoint = self
            .endpoints
            .get_mut(endpoint_id)
            .ok_or_else(|| ClientError::endpoint_not_found(endpoint_id))?;
        endpoint.metadata = metadata;
        let endpoint = endpoint.clone();
        self.events.emit(ClientEvent::EndpointUpdated { endpoint });
        Ok(())
    }

    pub fn update_track(&mut self, track_id: &TrackId, metadata: Metadata) -> ClientResult<()> {
        let track = self.track_mut(track_id)?;
        track.metadata = metadata;
        let track = track.clone();
        self.events.emit(ClientEvent::TrackUpdated { track });
        Ok(())
    }

    /// Validate a request for a specific variant of a remote track
    pub fn set_target_encoding(&mut self, track_id: &TrackId, variant: Variant) -> ClientResult<()> {
        let track = self.track(track_id)?;
        if !track.simulcast_config.supports(variant) {
            return Err(ClientError::VariantNotAvailable { track_id: track_id.clone(), variant });
        }
        self.events.emit(ClientEvent::TargetEncodingRequested { track_id: track_id.clone(), variant });
        Ok(())
    }

    /// The server switched the forwarded variant
    ///
    /// Tracks are looked up by id alone; the announced endpoint id is only
    /// carried through to the notification.
    pub fn set_track_encoding(
        &mut self,
        endpoint_id: &EndpointId,
        track_id: &TrackId,
        variant: Variant,
        reason: Option<EncodingReason>,
    ) -> ClientResult<()> {
        let track = self.track_mut(track_id)?;
        track.encoding = Some(variant);
        track.encoding_reason = reason;
        self.events.emit(ClientEvent::TrackEncodingChanged {
            endpoint_id: endpoint_id.clone(),
            track_id: track_id.clone(),
            variant,
            reason,
        });
        Ok(())
    }

    pub fn enable_encoding(&mut self, track_id: &TrackId, variant: Variant) -> ClientResult<()> {
        self.track_mut(track_id)?.disabled_encodings.remove(&variant);
        self.events.emit(ClientEvent::TrackEncodingEnabled { track_id: track_id.clone(), variant });
        Ok(())
    }

    pub fn disable_encoding(&mut self, track_id: &TrackId, variant: Variant) -> ClientResult<()> {
        self.track_mut(track_id)?.disabled_encodings.insert(variant);
        self.events.emit(ClientEvent::TrackEncodingDisabled { track_id: track_id.clone(), variant });
        Ok(())
    }

    /// Apply a voice activity report; unknown statuses are ignored
    pub fn set_vad_status(&mut self, track_id: &TrackId, status: &str) -> ClientResult<()> {
        let track = self.track_mut(track_id)?;
        let Some(status) = VadStatus::from_wire(status) else {
            warn!(track_id = %track_id, status, "Ignoring unknown voice activity status");
            return Ok(());
        };
        track.vad_status = status;
        self.events.emit(ClientEvent::VoiceActivityChanged { track_id: track_id.clone(), status });
        Ok(())
    }

    /// Bind remote tracks to the media lines of an applied answer
    pub fn apply_media_lines(&mut self, mid_to_track_id: &IndexMap<String, TrackId>) {
        for (mid, track_id) in mid_to_track_id {
            if let Some(track) = self.tracks.get_mut(track_id) {
                track.media_line = MediaLine::Negotiated(mid.clone());
            }
        }
    }

    pub fn track_by_mid(&self, mid: &str) -> ClientResult<&RemoteTrack> {
        self.tracks
            .values()
            .find(|track| track.media_line.mid() == Some(mid))
            .ok_or_else(|| ClientError::MediaLineNotFound { mid: mid.to_string() })
    }

    /// The transport started receiving media on `mid`
    pub fn mark_ready(&mut self, mid: &str, payload: MediaStreamTrack) -> ClientResult<()> {
        let track_id = self.track_by_mid(mid)?.track_id.clone();
        let track = self.track_mut(&track_id)?;
        track.track = Some(payload);
        let track = track.clone();
        debug!(track_id = %track_id, mid, "Remote track ready");
        self.events.emit(ClientEvent::TrackReady { track });
        Ok(())
    }

    pub fn track(&self, track_id: &TrackId) -> ClientResult<&RemoteTrack> {
        self.tracks.get(track_id).ok_or_else(|| ClientError::track_not_found(track_id))
    }

    fn track_mut(&mut self, track_id: &TrackId) -> ClientResult<&mut RemoteTrack> {
        self.tracks.get_mut(track_id).ok_or_else(|| ClientError::track_not_found(track_id))
    }

    pub fn tracks(&self) -> IndexMap<TrackId, RemoteTrack> {
        self.tracks.clone()
    }

    pub fn endpoints(&self) -> IndexMap<EndpointId, RemoteEndpoint> {
        self.endpoints.clone()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.endpoints.clear();
    }
}
