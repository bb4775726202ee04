//! Locally originated tracks and the local endpoint
//!
//! The registry is the single source of truth for what the local endpoint
//! sends. It also builds the per-offer artifacts: the track metadata map, the
//! bitrate map and the media line to track mapping.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use crate::bitrate::{self, BandwidthAllocation, DefaultBitrates, TrackBandwidthLimit, TrackBitrates};
use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, EventEmitter};
use crate::track::{
    EndpointId, MediaLine, MediaStreamTrack, Metadata, NegotiationStatus, SenderId, SimulcastConfig,
    TrackId, TrackKind, Variant,
};
use crate::transport::{EncodingParameters, MediaLineInfo};

/// A track sent by the local endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct LocalTrack {
    pub track_id: TrackId,
    pub kind: TrackKind,
    /// Current payload, `None` while muted
    pub track: Option<MediaStreamTrack>,
    pub metadata: Metadata,
    pub simulcast_config: SimulcastConfig,
    pub negotiation: NegotiationStatus,
    pub media_line: MediaLine,
    pub sender: Option<SenderId>,
    pub bandwidth: TrackBandwidthLimit,
    pub disabled_encodings: BTreeSet<Variant>,
    metadata_update_pending: bool,
}

impl LocalTrack {
    /// Per-encoding caps derived from the requested limit
    pub fn allocation(&self) -> BandwidthAllocation {
        BandwidthAllocation::from_limit(&self.simulcast_config, &self.bandwidth, &self.disabled_encodings)
    }

    /// Sender encodings reflecting the current caps and enabled variants
    pub fn encodings(&self) -> Vec<EncodingParameters> {
        bitrate::encoding_parameters(&self.simulcast_config, &self.allocation(), &self.disabled_encodings)
    }

    pub fn bitrates(&self, defaults: &DefaultBitrates) -> TrackBitrates {
        bitrate::offer_bitrates(self.kind, &self.simulcast_config, &self.allocation(), defaults)
    }
}

/// Snapshot of the local endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct LocalEndpoint {
    /// Unset until the server confirms the session
    pub id: Option<EndpointId>,
    pub metadata: Metadata,
    pub tracks: IndexSet<TrackId>,
}

/// How a payload swap is classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceKind {
    Mute,
    Unmute,
    Replace,
}

/// A payload swap applied to the registry, kept for rollback
#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
    pub kind: ReplaceKind,
    pub previous: Option<MediaStreamTrack>,
    pub sender: Option<SenderId>,
}

/// When a metadata change reaches the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataDelivery {
    /// The track is negotiated; send an update now
    Immediate,
    /// An offer carrying the track is outstanding; send once it is answered
    Deferred,
    /// The next offer carries the new metadata
    NextOffer,
}

#[derive(Debug)]
pub struct LocalRegistry {
    endpoint_id: Option<EndpointId>,
    metadata: Metadata,
    tracks: IndexMap<TrackId, LocalTrack>,
    events: EventEmitter,
}

impl LocalRegistry {
    pub fn new(events: EventEmitter) -> Self {
        Self { endpoint_id: None, metadata: None, tracks: IndexMap::new(), events }
    }

    pub fn endpoint_id(&self) -> ClientResult<&EndpointId> {
        self.endpoint_id.as_ref().ok_or(ClientError::NotConnected)
    }

    pub fn is_connected(&self) -> bool {
        self.endpoint_id.is_some()
    }

    /// Record the server-assigned id; it never changes afterwards
    pub fn set_endpoint_id(&mut self, endpoint_id: EndpointId) -> ClientResult<()> {
        match &self.endpoint_id {
            Some(current) if *current == endpoint_id => Ok(()),
            Some(current) => Err(ClientError::LocalEndpointAlreadyAssigned {
                current: current.clone(),
                requested: endpoint_id,
            }),
            None => {
                self.endpoint_id = Some(endpoint_id);
                Ok(())
            }
        }
    }

    pub fn set_endpoint_metadata(&mut self, metadata: Metadata) {
        self.metadata = metadata;
    }

    /// Reject a track that cannot be added in the current state
    pub fn validate_new_track(&self, track: &MediaStreamTrack, simulcast: &SimulcastConfig) -> ClientResult<()> {
        self.endpoint_id()?;
        let track_id = TrackId::from(track.id.as_str());
        if simulcast.enabled {
            if track.kind == TrackKind::Audio {
                return Err(ClientError::invalid_track(&track_id, "simulcast is only supported for video"));
            }
            if simulcast.active_encodings.is_empty() {
                return Err(ClientError::invalid_track(&track_id, "simulcast needs at least one encoding"));
            }
        }
        Ok(())
    }

    pub fn add_track(
        &mut self,
        track_id: TrackId,
        track: MediaStreamTrack,
        metadata: Metadata,
        simulcast_config: SimulcastConfig,
        bandwidth: TrackBandwidthLimit,
    ) -> ClientResult<()> {
        self.validate_new_track(&track, &simulcast_config)?;
        if self.tracks.contains_key(&track_id) {
            return Err(ClientError::invalid_track(&track_id, "track id already in use"));
        }

        let kind = track.kind;
        let local = LocalTrack {
            track_id: track_id.clone(),
            kind,
            track: Some(track),
            metadata: metadata.clone(),
            simulcast_config: simulcast_config.clone(),
            negotiation: NegotiationStatus::Awaiting,
            media_line: MediaLine::Unassigned,
            sender: None,
            bandwidth,
            disabled_encodings: BTreeSet::new(),
            metadata_update_pending: false,
        };
        self.tracks.insert(track_id.clone(), local);

        debug!(track_id = %track_id, kind = %kind, "Local track added");
        self.events.emit(ClientEvent::LocalTrackAdded { track_id, kind, metadata, simulcast_config });
        Ok(())
    }

    pub fn remove_track(&mut self, track_id: &TrackId) -> ClientResult<LocalTrack> {
        let track = self
            .tracks
            .shift_remove(track_id)
            .ok_or_else(|| ClientError::track_not_found(track_id))?;
        debug!(track_id = %track_id, "Local track removed");
        self.events.emit(ClientEvent::LocalTrackRemoved { track_id: track_id.clone() });
        Ok(track)
    }

    pub fn track(&self, track_id: &TrackId) -> ClientResult<&LocalTrack> {
        self.tracks.get(track_id).ok_or_else(|| ClientError::track_not_found(track_id))
    }

    fn track_mut(&mut self, track_id: &TrackId) -> ClientResult<&mut LocalTrack> {
        self.tracks.get_mut(track_id).ok_or_else(|| ClientError::track_not_found(track_id))
    }

    /// Tracks that still need a transport sender
    pub fn unattached(&self) -> Vec<LocalTrack> {
        self.tracks.values().filter(|track| track.sender.is_none()).cloned().collect()
    }

    pub fn attach_sender(&mut self, track_id: &TrackId, sender: SenderId) -> ClientResult<()> {
        self.track_mut(track_id)?.sender = Some(sender);
        Ok(())
    }

    /// Swap the payload of a track and announce the transition
    pub fn begin_replace(
        &mut self,
        track_id: &TrackId,
        payload: Option<MediaStreamTrack>,
    ) -> ClientResult<Replacement> {
        let track = self.track_mut(track_id)?;
        if let Some(new) = &payload {
            if new.kind != track.kind {
                return Err(ClientError::invalid_track(
                    track_id,
                    format!("cannot replace {} track with {} payload", track.kind, new.kind),
                ));
            }
        }

        let kind = match (&track.track, &payload) {
            (Some(_), None) => ReplaceKind::Mute,
            (None, Some(_)) => ReplaceKind::Unmute,
            _ => ReplaceKind::Replace,
        };
        let previous = std::mem::replace(&mut track.track, payload.clone());
        let replacement = Replacement { kind, previous, sender: track.sender };

        let event = match kind {
            ReplaceKind::Mute => ClientEvent::LocalTrackMuted { track_id: track_id.clone() },
            ReplaceKind::Unmute => ClientEvent::LocalTrackUnmuted { track_id: track_id.clone() },
            ReplaceKind::Replace => ClientEvent::LocalTrackReplaced { track_id: track_id.clone(), track: payload },
        };
        self.events.emit(event);
        Ok(replacement)
    }

    /// Undo a swap whose transport side failed
    pub fn rollback_replace(&mut self, track_id: &TrackId, replacement: Replacement) -> ClientResult<()> {
        let track = self.track_mut(track_id)?;
        track.track = replacement.previous.clone();

        let event = match replacement.kind {
            ReplaceKind::Mute => ClientEvent::LocalTrackUnmuted { track_id: track_id.clone() },
            ReplaceKind::Unmute => ClientEvent::LocalTrackMuted { track_id: track_id.clone() },
            ReplaceKind::Replace => ClientEvent::LocalTrackReplaced {
                track_id: track_id.clone(),
                track: replacement.previous,
            },
        };
        debug!(track_id = %track_id, kind = ?replacement.kind, "Rolled back payload swap");
        self.events.emit(event);
        Ok(())
    }

    pub fn update_track_metadata(&mut self, track_id: &TrackId, metadata: Metadata) -> ClientResult<MetadataDelivery> {
        let track = self.track_mut(track_id)?;
        track.metadata = metadata.clone();
        let delivery = match track.negotiation {
            NegotiationStatus::Done => MetadataDelivery::Immediate,
            NegotiationStatus::Offered => {
                track.metadata_update_pending = true;
                MetadataDelivery::Deferred
            }
            NegotiationStatus::Awaiting => MetadataDelivery::NextOffer,
        };
        self.events.emit(ClientEvent::LocalTrackMetadataChanged { track_id: track_id.clone(), metadata });
        Ok(delivery)
    }

    /// Replace the whole bandwidth limit of a track
    pub fn set_bandwidth(&mut self, track_id: &TrackId, limit: TrackBandwidthLimit) -> ClientResult<&LocalTrack> {
        let track = self.track_mut(track_id)?;
        track.bandwidth = limit.clone();
        self.events.emit(ClientEvent::LocalTrackBandwidthSet { track_id: track_id.clone(), limit });
        self.track(track_id)
    }

    /// Cap a single simulcast variant, keeping the caps of the others
    pub fn set_encoding_bandwidth(
        &mut self,
        track_id: &TrackId,
        variant: Variant,
        kbps: u32,
    ) -> ClientResult<&LocalTrack> {
        let track = self.track_mut(track_id)?;
        if !track.simulcast_config.supports(variant) {
            return Err(ClientError::VariantNotAvailable { track_id: track_id.clone(), variant });
        }

        let mut caps: BTreeMap<Variant, u32> = match track.allocation() {
            BandwidthAllocation::Simulcast(caps) => caps
                .into_iter()
                .filter_map(|(variant, kbps)| kbps.map(|kbps| (variant, kbps)))
                .collect(),
            BandwidthAllocation::Single(_) => BTreeMap::new(),
        };
        caps.insert(variant, kbps);
        track.bandwidth = TrackBandwidthLimit::PerVariant(caps);

        self.events.emit(ClientEvent::LocalTrackEncodingBandwidthSet {
            track_id: track_id.clone(),
            variant,
            kbps,
        });
        self.track(track_id)
    }

    /// Check that a variant of a track can be toggled right now
    pub fn check_encoding(&self, track_id: &TrackId, variant: Variant) -> ClientResult<SenderId> {
        let track = self.track(track_id)?;
        if !track.simulcast_config.supports(variant) {
            return Err(ClientError::VariantNotAvailable { track_id: track_id.clone(), variant });
        }
        track.sender.ok_or_else(|| ClientError::NoActiveSender { track_id: track_id.clone() })
    }

    pub fn set_encoding_enabled(
        &mut self,
        track_id: &TrackId,
        variant: Variant,
        enabled: bool,
    ) -> ClientResult<&LocalTrack> {
        self.check_encoding(track_id, variant)?;
        let track = self.track_mut(track_id)?;
        let event = if enabled {
            track.disabled_encodings.remove(&variant);
            ClientEvent::LocalTrackEncodingEnabled { track_id: track_id.clone(), variant }
        } else {
            track.disabled_encodings.insert(variant);
            ClientEvent::LocalTrackEncodingDisabled { track_id: track_id.clone(), variant }
        };
        self.events.emit(event);
        self.track(track_id)
    }

    /// Track metadata to announce in an offer
    pub fn offer_metadata(&self) -> IndexMap<TrackId, Metadata> {
        self.tracks
            .iter()
            .map(|(id, track)| (id.clone(), track.metadata.clone()))
            .collect()
    }

    /// Track bitrates to announce in an offer
    pub fn offer_bitrates(&self, defaults: &DefaultBitrates) -> IndexMap<TrackId, TrackBitrates> {
        self.tracks
            .iter()
            .map(|(id, track)| (id.clone(), track.bitrates(defaults)))
            .collect()
    }

    /// Media line to track mapping covering negotiated and freshly assigned lines
    pub fn mid_to_track_id(&self) -> IndexMap<String, TrackId> {
        self.tracks
            .iter()
            .filter_map(|(id, track)| track.media_line.mid().map(|mid| (mid.to_string(), id.clone())))
            .collect()
    }

    /// Pick up the media line ids the transport assigned to new senders
    pub fn assign_media_lines(&mut self, lines: &[MediaLineInfo]) {
        for track in self.tracks.values_mut() {
            if track.media_line != MediaLine::Unassigned {
                continue;
            }
            let Some(sender) = track.sender else { continue };
            let mid = lines
                .iter()
                .find(|line| line.sender == Some(sender))
                .and_then(|line| line.mid.clone());
            if let Some(mid) = mid {
                track.media_line = MediaLine::Pending(mid);
            }
        }
    }

    /// Tracks with a sender are now part of the outstanding offer
    pub fn mark_offered(&mut self) {
        for track in self.tracks.values_mut() {
            if track.negotiation == NegotiationStatus::Awaiting && track.sender.is_some() {
                track.negotiation = NegotiationStatus::Offered;
            }
        }
    }

    /// The outstanding offer was answered
    ///
    /// Returns the metadata updates that were deferred meanwhile, one per track.
    pub fn confirm_answer(&mut self) -> Vec<(TrackId, Metadata)> {
        let mut deferred = Vec::new();
        for (track_id, track) in self.tracks.iter_mut() {
            if track.negotiation == NegotiationStatus::Offered {
                track.negotiation = NegotiationStatus::Done;
            }
            if let MediaLine::Pending(mid) = &track.media_line {
                track.media_line = MediaLine::Negotiated(mid.clone());
            }
            if track.negotiation == NegotiationStatus::Done && track.metadata_update_pending {
                track.metadata_update_pending = false;
                deferred.push((track_id.clone(), track.metadata.clone()));
            }
        }
        deferred
    }

    pub fn local_endpoint(&self) -> LocalEndpoint {
        LocalEndpoint {
            id: self.endpoint_id.clone(),
            metadata: self.metadata.clone(),
            tracks: self.tracks.keys().cloned().collect(),
        }
    }

    pub fn tracks(&self) -> IndexMap<TrackId, LocalTrack> {
        self.tracks.clone()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Forget everything, including the endpoint id
    pub fn clear(&mut self) {
        self.endpoint_id = None;
        self.tracks.clear();
    }
}
