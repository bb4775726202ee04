//! Inbound signaling and transport events

use tracing::{debug, error, info, warn};

use crate::client::manager::MediaClient;
use crate::error::ClientResult;
use crate::events::ClientEvent;
use crate::signaling::{EndpointInfo, MediaEvent};
use crate::track::EndpointId;
use crate::transport::{ConnectionState, IceConnectionState, TransportEvent};

impl MediaClient {
    /// Process one inbound signaling message
    ///
    /// Messages are handled strictly in arrival order. Everything except
    /// `connected` is ignored until the local endpoint id is known.
    pub async fn handle_media_event(&self, event: MediaEvent) -> ClientResult<()> {
        let _inbound = self.inbound.lock().await;

        let connected = self.inner.lock().await.local.is_connected();
        if let MediaEvent::Connected { endpoint_id, endpoints } = event {
            return self.on_connected(endpoint_id, endpoints).await;
        }
        if !connected {
            debug!(message = event.name(), "Ignoring media event before connected");
            return Ok(());
        }

        match event {
            MediaEvent::OfferData { tracks_types } => self.on_offer_data(tracks_types).await,
            MediaEvent::SdpAnswer { sdp, mid_to_track_id } => self.on_sdp_answer(sdp, mid_to_track_id).await,
            MediaEvent::Candidate(candidate) => {
                let transport = self.inner.lock().await.transport();
                match transport {
                    Some(transport) => {
                        if let Err(e) = transport.add_ice_candidate(candidate).await {
                            error!(error = %e, "Failed to add remote ICE candidate");
                        }
                    }
                    None => warn!("Dropping remote ICE candidate without a transport"),
                }
                Ok(())
            }
            MediaEvent::TracksAdded { endpoint_id, tracks } => {
                let mut inner = self.inner.lock().await;
                if inner.is_self(&endpoint_id) {
                    return Ok(());
                }
                self.commands.mark_negotiating();
                inner.remote.add_tracks(&endpoint_id, tracks)
            }
            MediaEvent::TracksRemoved { endpoint_id, track_ids } => {
                let mut inner = self.inner.lock().await;
                if inner.is_self(&endpoint_id) {
                    return Ok(());
                }
                self.commands.mark_negotiating();
                inner.remote.remove_tracks(&track_ids)
            }
            MediaEvent::TrackUpdated { endpoint_id, track_id, metadata } => {
                let mut inner = self.inner.lock().await;
                if inner.is_self(&endpoint_id) {
                    return Ok(());
                }
                inner.remote.update_track(&track_id, metadata)
            }
            MediaEvent::EndpointAdded { endpoint_id, metadata } => {
                let mut inner = self.inner.lock().await;
                if inner.is_self(&endpoint_id) {
                    return Ok(());
                }
                inner.remote.add_endpoint(endpoint_id, metadata)
            }
            MediaEvent::EndpointUpdated { endpoint_id, metadata } => {
                let mut inner = self.inner.lock().await;
                if inner.is_self(&endpoint_id) {
                    return Ok(());
                }
                inner.remote.update_endpoint(&endpoint_id, metadata)
            }
            MediaEvent::EndpointRemoved { endpoint_id } => {
                let mut inner = self.inner.lock().await;
                if inner.is_self(&endpoint_id) {
                    info!(endpoint_id = %endpoint_id, "Local endpoint removed by the server");
                    self.teardown(&mut inner).await;
                    self.events.emit(ClientEvent::Disconnected);
                    return Ok(());
                }
                inner.remote.remove_endpoint(&endpoint_id)
            }
            MediaEvent::EnableTrackVariant { track_id, variant } => {
                self.inner.lock().await.remote.enable_encoding(&track_id, variant)
            }
            MediaEvent::DisableTrackVariant { track_id, variant } => {
                self.inner.lock().await.remote.disable_encoding(&track_id, variant)
            }
            MediaEvent::TrackVariantSwitched { endpoint_id, track_id, variant, reason } => self
                .inner
                .lock()
                .await
                .remote
                .set_track_encoding(&endpoint_id, &track_id, variant, reason),
            MediaEvent::VadNotification { track_id, status } => {
                self.inner.lock().await.remote.set_vad_status(&track_id, &status)
            }
            MediaEvent::BandwidthEstimation { estimation } => {
                self.events.emit(ClientEvent::BandwidthEstimationChanged { estimation });
                Ok(())
            }
            MediaEvent::Error { message } => {
                error!(message = %message, "Server reported an error");
                self.events.emit(ClientEvent::SignalingError { message });
                let mut inner = self.inner.lock().await;
                self.teardown(&mut inner).await;
                Ok(())
            }
            other => {
                warn!(message = other.name(), "Ignoring unexpected inbound media event");
                Ok(())
            }
        }
    }

    async fn on_connected(&self, endpoint_id: EndpointId, endpoints: Vec<EndpointInfo>) -> ClientResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.local.is_connected() {
            warn!(endpoint_id = %endpoint_id, "Ignoring repeated connected message");
            return Ok(());
        }
        inner.local.set_endpoint_id(endpoint_id.clone())?;

        for endpoint in endpoints.iter().filter(|endpoint| endpoint.id != endpoint_id) {
            if let Err(e) = inner.remote.add_roster_endpoint(endpoint.clone()) {
                warn!(endpoint_id = %endpoint.id, error = %e, "Skipping roster entry");
            }
        }

        info!(endpoint_id = %endpoint_id, peers = inner.remote.endpoint_count(), "Connected to media session");
        self.events.emit(ClientEvent::Connected { endpoint_id, endpoints });
        Ok(())
    }

    /// Process a notification of the current transport
    pub async fn handle_transport_event(&self, event: TransportEvent) -> ClientResult<()> {
        let _inbound = self.inbound.lock().await;
        self.apply_transport_event(event).await
    }

    /// Process a notification of the transport created in `generation`
    pub(crate) async fn handle_transport_event_from(&self, generation: u64, event: TransportEvent) -> ClientResult<()> {
        let _inbound = self.inbound.lock().await;
        if !self.inner.lock().await.is_current(generation) {
            debug!(generation, "Ignoring event of a previous transport");
            return Ok(());
        }
        self.apply_transport_event(event).await
    }

    async fn apply_transport_event(&self, event: TransportEvent) -> ClientResult<()> {
        match event {
            TransportEvent::LocalCandidate(candidate) => self.send(MediaEvent::Candidate(candidate)),
            TransportEvent::RemoteTrack { mid, track } => {
                self.inner.lock().await.remote.mark_ready(&mid, track)
            }
            TransportEvent::ConnectionStateChanged(state) => {
                self.inner.lock().await.connection_state = Some(state);
                debug!(state = ?state, "Connection state changed");
                self.commands.set_connection_unstable(state.is_unstable());
                if state == ConnectionState::Failed {
                    error!("Transport connection failed");
                    self.events.emit(ClientEvent::ConnectionError {
                        message: "connection failed".to_string(),
                    });
                }
                Ok(())
            }
            TransportEvent::IceConnectionStateChanged(state) => {
                debug!(state = ?state, "ICE connection state changed");
                match state {
                    IceConnectionState::Disconnected => {
                        info!("ICE disconnected, requesting renegotiation");
                        self.send(MediaEvent::RenegotiateTracks)
                    }
                    IceConnectionState::Failed => {
                        error!("ICE connection failed");
                        self.events.emit(ClientEvent::ConnectionError {
                            message: "ice connection failed".to_string(),
                        });
                        Ok(())
                    }
                    _ => Ok(()),
                }
            }
        }
    }
}
