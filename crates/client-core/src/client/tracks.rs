//! Local track commands
//!
//! Mutations that touch the transport go through the command queue so they
//! never interleave with an SDP exchange. Metadata updates and variant
//! requests for remote tracks only produce signaling and bypass it.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error};

use crate::bitrate::TrackBandwidthLimit;
use crate::client::manager::{MediaClient, SessionInner};
use crate::commands::{self, Command, CommandNotifier, CommandOutcome, ResolvePolicy};
use crate::error::{ClientError, ClientResult};
use crate::events::ClientEvent;
use crate::registry::{LocalTrack, MetadataDelivery};
use crate::signaling::MediaEvent;
use crate::track::{MediaStreamTrack, Metadata, NegotiationStatus, SimulcastConfig, TrackId, Variant};

impl MediaClient {
    /// Start sending a local track
    ///
    /// Resolves with the new track id once the renegotiation carrying the
    /// track has been answered. Fails immediately, without side effects, if
    /// the session is not connected yet.
    pub async fn add_track(
        &self,
        track: MediaStreamTrack,
        metadata: Metadata,
        simulcast_config: SimulcastConfig,
        bandwidth: TrackBandwidthLimit,
    ) -> ClientResult<TrackId> {
        let track_id = {
            let inner = self.inner.lock().await;
            inner.local.validate_new_track(&track, &simulcast_config)?;
            TrackId::generate(inner.local.endpoint_id()?)
        };

        let id = track_id.clone();
        let notifier = self.push("add_track", ResolvePolicy::AfterRenegotiation, move |client| async move {
            client.run_add_track(id, track, metadata, simulcast_config, bandwidth).await
        });
        commands::wait(notifier).await?;
        Ok(track_id)
    }

    /// Stop sending a local track
    ///
    /// Resolves once the renegotiation dropping the track has been answered,
    /// or right away if the track never reached the transport.
    pub async fn remove_track(&self, track_id: &TrackId) -> ClientResult<()> {
        self.inner.lock().await.local.track(track_id)?;

        let id = track_id.clone();
        let notifier = self.push("remove_track", ResolvePolicy::AfterRenegotiation, move |client| async move {
            client.run_remove_track(id).await
        });
        commands::wait(notifier).await
    }

    /// Swap the payload of a local track without renegotiating
    ///
    /// `None` mutes the track, a payload on a muted track unmutes it. If the
    /// transport rejects the swap the previous payload is restored and a
    /// compensating event is emitted.
    pub async fn replace_track(&self, track_id: &TrackId, payload: Option<MediaStreamTrack>) -> ClientResult<()> {
        self.inner.lock().await.local.track(track_id)?;

        let id = track_id.clone();
        let notifier = self.push("replace_track", ResolvePolicy::OnHandlerResolve, move |client| async move {
            client.run_replace_track(id, payload).await
        });
        commands::wait(notifier).await
    }

    /// Cap the total bandwidth of a local track, in kbps (`0` = unlimited)
    pub async fn set_track_bandwidth(&self, track_id: &TrackId, limit: TrackBandwidthLimit) -> ClientResult<()> {
        self.inner.lock().await.local.track(track_id)?;

        let id = track_id.clone();
        let notifier = self.push("set_track_bandwidth", ResolvePolicy::OnHandlerResolve, move |client| async move {
            client.run_set_bandwidth(id, limit).await
        });
        commands::wait(notifier).await
    }

    /// Cap one simulcast variant of a local track, in kbps
    pub async fn set_encoding_bandwidth(&self, track_id: &TrackId, variant: Variant, kbps: u32) -> ClientResult<()> {
        self.inner.lock().await.local.track(track_id)?;

        let id = track_id.clone();
        let notifier = self.push("set_encoding_bandwidth", ResolvePolicy::OnHandlerResolve, move |client| async move {
            client.run_set_encoding_bandwidth(id, variant, kbps).await
        });
        commands::wait(notifier).await
    }

    /// Resume sending a simulcast variant of a local track
    pub async fn enable_track_encoding(&self, track_id: &TrackId, variant: Variant) -> ClientResult<()> {
        self.toggle_encoding(track_id, variant, true).await
    }

    /// Stop sending a simulcast variant of a local track
    pub async fn disable_track_encoding(&self, track_id: &TrackId, variant: Variant) -> ClientResult<()> {
        self.toggle_encoding(track_id, variant, false).await
    }

    async fn toggle_encoding(&self, track_id: &TrackId, variant: Variant, enabled: bool) -> ClientResult<()> {
        self.inner.lock().await.local.check_encoding(track_id, variant)?;

        let id = track_id.clone();
        let name = if enabled { "enable_track_encoding" } else { "disable_track_encoding" };
        let notifier = self.push(name, ResolvePolicy::Immediately, move |client| async move {
            client.run_toggle_encoding(id, variant, enabled).await
        });
        commands::wait(notifier).await
    }

    /// Ask the server to forward a specific variant of a remote track
    pub async fn set_target_track_encoding(&self, track_id: &TrackId, variant: Variant) -> ClientResult<()> {
        let mut inner = self.inner.lock().await;
        inner.remote.set_target_encoding(track_id, variant)?;
        self.send(MediaEvent::SetTargetTrackVariant { track_id: track_id.clone(), variant })
    }

    pub async fn update_endpoint_metadata(&self, metadata: Metadata) -> ClientResult<()> {
        let mut inner = self.inner.lock().await;
        inner.local.set_endpoint_metadata(metadata.clone());
        self.events.emit(ClientEvent::LocalEndpointMetadataChanged { metadata: metadata.clone() });
        if inner.local.is_connected() {
            self.send(MediaEvent::UpdateEndpointMetadata { metadata })?;
        }
        Ok(())
    }

    /// Replace the metadata of a local track
    ///
    /// Negotiated tracks are updated on the server right away. While an offer
    /// carrying the track is outstanding the update is held back until the
    /// answer arrives; tracks not offered yet carry it in their first offer.
    pub async fn update_track_metadata(&self, track_id: &TrackId, metadata: Metadata) -> ClientResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.local.update_track_metadata(track_id, metadata.clone())? {
            MetadataDelivery::Immediate => {
                self.send(MediaEvent::UpdateTrackMetadata { track_id: track_id.clone(), metadata })
            }
            MetadataDelivery::Deferred => {
                debug!(track_id = %track_id, "Deferring metadata update until the answer");
                Ok(())
            }
            MetadataDelivery::NextOffer => Ok(()),
        }
    }

    /// Queue `body` as a command running against this client
    fn push<F, Fut>(&self, name: &'static str, resolve: ResolvePolicy, body: F) -> CommandNotifier
    where
        F: FnOnce(Arc<MediaClient>) -> Fut + Send + 'static,
        Fut: Future<Output = ClientResult<CommandOutcome>> + Send + 'static,
    {
        let this = self.this.clone();
        let (command, notifier) = Command::new(name, resolve, move || {
            async move {
                match this.upgrade() {
                    Some(client) => body(client).await,
                    None => Err(ClientError::SessionClosed),
                }
            }
            .boxed()
        });
        self.commands.push_command(command);
        notifier
    }

    async fn run_add_track(
        &self,
        track_id: TrackId,
        track: MediaStreamTrack,
        metadata: Metadata,
        simulcast_config: SimulcastConfig,
        bandwidth: TrackBandwidthLimit,
    ) -> ClientResult<CommandOutcome> {
        let mut inner = self.inner.lock().await;
        inner.local.add_track(track_id, track, metadata, simulcast_config, bandwidth)?;
        self.request_renegotiation()
    }

    async fn run_remove_track(&self, track_id: TrackId) -> ClientResult<CommandOutcome> {
        let mut inner = self.inner.lock().await;
        let sender = inner.local.track(&track_id)?.sender;
        let attached = match (sender, inner.transport()) {
            (Some(sender), Some(transport)) => {
                if let Err(e) = transport.remove_sender(sender).await {
                    error!(track_id = %track_id, error = %e, "Failed to detach sender, keeping track");
                    return Err(e);
                }
                true
            }
            _ => false,
        };

        inner.local.remove_track(&track_id)?;
        if attached {
            self.request_renegotiation()
        } else {
            Ok(CommandOutcome::Completed)
        }
    }

    async fn run_replace_track(
        &self,
        track_id: TrackId,
        payload: Option<MediaStreamTrack>,
    ) -> ClientResult<CommandOutcome> {
        let mut inner = self.inner.lock().await;
        let replacement = inner.local.begin_replace(&track_id, payload.clone())?;
        let (Some(sender), Some(transport)) = (replacement.sender, inner.transport()) else {
            return Ok(CommandOutcome::Completed);
        };
        if let Err(e) = transport.replace_sender_track(sender, payload.as_ref()).await {
            error!(track_id = %track_id, error = %e, "Failed to replace sender track");
            inner.local.rollback_replace(&track_id, replacement)?;
            return Err(e);
        }
        Ok(CommandOutcome::Completed)
    }

    async fn run_set_bandwidth(&self, track_id: TrackId, limit: TrackBandwidthLimit) -> ClientResult<CommandOutcome> {
        let mut inner = self.inner.lock().await;
        let track = inner.local.set_bandwidth(&track_id, limit)?.clone();
        self.apply_bandwidth(&inner, &track).await?;
        Ok(CommandOutcome::Completed)
    }

    async fn run_set_encoding_bandwidth(&self, track_id: TrackId, variant: Variant, kbps: u32) -> ClientResult<CommandOutcome> {
        let mut inner = self.inner.lock().await;
        let track = inner.local.set_encoding_bandwidth(&track_id, variant, kbps)?.clone();
        self.apply_bandwidth(&inner, &track).await?;
        Ok(CommandOutcome::Completed)
    }

    async fn run_toggle_encoding(&self, track_id: TrackId, variant: Variant, enabled: bool) -> ClientResult<CommandOutcome> {
        let mut inner = self.inner.lock().await;
        let track = inner.local.set_encoding_enabled(&track_id, variant, enabled)?.clone();
        self.apply_encodings(&inner, &track).await?;
        let event = if enabled {
            MediaEvent::EnableTrackVariant { track_id, variant }
        } else {
            MediaEvent::DisableTrackVariant { track_id, variant }
        };
        self.send(event)?;
        Ok(CommandOutcome::Completed)
    }

    /// Ask the server for a new offer cycle; an offer still being built
    /// does not carry the change
    fn request_renegotiation(&self) -> ClientResult<CommandOutcome> {
        let offer_seq = self.commands.change_baseline();
        self.send(MediaEvent::RenegotiateTracks)?;
        Ok(CommandOutcome::RenegotiationRequested { offer_seq })
    }

    /// Push new sender encodings and announce the new bitrates
    async fn apply_bandwidth(&self, inner: &SessionInner, track: &LocalTrack) -> ClientResult<()> {
        self.apply_encodings(inner, track).await?;
        if track.negotiation != NegotiationStatus::Awaiting {
            self.send(MediaEvent::TrackBitrates {
                track_id: track.track_id.clone(),
                bitrates: track.bitrates(&self.config.default_bitrates),
            })?;
        }
        Ok(())
    }

    async fn apply_encodings(&self, inner: &SessionInner, track: &LocalTrack) -> ClientResult<()> {
        let (Some(sender), Some(transport)) = (track.sender, inner.transport()) else {
            return Ok(());
        };
        transport
            .set_encoding_parameters(sender, track.encodings())
            .await
            .map_err(|e| {
                error!(track_id = %track.track_id, error = %e, "Failed to apply encoding parameters");
                e
            })
    }
}
