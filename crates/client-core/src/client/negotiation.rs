//! Transport lifecycle and the offer/answer cycle

use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::client::manager::{ActiveTransport, MediaClient, SessionInner};
use crate::error::ClientResult;
use crate::signaling::{MediaEvent, TrackCounts};
use crate::track::{TrackId, TrackKind};
use crate::transport::{SessionDescription, Transport};

impl MediaClient {
    /// Return the transport of the current connection, creating it on first use
    pub(crate) async fn ensure_transport(&self, inner: &mut SessionInner) -> ClientResult<Arc<dyn Transport>> {
        if let Some(transport) = inner.transport() {
            return Ok(transport);
        }

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let transport = self.factory.create(events_tx).await?;

        inner.generation += 1;
        let generation = inner.generation;
        let client = self.this.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let Some(client) = client.upgrade() else { break };
                if let Err(e) = client.handle_transport_event_from(generation, event).await {
                    warn!(error = %e, "Failed to handle transport event");
                }
            }
        });

        info!(generation, "Transport created");
        inner.connection = Some(ActiveTransport { transport: transport.clone(), generation, pump });
        Ok(transport)
    }

    /// Attach a sender for every local track that has none yet
    async fn attach_pending_senders(&self, inner: &mut SessionInner, transport: &Arc<dyn Transport>) -> ClientResult<()> {
        for track in inner.local.unattached() {
            let sender = transport
                .add_sender(track.kind, track.track.as_ref(), track.encodings())
                .await?;
            debug!(track_id = %track.track_id, sender = %sender, "Sender attached");
            inner.local.attach_sender(&track.track_id, sender)?;
        }
        Ok(())
    }

    /// The server asked for a new offer
    ///
    /// A failure rejects the command waiting for this renegotiation instead
    /// of leaving the queue blocked.
    pub(crate) async fn on_offer_data(&self, counts: TrackCounts) -> ClientResult<()> {
        self.create_and_send_offer(counts).await.map_err(|e| {
            error!(error = %e, "Failed to produce local offer");
            self.commands.fail_renegotiation(e.clone());
            e
        })
    }

    async fn create_and_send_offer(&self, counts: TrackCounts) -> ClientResult<()> {
        let (transport, generation) = {
            let mut inner = self.inner.lock().await;
            self.commands.begin_offer();
            let transport = self.ensure_transport(&mut inner).await?;
            self.attach_pending_senders(&mut inner, &transport).await?;
            transport.ensure_receive_only(TrackKind::Audio, counts.audio).await?;
            transport.ensure_receive_only(TrackKind::Video, counts.video).await?;
            (transport, inner.generation)
        };

        let offer = transport.create_offer().await;

        let mut inner = self.inner.lock().await;
        if !inner.is_current(generation) {
            debug!(generation, "Transport replaced while creating offer, dropping it");
            return Ok(());
        }
        let offer = offer?;

        transport.set_local_description(offer.clone()).await?;
        let lines = transport.media_lines().await;
        inner.local.assign_media_lines(&lines);
        inner.local.mark_offered();

        let event = MediaEvent::SdpOffer {
            sdp_offer: offer,
            track_id_to_track_metadata: inner.local.offer_metadata(),
            track_id_to_track_bitrates: inner.local.offer_bitrates(&self.config.default_bitrates),
            mid_to_track_id: inner.local.mid_to_track_id(),
        };
        self.commands.on_offer_sent();
        debug!(offer = self.commands.offer_seq(), "Local offer created");
        self.send(event)
    }

    /// Apply the server's answer to the outstanding offer
    pub(crate) async fn on_sdp_answer(&self, sdp: String, mid_to_track_id: IndexMap<String, TrackId>) -> ClientResult<()> {
        let mut inner = self.inner.lock().await;

        match inner.transport() {
            Some(transport) => {
                if let Err(e) = transport.set_remote_description(SessionDescription::answer(sdp)).await {
                    error!(error = %e, "Failed to apply remote answer");
                }
            }
            None => warn!("Received an answer without a transport"),
        }

        inner.remote.apply_media_lines(&mid_to_track_id);
        let deferred = inner.local.confirm_answer();
        let mut result = Ok(());
        for (track_id, metadata) in deferred {
            debug!(track_id = %track_id, "Sending deferred track metadata");
            if let Err(e) = self.send(MediaEvent::UpdateTrackMetadata { track_id, metadata }) {
                result = Err(e);
            }
        }
        drop(inner);

        self.commands.process_next_command();
        result
    }
}
