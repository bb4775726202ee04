//! The session orchestrator
//!
//! [`MediaClient`] owns the transport of the current connection, the two
//! registries, the command queue and the outbound queues. Its operations are
//! split across this module and its siblings:
//!
//! - `manager` - lifecycle, queries, outbound delivery
//! - `tracks` - local track commands
//! - `dispatch` - inbound signaling and transport events
//! - `negotiation` - transport creation, offers and answers
//!
//! # Locking
//!
//! Two tokio mutexes guard the state. `inbound` serializes inbound signaling
//! and transport events so they are processed strictly in arrival order.
//! `inner` guards the session state itself. When both are needed, `inbound`
//! is taken first. Offer creation releases `inner` while the transport builds
//! the offer, so a concurrent [`MediaClient::disconnect`] can tear the
//! transport down; the offer is then dropped.

use std::sync::{Arc, Mutex as StdMutex, Weak};

use bytes::Bytes;
use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::client::config::ClientConfig;
use crate::commands::CommandQueue;
use crate::delivery::{DeliveryClass, DeliveryPolicy, OutboundQueue, ReconnectGate};
use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, EventEmitter};
use crate::registry::{LocalEndpoint, LocalRegistry, LocalTrack, RemoteEndpoint, RemoteRegistry, RemoteTrack};
use crate::signaling::MediaEvent;
use crate::track::{EndpointId, Metadata, TrackId};
use crate::transport::{ConnectionState, Transport, TransportFactory};

/// Transport of the current connection
pub(crate) struct ActiveTransport {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) generation: u64,
    pub(crate) pump: JoinHandle<()>,
}

/// State guarded by the `inner` lock
pub(crate) struct SessionInner {
    pub(crate) local: LocalRegistry,
    pub(crate) remote: RemoteRegistry,
    pub(crate) connection: Option<ActiveTransport>,
    /// Bumped whenever a transport is created or torn down
    pub(crate) generation: u64,
    pub(crate) connection_state: Option<ConnectionState>,
}

impl SessionInner {
    pub(crate) fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.connection.as_ref().map(|active| active.transport.clone())
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.connection.as_ref().map(|active| active.generation) == Some(generation)
    }

    /// Whether `endpoint_id` is the local endpoint
    pub(crate) fn is_self(&self, endpoint_id: &EndpointId) -> bool {
        self.local.endpoint_id().map(|id| id == endpoint_id).unwrap_or(false)
    }
}

/// Counters describing the current session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub connected: bool,
    pub negotiating: bool,
    pub has_transport: bool,
    pub local_tracks: usize,
    pub remote_endpoints: usize,
    pub remote_tracks: usize,
    pub pending_commands: usize,
    pub buffered_outbound: usize,
    pub offers_sent: u64,
}

/// Client-side negotiation engine for one media session
pub struct MediaClient {
    pub(crate) config: ClientConfig,
    pub(crate) factory: Arc<dyn TransportFactory>,
    pub(crate) events: EventEmitter,
    pub(crate) commands: Arc<CommandQueue>,
    pub(crate) control: Arc<OutboundQueue>,
    pub(crate) sync: Arc<OutboundQueue>,
    pub(crate) gate: ReconnectGate,
    outbound: StdMutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    pub(crate) inbound: Mutex<()>,
    pub(crate) inner: Mutex<SessionInner>,
    pub(crate) this: Weak<MediaClient>,
}

impl MediaClient {
    /// Create a client; see also [`ClientBuilder`](crate::ClientBuilder)
    pub fn new(config: ClientConfig, factory: Arc<dyn TransportFactory>) -> ClientResult<Arc<Self>> {
        config.validate()?;

        let events = EventEmitter::new(config.event_channel_capacity);
        let gate = ReconnectGate::default();
        let (sink, outbound) = mpsc::unbounded_channel();
        let control = OutboundQueue::new(
            "control",
            DeliveryPolicy::Backoff(config.control_retry.clone()),
            gate.clone(),
            sink.clone(),
        );
        let sync = OutboundQueue::new("sync", DeliveryPolicy::Passive, gate.clone(), sink);

        Ok(Arc::new_cyclic(|this| Self {
            inner: Mutex::new(SessionInner {
                local: LocalRegistry::new(events.clone()),
                remote: RemoteRegistry::new(events.clone()),
                connection: None,
                generation: 0,
                connection_state: None,
            }),
            config,
            factory,
            events,
            commands: CommandQueue::new(),
            control,
            sync,
            gate,
            outbound: StdMutex::new(Some(outbound)),
            inbound: Mutex::new(()),
            this: this.clone(),
        }))
    }

    /// Subscribe to session notifications
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Take the stream of encoded messages to forward to the server
    ///
    /// There is a single receiver; later calls return `None`. Messages sent
    /// before the receiver is taken wait in the channel.
    pub fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.outbound.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Ask the server to join the session
    ///
    /// The session is established once the server's `connected` message has
    /// been fed to [`MediaClient::receive_media_event`].
    pub async fn connect(&self, metadata: Metadata) -> ClientResult<()> {
        let mut inner = self.inner.lock().await;
        if let Ok(endpoint_id) = inner.local.endpoint_id() {
            return Err(ClientError::AlreadyConnected { endpoint_id: endpoint_id.clone() });
        }
        inner.local.set_endpoint_metadata(metadata.clone());
        info!("Connecting to media session");
        self.send(MediaEvent::Connect { metadata })
    }

    /// Leave the session and tear everything down
    pub async fn disconnect(&self) -> ClientResult<()> {
        let mut inner = self.inner.lock().await;
        self.send(MediaEvent::Disconnect)?;
        self.teardown(&mut inner).await;
        info!("Disconnected from media session");
        Ok(())
    }

    /// Tear the session down without telling the server
    ///
    /// Pending commands are abandoned and their callers receive
    /// [`ClientError::SessionClosed`]. Buffered outbound messages are dropped.
    pub async fn clean_up(&self) {
        let mut inner = self.inner.lock().await;
        self.teardown(&mut inner).await;
        self.control.clear();
        self.sync.clear();
        debug!("Session cleaned up");
    }

    /// Feed one encoded inbound signaling message
    pub async fn receive_media_event(&self, bytes: &[u8]) -> ClientResult<()> {
        let event = MediaEvent::decode(bytes)?;
        self.handle_media_event(event).await
    }

    /// Report whether the signaling channel is reconnecting
    ///
    /// Outbound messages are buffered while it is; both queues are flushed
    /// once it is not.
    pub fn set_reconnecting(&self, reconnecting: bool) {
        self.gate.set_reconnecting(reconnecting);
        if !reconnecting {
            self.flush_outbound();
        }
    }

    pub fn is_reconnecting(&self) -> bool {
        self.gate.is_reconnecting()
    }

    /// Re-drive both outbound queues
    pub fn flush_outbound(&self) {
        self.control.flush();
        self.sync.flush();
    }

    pub async fn remote_tracks(&self) -> IndexMap<TrackId, RemoteTrack> {
        self.inner.lock().await.remote.tracks()
    }

    pub async fn remote_endpoints(&self) -> IndexMap<EndpointId, RemoteEndpoint> {
        self.inner.lock().await.remote.endpoints()
    }

    pub async fn local_endpoint(&self) -> LocalEndpoint {
        self.inner.lock().await.local.local_endpoint()
    }

    pub async fn local_tracks(&self) -> IndexMap<TrackId, LocalTrack> {
        self.inner.lock().await.local.tracks()
    }

    pub async fn session_stats(&self) -> SessionStats {
        let inner = self.inner.lock().await;
        SessionStats {
            connected: inner.local.is_connected(),
            negotiating: self.commands.is_negotiating(),
            has_transport: inner.connection.is_some(),
            local_tracks: inner.local.track_count(),
            remote_endpoints: inner.remote.endpoint_count(),
            remote_tracks: inner.remote.track_count(),
            pending_commands: self.commands.pending_len(),
            buffered_outbound: self.control.buffered() + self.sync.buffered(),
            offers_sent: self.commands.offer_seq(),
        }
    }

    /// Encode a message and hand it to its outbound queue
    pub(crate) fn send(&self, event: MediaEvent) -> ClientResult<()> {
        let payload: Bytes = event.encode()?;
        debug!(message = event.name(), "Sending media event");
        match event.delivery_class() {
            DeliveryClass::Control => self.control.enqueue(payload),
            DeliveryClass::StateSync => self.sync.enqueue(payload),
        }
        Ok(())
    }

    /// Reset the session: close the transport, forget all state and abandon commands
    pub(crate) async fn teardown(&self, inner: &mut SessionInner) {
        if let Some(active) = inner.connection.take() {
            active.pump.abort();
            active.transport.close().await;
        }
        inner.generation += 1;
        inner.connection_state = None;
        inner.local.clear();
        inner.remote.clear();
        self.commands.clean_up();
    }
}

impl std::fmt::Debug for MediaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaClient")
            .field("config", &self.config)
            .field("commands", &self.commands)
            .field("control", &self.control)
            .field("sync", &self.sync)
            .finish()
    }
}
