//! # Meshroom Client Core
//!
//! Client-side negotiation engine for SFU media sessions.
//!
//! The crate sits between an application, a signaling channel and a peer
//! connection. The application feeds inbound signaling messages to
//! [`MediaClient::receive_media_event`] and forwards every payload from
//! [`MediaClient::take_outbound`] to the server. The peer connection itself is
//! abstracted behind the [`Transport`] trait.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              Application                │
//! └───────┬─────────────────────▲───────────┘
//!         │ commands / inbound  │ ClientEvent, outbound bytes
//! ┌───────▼─────────────────────┴───────────┐
//! │              MediaClient                │
//! │  CommandQueue · Local/RemoteRegistry    │
//! │  OutboundQueue (control, sync)          │
//! └───────┬─────────────────────────────────┘
//!         │ Transport trait
//! ┌───────▼─────────────────────────────────┐
//! │         Peer connection (WebRTC)        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshroom_client_core::{ClientBuilder, TransportFactory};
//!
//! # async fn example(factory: Arc<dyn TransportFactory>) -> meshroom_client_core::ClientResult<()> {
//! let client = ClientBuilder::new().transport_factory(factory).build()?;
//! let mut outbound = client.take_outbound().expect("outbound stream not taken yet");
//!
//! client.connect(Some(serde_json::json!({ "name": "alice" }))).await?;
//!
//! while let Some(payload) = outbound.recv().await {
//!     // forward `payload` over the signaling channel
//!     let _ = payload;
//! }
//! # Ok(())
//! # }
//! ```

pub mod bitrate;
pub mod client;
pub mod commands;
pub mod delivery;
pub mod error;
pub mod events;
pub mod registry;
pub mod signaling;
pub mod track;
pub mod transport;

pub use bitrate::{DefaultBitrates, TrackBandwidthLimit, TrackBitrates};
pub use client::{ClientBuilder, ClientConfig, MediaClient, SessionStats};
pub use delivery::RetryConfig;
pub use error::{ClientError, ClientResult};
pub use events::{ClientEvent, EventFilter, EventPriority};
pub use registry::{LocalEndpoint, LocalTrack, RemoteEndpoint, RemoteTrack};
pub use signaling::{EndpointInfo, MediaEvent, TrackCounts, TrackInfo};
pub use track::{
    EncodingReason, EndpointId, MediaLine, MediaStreamTrack, Metadata, NegotiationStatus, SenderId,
    SimulcastConfig, TrackId, TrackKind, VadStatus, Variant,
};
pub use transport::{
    ConnectionState, Direction, EncodingParameters, IceCandidate, IceConnectionState, MediaLineInfo,
    SdpType, SessionDescription, Transport, TransportEvent, TransportFactory,
};
