//! Fluent construction of a [`MediaClient`]

use std::sync::Arc;

use crate::bitrate::DefaultBitrates;
use crate::client::config::ClientConfig;
use crate::client::manager::MediaClient;
use crate::delivery::RetryConfig;
use crate::error::{ClientError, ClientResult};
use crate::transport::TransportFactory;

/// Builder for [`MediaClient`]
///
/// A transport factory is mandatory; everything else falls back to
/// [`ClientConfig::default`].
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use tokio::sync::mpsc;
/// use meshroom_client_core::{
///     ClientBuilder, ClientError, ClientResult, Transport, TransportEvent, TransportFactory,
/// };
///
/// struct Unavailable;
///
/// #[async_trait]
/// impl TransportFactory for Unavailable {
///     async fn create(
///         &self,
///         _events: mpsc::UnboundedSender<TransportEvent>,
///     ) -> ClientResult<Arc<dyn Transport>> {
///         Err(ClientError::TransportUnavailable)
///     }
/// }
///
/// let client = ClientBuilder::new()
///     .transport_factory(Arc::new(Unavailable))
///     .event_channel_capacity(64)
///     .build()
///     .unwrap();
/// let local = tokio_test::block_on(client.local_endpoint());
/// assert!(local.id.is_none());
///
/// assert!(ClientBuilder::new().build().is_err());
/// ```
pub struct ClientBuilder {
    config: ClientConfig,
    factory: Option<Arc<dyn TransportFactory>>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self { config: ClientConfig::default(), factory: None }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the factory creating one transport per connection
    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.event_channel_capacity = capacity;
        self
    }

    pub fn control_retry(mut self, retry: RetryConfig) -> Self {
        self.config.control_retry = retry;
        self
    }

    pub fn default_bitrates(mut self, bitrates: DefaultBitrates) -> Self {
        self.config.default_bitrates = bitrates;
        self
    }

    /// Validate the configuration and create the client
    pub fn build(self) -> ClientResult<Arc<MediaClient>> {
        let factory = self.factory.ok_or_else(|| ClientError::MissingConfiguration {
            field: "transport_factory".to_string(),
        })?;
        MediaClient::new(self.config, factory)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
