//! Session factory for the Gemini Live API.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use live_relay_core::{LiveConnectConfig, LiveSession, SessionError, SessionFactory};
use url::Url;

use crate::{
    session::GeminiSession,
    wire::{ClientMessage, Setup},
};

/// Production endpoint.
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com";

/// API version used when none is configured.
pub const DEFAULT_API_VERSION: &str = "v1beta";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Credentials and endpoint settings.
#[derive(Clone)]
pub struct ClientConfig {
    pub api_key: String,
    /// Websocket base URL, e.g. `wss://generativelanguage.googleapis.com`.
    pub endpoint: String,
    pub api_version: String,
    /// Upper bound for the websocket handshake plus session setup.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Config for the production endpoint.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("api_version", &self.api_version)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Opens [`GeminiSession`]s.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    config: ClientConfig,
}

impl GeminiClient {
    #[must_use]
    pub const fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Websocket URL of the `BidiGenerateContent` service, key included.
    ///
    /// # Errors
    /// Returns error if the configured endpoint is not a valid URL.
    pub fn service_url(&self) -> Result<Url, SessionError> {
        let base = self.config.endpoint.trim_end_matches('/');
        let mut url = Url::parse(&format!(
            "{base}/ws/google.ai.generativelanguage.{}.GenerativeService.BidiGenerateContent",
            self.config.api_version
        ))
        .map_err(|e| SessionError::Connect(format!("invalid endpoint: {e}")))?;
        url.query_pairs_mut().append_pair("key", &self.config.api_key);
        Ok(url)
    }

    /// Connect, send the setup message and wait for the server to accept it.
    ///
    /// # Errors
    /// Returns error if the connection fails or the server rejects the setup.
    pub async fn open(
        &self,
        model: &str,
        config: &LiveConnectConfig,
    ) -> Result<GeminiSession, SessionError> {
        let url = self.service_url()?;
        tracing::debug!(endpoint = %self.config.endpoint, model, "Connecting to live API");

        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;

        let session = GeminiSession::new(stream);
        session
            .send_json(&ClientMessage::Setup(Setup::new(model, config)))
            .await?;
        session.await_setup_complete().await?;

        tracing::info!(model, "Live session established");
        Ok(session)
    }
}

#[async_trait]
impl SessionFactory for GeminiClient {
    async fn connect(
        &self,
        model: &str,
        config: &LiveConnectConfig,
    ) -> Result<Arc<dyn LiveSession>, SessionError> {
        let session = tokio::time::timeout(self.config.connect_timeout, self.open(model, config))
            .await
            .map_err(|_| SessionError::Timeout("live session setup"))??;
        Ok(Arc::new(session))
    }
}
