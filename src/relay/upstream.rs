//! # Upstream Connector
//!
//! Owns the connection to the realtime voice service.
//!
//! ## Connection Flow:
//! 1. **Handshake**: open `{url}?model={model}` with a bearer token and the
//!    `OpenAI-Beta: realtime=v1` protocol marker, bounded by a timeout
//! 2. **Configure**: send `session.update` before anything else
//! 3. **Split**: hand out an [`UpstreamSink`] and an [`UpstreamSource`] so the
//!    two forwarding loops can use the socket at the same time
//!
//! ## Failure Policy:
//! Refused connections, rejected credentials, timeouts and mid-stream drops
//! all become [`AppError::UpstreamUnavailable`]. The connector never
//! reconnects: the upstream conversation state cannot be resumed, so a dropped
//! call is over and the caller starts a fresh one.

use crate::config::RealtimeConfig;
use crate::error::{AppError, AppResult};
use crate::relay::protocol::{UpstreamCommand, UpstreamEvent};
use crate::relay::session_config::SessionConfig;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue, Request};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Outbound half of the upstream connection.
#[async_trait]
pub trait UpstreamSink: Send {
    async fn send(&mut self, command: UpstreamCommand) -> AppResult<()>;

    async fn close(&mut self) -> AppResult<()>;
}

/// Inbound half of the upstream connection.
#[async_trait]
pub trait UpstreamSource: Send {
    /// Next decoded event; `None` when the upstream closed the stream.
    async fn next_event(&mut self) -> Option<AppResult<UpstreamEvent>>;
}

/// An open, configured upstream session.
pub struct UpstreamConnection {
    pub sink: Box<dyn UpstreamSink>,
    pub source: Box<dyn UpstreamSource>,
}

#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Open a connection and send `session` as the first frame.
    async fn connect(&self, session: &SessionConfig) -> AppResult<UpstreamConnection>;
}

type RealtimeStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector for OpenAI-Realtime compatible WebSocket endpoints.
#[derive(Debug, Clone)]
pub struct RealtimeConnector {
    endpoint: String,
    api_key: String,
    connect_timeout: Duration,
}

impl RealtimeConnector {
    pub fn from_config(config: &RealtimeConfig) -> Self {
        let separator = if config.url.contains('?') { '&' } else { '?' };
        Self {
            endpoint: format!("{}{}model={}", config.url, separator, config.model),
            api_key: config.api_key.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self) -> AppResult<Request<()>> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| AppError::ConfigError(format!("Invalid realtime endpoint {}: {}", self.endpoint, e)))?;

        let headers = request.headers_mut();
        if !self.api_key.is_empty() {
            let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|_| AppError::ConfigError("Realtime API key is not a valid header value".to_string()))?;
            headers.insert(AUTHORIZATION, bearer);
        }
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        Ok(request)
    }
}

#[async_trait]
impl UpstreamConnector for RealtimeConnector {
    async fn connect(&self, session: &SessionConfig) -> AppResult<UpstreamConnection> {
        let request = self.request()?;

        debug!(endpoint = %self.endpoint, "Connecting to realtime upstream");
        let (stream, response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                AppError::UpstreamUnavailable(format!(
                    "no handshake from {} within {}s",
                    self.endpoint,
                    self.connect_timeout.as_secs()
                ))
            })??;
        info!(status = %response.status(), "Connected to realtime upstream");

        let (sink, source) = stream.split();
        let mut sink = WsUpstreamSink { sink };
        sink.send(UpstreamCommand::SessionUpdate {
            session: session.clone(),
        })
        .await?;

        Ok(UpstreamConnection {
            sink: Box::new(sink),
            source: Box::new(WsUpstreamSource { stream: source }),
        })
    }
}

struct WsUpstreamSink {
    sink: SplitSink<RealtimeStream, Message>,
}

#[async_trait]
impl UpstreamSink for WsUpstreamSink {
    async fn send(&mut self, command: UpstreamCommand) -> AppResult<()> {
        let json = serde_json::to_string(&command)
            .map_err(|e| AppError::Internal(format!("Cannot encode upstream frame: {}", e)))?;
        self.sink.send(Message::Text(json)).await?;
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

struct WsUpstreamSource {
    stream: SplitStream<RealtimeStream>,
}

#[async_trait]
impl UpstreamSource for WsUpstreamSource {
    async fn next_event(&mut self) -> Option<AppResult<UpstreamEvent>> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(frame) => frame,
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => return None,
                Err(err) => return Some(Err(err.into())),
            };

            match frame {
                Message::Text(text) => match serde_json::from_str::<UpstreamEvent>(&text) {
                    Ok(event) => return Some(Ok(event)),
                    Err(err) => warn!(error = %err, "Skipping malformed upstream frame"),
                },
                Message::Close(frame) => {
                    debug!(?frame, "Upstream sent close frame");
                    return None;
                }
                // tungstenite answers pings itself
                Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}
