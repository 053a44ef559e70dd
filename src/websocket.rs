//! # Call WebSocket Handler
//!
//! Client endpoint for live calls: `GET /ws/calls/{call_id}`.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: the upgrade is refused with 503 when the server is at
//!    its concurrent call limit
//! 2. **Audio**: `{"type":"audio","data":"<base64>"}` text frames, or raw
//!    binary frames which are base64 encoded on arrival
//! 3. **Hang up**: `{"type":"end_call"}`
//! 4. **Server events**: `audio`, `transcript`, `response_complete`, `error`
//!    and finally `call_complete`
//!
//! ## Actor Model:
//! [`CallWebSocket`] only moves frames. The call itself runs in a spawned
//! task driven by [`CallLifecycle`](crate::call::lifecycle::CallLifecycle):
//! inbound frames reach it through a channel, and it writes back through
//! [`ActorClientSink`], which posts messages to the actor's mailbox. When the
//! actor stops it drops its end of the channel; the relay sees that as a
//! client disconnect.

use crate::call::lifecycle::CallSettings;
use crate::call::CallId;
use crate::error::{AppError, AppResult};
use crate::relay::client::{ChannelClientSource, ClientSink};
use crate::relay::protocol::{ClientInbound, ClientOutbound};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// One client connection bound to one call.
pub struct CallWebSocket {
    call_id: CallId,
    app_state: web::Data<AppState>,
    settings: CallSettings,

    /// Feeds the relay; dropped when the connection stops
    inbound: Option<mpsc::UnboundedSender<ClientInbound>>,

    last_heartbeat: Instant,
}

impl CallWebSocket {
    pub fn new(call_id: CallId, app_state: web::Data<AppState>, settings: CallSettings) -> Self {
        Self {
            call_id,
            app_state,
            settings,
            inbound: None,
            last_heartbeat: Instant::now(),
        }
    }

    fn forward(&self, message: ClientInbound) {
        if let Some(inbound) = &self.inbound {
            if inbound.send(message).is_err() {
                debug!(call_id = self.call_id, "Relay no longer reading client frames");
            }
        }
    }
}

/// Parse a client text frame. Malformed JSON is dropped.
fn inbound_from_text(text: &str) -> Option<ClientInbound> {
    match serde_json::from_str::<ClientInbound>(text) {
        Ok(message) => Some(message),
        Err(err) => {
            debug!(error = %err, "Ignoring malformed client frame");
            None
        }
    }
}

/// Raw binary frames carry audio bytes; the relay speaks base64.
fn inbound_from_binary(data: &[u8]) -> ClientInbound {
    ClientInbound::Audio {
        data: BASE64.encode(data),
    }
}

/// Serialized event for the client.
#[derive(Message)]
#[rtype(result = "()")]
struct SendText(String);

#[derive(Message)]
#[rtype(result = "()")]
struct CloseConnection;

impl Actor for CallWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(call_id = self.call_id, "Call WebSocket connected");

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(call_id = act.call_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });

        let (inbound, source) = ChannelClientSource::new();
        self.inbound = Some(inbound);

        let client: Arc<dyn ClientSink> = Arc::new(ActorClientSink { addr: ctx.address() });
        let call_id = self.call_id;
        let settings = self.settings.clone();
        let app_state = self.app_state.clone();

        tokio::spawn(async move {
            let result = app_state
                .lifecycle
                .run(call_id, Box::new(source), client, settings)
                .await;
            if let Ok(summary) = &result {
                info!(
                    call_id,
                    session_id = %summary.session_id,
                    score = summary.report.analysis.overall_score,
                    "Call completed"
                );
            }
            app_state.record_call_finished(result.is_ok());
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(call_id = self.call_id, "Call WebSocket disconnected");
        self.inbound.take();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for CallWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                if let Some(message) = inbound_from_text(&text) {
                    self.forward(message);
                }
            }
            Ok(ws::Message::Binary(data)) => {
                self.forward(inbound_from_binary(&data));
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(call_id = self.call_id, ?reason, "Client closed the WebSocket");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                warn!(call_id = self.call_id, error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

impl Handler<SendText> for CallWebSocket {
    type Result = ();

    fn handle(&mut self, msg: SendText, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl Handler<CloseConnection> for CallWebSocket {
    type Result = ();

    fn handle(&mut self, _msg: CloseConnection, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseCode::Normal.into()));
        ctx.stop();
    }
}

/// [`ClientSink`] that writes through the connection's actor.
struct ActorClientSink {
    addr: Addr<CallWebSocket>,
}

#[async_trait]
impl ClientSink for ActorClientSink {
    async fn send(&self, message: ClientOutbound) -> AppResult<()> {
        if !self.addr.connected() {
            return Err(AppError::Internal("client connection is closed".to_string()));
        }
        let json = serde_json::to_string(&message)
            .map_err(|e| AppError::Internal(format!("Cannot encode client event: {}", e)))?;
        // do_send ignores the mailbox capacity, so audio bursts are never dropped
        self.addr.do_send(SendText(json));
        Ok(())
    }

    fn is_writable(&self) -> bool {
        self.addr.connected()
    }

    async fn close(&self) {
        if self.addr.connected() {
            self.addr.do_send(CloseConnection);
        }
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Checks capacity, snapshots the call settings from the live configuration
/// and hands the connection to a [`CallWebSocket`] actor.
pub async fn call_websocket(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<CallId>,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let call_id = path.into_inner();
    info!(call_id, peer = ?req.connection_info().peer_addr(), "New call WebSocket request");

    // The slot is released by the lifecycle task once the call finishes
    if !app_state.try_acquire_session() {
        warn!(call_id, "Rejecting call WebSocket: at capacity");
        return Err(AppError::CapacityExceeded("Too many calls in progress, try again shortly".to_string()).into());
    }

    let settings = CallSettings::from_config(&app_state.get_config());
    let slots = app_state.clone();
    ws::start(CallWebSocket::new(call_id, app_state, settings), &req, stream).inspect_err(|err| {
        warn!(call_id, error = %err, "WebSocket handshake failed");
        slots.release_session();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::tests::test_state;
    use actix_web::{test as actix_test, App};

    #[test]
    fn test_text_frames_are_parsed() {
        assert_eq!(
            inbound_from_text(r#"{"type":"audio","data":"AAAA"}"#),
            Some(ClientInbound::Audio { data: "AAAA".to_string() })
        );
        assert_eq!(inbound_from_text(r#"{"type":"end_call"}"#), Some(ClientInbound::EndCall));
        assert_eq!(inbound_from_text(r#"{"type":"mute"}"#), Some(ClientInbound::Unknown));
        assert_eq!(inbound_from_text("not json"), None);
    }

    #[test]
    fn test_binary_frames_become_base64_audio() {
        assert_eq!(
            inbound_from_binary(&[0x00, 0x01, 0xff]),
            ClientInbound::Audio { data: "AAH/".to_string() }
        );
    }

    #[actix_web::test]
    async fn test_upgrade_refused_at_capacity() {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 1;
        let state = test_state(config);
        assert!(state.try_acquire_session());

        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/ws/calls/{call_id}", web::get().to(call_websocket)),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/ws/calls/1").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[actix_web::test]
    async fn test_failed_handshake_returns_the_slot() {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 1;
        let state = web::Data::new(test_state(config));

        let app = actix_test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/ws/calls/{call_id}", web::get().to(call_websocket)),
        )
        .await;

        // No upgrade headers, so the handshake is rejected
        let req = actix_test::TestRequest::get().uri("/ws/calls/1").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert!(resp.status().is_client_error());
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }
}
