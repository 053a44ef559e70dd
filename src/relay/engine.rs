//! # Relay Engine
//!
//! Runs one call session: two forwarding loops between the client connection
//! and the upstream voice service, sharing a transcript funnel and a
//! termination signal.
//!
//! ## Loops:
//! - **client → upstream**: `audio` becomes `input_audio_buffer.append`,
//!   `end_call` ends the session, anything else is ignored
//! - **upstream → client**: audio deltas, transcripts and `response.done`
//!   are forwarded; transcripts are recorded; an `error` event is forwarded
//!   and ends the session
//!
//! ## Shutdown:
//! Whichever loop sees the end of the call first sets the
//! [`TerminationSignal`]. The other loop notices it at its next receive and
//! leaves on its own; nothing is cancelled mid-forward. [`RelayEngine::handle`]
//! returns only once both loops *and* the transcript collector are done, so
//! the transcript it returns is final.
//!
//! ## Failures:
//! A failure inside a loop is logged, reported to the client while it is
//! still writable, and ends that loop (and the session). Only the loop that
//! actually ends the session reports, so a dead upstream seen from both
//! sides yields a single `error` event. Nothing escapes `handle`.

use crate::relay::client::{ClientSink, ClientSource};
use crate::relay::protocol::{ClientInbound, ClientOutbound, UpstreamCommand, UpstreamEvent};
use crate::relay::termination::{TerminationReason, TerminationSignal};
use crate::relay::timer::{SessionTimer, SessionTiming};
use crate::relay::transcript::{self, Speaker, Transcript, TranscriptRecorder};
use crate::relay::upstream::{UpstreamConnection, UpstreamSink, UpstreamSource};
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Optional limits for one session. `None` disables a limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayOptions {
    /// Longest silence tolerated from the client
    pub idle_timeout: Option<Duration>,
    /// Longest the whole session may last
    pub max_duration: Option<Duration>,
}

/// What a finished session produced.
#[derive(Debug, Clone)]
pub struct RelayOutcome {
    pub session_id: Uuid,
    pub transcript: Transcript,
    pub timing: SessionTiming,
    pub reason: TerminationReason,
}

impl RelayOutcome {
    pub fn duration_secs(&self) -> u64 {
        self.timing.duration_secs
    }
}

/// One relay session bound to its two connections.
pub struct RelayEngine {
    session_id: Uuid,
    client_source: Box<dyn ClientSource>,
    client: Arc<dyn ClientSink>,
    upstream: UpstreamConnection,
    options: RelayOptions,
}

impl RelayEngine {
    pub fn new(
        client_source: Box<dyn ClientSource>,
        client: Arc<dyn ClientSink>,
        upstream: UpstreamConnection,
        options: RelayOptions,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            client_source,
            client,
            upstream,
            options,
        }
    }

    /// Relay until the call ends, then close the upstream and report.
    pub async fn handle(self) -> RelayOutcome {
        let span = info_span!("relay", session_id = %self.session_id);
        self.run().instrument(span).await
    }

    async fn run(self) -> RelayOutcome {
        let RelayEngine {
            session_id,
            mut client_source,
            client,
            upstream,
            options,
        } = self;
        let UpstreamConnection {
            mut sink,
            mut source,
        } = upstream;

        let timer = SessionTimer::start();
        let signal = TerminationSignal::new();
        let (recorder, collector) = transcript::channel();
        info!("Relay session started");

        let ((), (), transcript, ()) = tokio::join!(
            client_to_upstream(
                client_source.as_mut(),
                sink.as_mut(),
                client.as_ref(),
                &signal,
                options.idle_timeout,
            ),
            upstream_to_client(source.as_mut(), client.as_ref(), &signal, recorder),
            collector.collect(),
            enforce_session_limit(&signal, options.max_duration),
        );

        if let Err(err) = sink.close().await {
            debug!(error = %err, "Upstream close failed");
        }

        let timing = timer.stop();
        // Every loop exit sets the signal; the fallback only guards that rule
        let reason = signal.reason().unwrap_or(TerminationReason::ClientDisconnected);
        info!(
            reason = %reason,
            utterances = transcript.len(),
            duration_secs = timing.duration_secs,
            "Relay session finished"
        );

        RelayOutcome {
            session_id,
            transcript,
            timing,
            reason,
        }
    }
}

async fn idle_deadline(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => pending().await,
    }
}

async fn enforce_session_limit(signal: &TerminationSignal, limit: Option<Duration>) {
    let Some(limit) = limit else {
        return;
    };
    tokio::select! {
        _ = signal.fired() => {}
        _ = tokio::time::sleep(limit) => {
            if signal.trigger(TerminationReason::SessionLimit) {
                warn!(limit_secs = limit.as_secs(), "Session length limit reached");
            }
        }
    }
}

/// Tell the client about a failure if it can still hear us.
async fn report_error(client: &dyn ClientSink, message: String) {
    if !client.is_writable() {
        return;
    }
    if let Err(err) = client.send(ClientOutbound::Error { message }).await {
        debug!(error = %err, "Could not report error to client");
    }
}

pub(crate) async fn client_to_upstream(
    source: &mut dyn ClientSource,
    upstream: &mut dyn UpstreamSink,
    client: &dyn ClientSink,
    signal: &TerminationSignal,
    idle_timeout: Option<Duration>,
) {
    let mut forwarded = 0u64;

    loop {
        if signal.is_set() {
            break;
        }

        let message = tokio::select! {
            biased;
            _ = signal.fired() => break,
            message = source.next_message() => message,
            _ = idle_deadline(idle_timeout) => {
                warn!("Client idle timeout reached");
                signal.trigger(TerminationReason::IdleTimeout);
                break;
            }
        };

        match message {
            Some(ClientInbound::Audio { data }) => {
                if let Err(err) = upstream.send(UpstreamCommand::AppendAudio { audio: data }).await {
                    error!(error = %err, "Forwarding audio upstream failed");
                    if signal.trigger(TerminationReason::UpstreamUnavailable(err.to_string())) {
                        report_error(client, err.to_string()).await;
                    }
                    break;
                }
                forwarded += 1;
            }
            Some(ClientInbound::EndCall) => {
                info!("Client ended the call");
                signal.trigger(TerminationReason::ClientEndedCall);
                break;
            }
            Some(ClientInbound::Unknown) => {
                debug!("Ignoring unknown client message");
            }
            None => {
                info!("Client disconnected");
                signal.trigger(TerminationReason::ClientDisconnected);
                break;
            }
        }
    }

    debug!(forwarded, "Client to upstream loop exited");
}

pub(crate) async fn upstream_to_client(
    source: &mut dyn UpstreamSource,
    client: &dyn ClientSink,
    signal: &TerminationSignal,
    recorder: TranscriptRecorder,
) {
    loop {
        if signal.is_set() {
            break;
        }

        let next = tokio::select! {
            biased;
            _ = signal.fired() => break,
            next = source.next_event() => next,
        };

        let event = match next {
            Some(Ok(event)) => event,
            Some(Err(err)) => {
                error!(error = %err, "Upstream stream failed");
                if signal.trigger(TerminationReason::UpstreamUnavailable(err.to_string())) {
                    report_error(client, err.to_string()).await;
                }
                break;
            }
            None => {
                info!("Upstream closed the stream");
                signal.trigger(TerminationReason::UpstreamClosed);
                break;
            }
        };

        let outbound = match event {
            UpstreamEvent::AudioDelta { delta } => ClientOutbound::Audio { data: delta },
            UpstreamEvent::InputTranscriptionCompleted { transcript } => {
                recorder.record(Speaker::Caller, transcript.clone());
                ClientOutbound::Transcript {
                    speaker: Speaker::Caller,
                    text: transcript,
                }
            }
            UpstreamEvent::ResponseTranscriptDone { transcript } => {
                recorder.record(Speaker::Persona, transcript.clone());
                ClientOutbound::Transcript {
                    speaker: Speaker::Persona,
                    text: transcript,
                }
            }
            UpstreamEvent::ResponseDone => ClientOutbound::ResponseComplete,
            UpstreamEvent::Error { error } => {
                let message = error.message_or_default();
                warn!(upstream_message = %message, code = ?error.code, "Upstream reported an error");
                if let Err(err) = client.send(ClientOutbound::Error { message: message.clone() }).await {
                    debug!(error = %err, "Could not forward upstream error to client");
                }
                signal.trigger(TerminationReason::UpstreamError(message));
                break;
            }
            UpstreamEvent::Unknown => continue,
        };

        if let Err(err) = client.send(outbound).await {
            warn!(error = %err, "Client stopped accepting messages");
            signal.trigger(TerminationReason::ClientDisconnected);
            break;
        }
    }

    debug!("Upstream to client loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::testing::{client_pair, upstream_pair, RecordingClient};
    use crate::error::AppError;
    use crate::relay::protocol::UpstreamErrorDetail;

    const GUARD: Duration = Duration::from_secs(5);

    fn audio(data: &str) -> ClientInbound {
        ClientInbound::Audio { data: data.to_string() }
    }

    #[tokio::test]
    async fn test_audio_then_end_call_forwards_exactly_three_frames() {
        let (client_tx, client_source) = client_pair();
        let client = Arc::new(RecordingClient::new());
        let (upstream, upstream_handle) = upstream_pair();

        for chunk in ["AAA", "BBB", "CCC"] {
            client_tx.send(audio(chunk)).unwrap();
        }
        client_tx.send(ClientInbound::EndCall).unwrap();
        client_tx.send(audio("DDD")).unwrap();

        let engine = RelayEngine::new(Box::new(client_source), client.clone(), upstream, RelayOptions::default());
        let outcome = tokio::time::timeout(GUARD, engine.handle()).await.expect("relay finished");

        assert_eq!(outcome.reason, TerminationReason::ClientEndedCall);
        assert_eq!(
            upstream_handle.sent(),
            vec![
                UpstreamCommand::AppendAudio { audio: "AAA".to_string() },
                UpstreamCommand::AppendAudio { audio: "BBB".to_string() },
                UpstreamCommand::AppendAudio { audio: "CCC".to_string() },
            ]
        );
        assert!(upstream_handle.is_closed());
        drop(client_tx);
    }

    #[tokio::test]
    async fn test_upstream_error_sends_one_error_and_stops_both_loops() {
        let (client_tx, client_source) = client_pair();
        let client = Arc::new(RecordingClient::new());
        let (upstream, upstream_handle) = upstream_pair();

        upstream_handle.push(UpstreamEvent::InputTranscriptionCompleted {
            transcript: "Hi, is this Dana?".to_string(),
        });
        upstream_handle.push(UpstreamEvent::Error {
            error: UpstreamErrorDetail {
                message: Some("session expired".to_string()),
                code: None,
            },
        });
        upstream_handle.push(UpstreamEvent::ResponseDone);

        let engine = RelayEngine::new(Box::new(client_source), client.clone(), upstream, RelayOptions::default());
        let outcome = tokio::time::timeout(GUARD, engine.handle()).await.expect("relay finished");

        assert_eq!(outcome.reason, TerminationReason::UpstreamError("session expired".to_string()));
        let errors: Vec<_> = client
            .sent()
            .into_iter()
            .filter(|m| matches!(m, ClientOutbound::Error { .. }))
            .collect();
        assert_eq!(errors, vec![ClientOutbound::Error { message: "session expired".to_string() }]);
        assert!(!client.sent().contains(&ClientOutbound::ResponseComplete));
        assert_eq!(outcome.transcript.joined(), "Caller: Hi, is this Dana?");
        drop(client_tx);
    }

    #[tokio::test]
    async fn test_transcript_is_complete_when_handle_returns() {
        let (client_tx, client_source) = client_pair();
        let client = Arc::new(RecordingClient::new());
        let (upstream, upstream_handle) = upstream_pair();

        upstream_handle.push(UpstreamEvent::InputTranscriptionCompleted { transcript: "Hello".to_string() });
        upstream_handle.push(UpstreamEvent::AudioDelta { delta: "UklG".to_string() });
        upstream_handle.push(UpstreamEvent::ResponseTranscriptDone { transcript: "Hi there".to_string() });
        upstream_handle.push(UpstreamEvent::ResponseDone);
        upstream_handle.push(UpstreamEvent::Unknown);
        upstream_handle.push(UpstreamEvent::InputTranscriptionCompleted { transcript: "Interested?".to_string() });
        upstream_handle.finish();

        let engine = RelayEngine::new(Box::new(client_source), client.clone(), upstream, RelayOptions::default());
        let outcome = tokio::time::timeout(GUARD, engine.handle()).await.expect("relay finished");

        assert_eq!(outcome.reason, TerminationReason::UpstreamClosed);
        assert_eq!(
            outcome.transcript.joined(),
            "Caller: Hello\nPersona: Hi there\nCaller: Interested?"
        );
        assert_eq!(
            client.sent(),
            vec![
                ClientOutbound::Transcript { speaker: Speaker::Caller, text: "Hello".to_string() },
                ClientOutbound::Audio { data: "UklG".to_string() },
                ClientOutbound::Transcript { speaker: Speaker::Persona, text: "Hi there".to_string() },
                ClientOutbound::ResponseComplete,
                ClientOutbound::Transcript { speaker: Speaker::Caller, text: "Interested?".to_string() },
            ]
        );
        drop(client_tx);
    }

    #[tokio::test]
    async fn test_set_signal_stops_upstream_loop_before_processing() {
        let client = RecordingClient::new();
        let (mut upstream, upstream_handle) = upstream_pair();
        upstream_handle.push(UpstreamEvent::ResponseTranscriptDone { transcript: "late".to_string() });

        let signal = TerminationSignal::new();
        signal.trigger(TerminationReason::ClientEndedCall);
        let (recorder, collector) = transcript::channel();

        tokio::time::timeout(GUARD, upstream_to_client(upstream.source.as_mut(), &client, &signal, recorder))
            .await
            .expect("loop exited");

        assert!(client.sent().is_empty());
        assert!(collector.collect().await.is_empty());
    }

    #[tokio::test]
    async fn test_set_signal_stops_client_loop_before_processing() {
        let (client_tx, mut client_source) = client_pair();
        let client = RecordingClient::new();
        let (mut upstream, upstream_handle) = upstream_pair();
        client_tx.send(audio("AAA")).unwrap();

        let signal = TerminationSignal::new();
        signal.trigger(TerminationReason::UpstreamClosed);

        tokio::time::timeout(
            GUARD,
            client_to_upstream(&mut client_source, upstream.sink.as_mut(), &client, &signal, None),
        )
        .await
        .expect("loop exited");

        assert!(upstream_handle.sent().is_empty());
        assert_eq!(signal.reason(), Some(TerminationReason::UpstreamClosed));
    }

    #[tokio::test]
    async fn test_client_disconnect_ends_session() {
        let (client_tx, client_source) = client_pair();
        let client = Arc::new(RecordingClient::new());
        let (upstream, _upstream_handle) = upstream_pair();
        drop(client_tx);

        let engine = RelayEngine::new(Box::new(client_source), client, upstream, RelayOptions::default());
        let outcome = tokio::time::timeout(GUARD, engine.handle()).await.expect("relay finished");
        assert_eq!(outcome.reason, TerminationReason::ClientDisconnected);
        assert_eq!(outcome.duration_secs(), 0);
    }

    #[tokio::test]
    async fn test_upstream_send_failure_is_reported_once() {
        let (client_tx, client_source) = client_pair();
        let client = Arc::new(RecordingClient::new());
        let (upstream, upstream_handle) = upstream_pair();
        upstream_handle.fail_sends();
        client_tx.send(audio("AAA")).unwrap();

        let engine = RelayEngine::new(Box::new(client_source), client.clone(), upstream, RelayOptions::default());
        let outcome = tokio::time::timeout(GUARD, engine.handle()).await.expect("relay finished");

        assert!(matches!(outcome.reason, TerminationReason::UpstreamUnavailable(_)));
        let errors = client
            .sent()
            .into_iter()
            .filter(|m| matches!(m, ClientOutbound::Error { .. }))
            .count();
        assert_eq!(errors, 1);
        drop(client_tx);
    }

    #[tokio::test]
    async fn test_upstream_transport_failure_ends_session_with_one_error() {
        let (client_tx, client_source) = client_pair();
        let client = Arc::new(RecordingClient::new());
        let (upstream, upstream_handle) = upstream_pair();

        upstream_handle.push(UpstreamEvent::ResponseTranscriptDone {
            transcript: "Who is this?".to_string(),
        });
        upstream_handle.push_failure(AppError::UpstreamUnavailable("connection reset".to_string()));
        upstream_handle.push(UpstreamEvent::ResponseDone);

        let engine = RelayEngine::new(Box::new(client_source), client.clone(), upstream, RelayOptions::default());
        let outcome = tokio::time::timeout(GUARD, engine.handle()).await.expect("relay finished");

        assert!(matches!(outcome.reason, TerminationReason::UpstreamUnavailable(_)));
        let errors = client
            .sent()
            .into_iter()
            .filter(|m| matches!(m, ClientOutbound::Error { .. }))
            .count();
        assert_eq!(errors, 1);
        assert!(!client.sent().contains(&ClientOutbound::ResponseComplete));
        assert_eq!(outcome.transcript.joined(), "Persona: Who is this?");
        assert!(upstream_handle.is_closed());
        drop(client_tx);
    }

    #[tokio::test]
    async fn test_unwritable_client_ends_session() {
        let (client_tx, client_source) = client_pair();
        let client = Arc::new(RecordingClient::new());
        client.disconnect();
        let (upstream, upstream_handle) = upstream_pair();
        upstream_handle.push(UpstreamEvent::AudioDelta { delta: "UklG".to_string() });

        let engine = RelayEngine::new(Box::new(client_source), client.clone(), upstream, RelayOptions::default());
        let outcome = tokio::time::timeout(GUARD, engine.handle()).await.expect("relay finished");
        assert_eq!(outcome.reason, TerminationReason::ClientDisconnected);
        drop(client_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_ends_silent_session() {
        let (client_tx, client_source) = client_pair();
        let client = Arc::new(RecordingClient::new());
        let (upstream, _upstream_handle) = upstream_pair();
        let options = RelayOptions {
            idle_timeout: Some(Duration::from_secs(30)),
            max_duration: None,
        };

        let engine = RelayEngine::new(Box::new(client_source), client, upstream, options);
        let outcome = engine.handle().await;
        assert_eq!(outcome.reason, TerminationReason::IdleTimeout);
        drop(client_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_limit_ends_long_session() {
        let (client_tx, client_source) = client_pair();
        let client = Arc::new(RecordingClient::new());
        let (upstream, _upstream_handle) = upstream_pair();
        let options = RelayOptions {
            idle_timeout: None,
            max_duration: Some(Duration::from_secs(600)),
        };

        let engine = RelayEngine::new(Box::new(client_source), client, upstream, options);
        let outcome = engine.handle().await;
        assert_eq!(outcome.reason, TerminationReason::SessionLimit);
        drop(client_tx);
    }
}
