//! Gateway websocket client.
//!
//! One session at a time: Hello, Identify, then heartbeats and dispatches
//! until the connection drops or the server asks for a reconnect. Sessions are
//! never resumed; a fresh Identify produces a new Ready, which triggers a full
//! sweep and covers anything missed while disconnected.

use crate::config::PlatformConfig;
use crate::dispatch::Notification;
use crate::telemetry::spans;
use anyhow::{Context, Result, bail};
use evchan_proto::{GatewayEvent, GatewayPayload, Identify, Intents, OpCode};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

const INTENTS: Intents = Intents::GUILDS.union(Intents::GUILD_SCHEDULED_EVENTS);

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Close codes after which reconnecting cannot help.
const FATAL_CLOSE_CODES: &[u16] = &[
    4004, // authentication failed
    4010, // invalid shard
    4011, // sharding required
    4012, // invalid API version
    4013, // invalid intents
    4014, // disallowed intents
];

/// Why a session ended without an error.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    Reconnect,
}

/// What to do after handling one payload.
#[derive(Debug, PartialEq)]
enum FrameAction {
    Nothing,
    Dispatch(GatewayEvent),
    HeartbeatNow,
    Reconnect,
}

/// Per-session protocol state.
#[derive(Debug, Default)]
struct SessionState {
    last_sequence: Option<u64>,
    awaiting_ack: bool,
}

impl SessionState {
    fn handle(&mut self, payload: GatewayPayload) -> Result<FrameAction> {
        if let Some(seq) = payload.s {
            self.last_sequence = Some(seq);
        }
        Ok(match payload.opcode()? {
            OpCode::Dispatch => FrameAction::Dispatch(payload.event()?),
            OpCode::Heartbeat => FrameAction::HeartbeatNow,
            OpCode::HeartbeatAck => {
                self.awaiting_ack = false;
                FrameAction::Nothing
            }
            OpCode::Reconnect | OpCode::InvalidSession => FrameAction::Reconnect,
            OpCode::Hello | OpCode::Identify | OpCode::Resume => FrameAction::Nothing,
        })
    }

    /// Build the next heartbeat, or `None` if the previous one was never
    /// acknowledged and the connection should be considered dead.
    fn next_heartbeat(&mut self) -> Option<GatewayPayload> {
        if self.awaiting_ack {
            return None;
        }
        self.awaiting_ack = true;
        Some(GatewayPayload::heartbeat(self.last_sequence))
    }
}

/// Delay before reconnect attempt `attempt` (1-based), doubling up to a cap.
fn reconnect_backoff(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(6);
    BACKOFF_BASE.saturating_mul(2_u32.pow(exponent)).min(BACKOFF_MAX)
}

/// The first heartbeat is sent after `interval * jitter` so a fleet of
/// clients reconnecting together does not beat in lockstep.
fn first_heartbeat_delay(interval: Duration, jitter: f64) -> Duration {
    interval.mul_f64(jitter.clamp(0.0, 1.0))
}

/// Gateway client feeding decoded notifications into the dispatcher.
pub struct Gateway {
    url: String,
    token: String,
    events: mpsc::Sender<Notification>,
    shutdown: CancellationToken,
}

impl Gateway {
    pub fn new(
        config: &PlatformConfig,
        token: impl Into<String>,
        events: mpsc::Sender<Notification>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            url: config.gateway_url.clone(),
            token: token.into(),
            events,
            shutdown,
        }
    }

    /// Run sessions until shutdown, reconnecting with capped backoff.
    pub async fn run(self) -> Result<()> {
        let mut failures = 0_u32;
        let mut attempt = 0_u32;
        loop {
            attempt = attempt.saturating_add(1);
            let outcome = self
                .run_session()
                .instrument(spans::gateway(attempt))
                .await;

            let delay = match outcome {
                Ok(SessionEnd::Shutdown) => {
                    info!("Gateway stopped");
                    return Ok(());
                }
                Ok(SessionEnd::Reconnect) => {
                    failures = 0;
                    BACKOFF_BASE
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    if let Some(code) = fatal_close_code(&e) {
                        error!(code, error = %e, "Gateway closed with a fatal code");
                        return Err(e);
                    }
                    warn!(error = %e, failures, "Gateway session failed");
                    reconnect_backoff(failures)
                }
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn run_session(&self) -> Result<SessionEnd> {
        let (stream, _response) = tokio::select! {
            _ = self.shutdown.cancelled() => return Ok(SessionEnd::Shutdown),
            connected = connect_async(self.url.as_str()) => {
                connected.context("failed to connect gateway websocket")?
            }
        };
        let (mut sink, mut source) = stream.split();

        let hello = loop {
            let Some(frame) = source.next().await else {
                bail!("gateway closed before Hello");
            };
            if let WsMessage::Text(text) = frame.context("failed reading gateway frame")? {
                let payload = GatewayPayload::parse(&text)?;
                if payload.opcode()? == OpCode::Hello {
                    break payload.hello()?;
                }
            }
        };
        let interval = Duration::from_millis(hello.heartbeat_interval);
        debug!(?interval, "Received Hello");

        let identify = GatewayPayload::identify(&Identify::new(self.token.clone(), INTENTS));
        sink.send(WsMessage::Text(serde_json::to_string(&identify)?))
            .await
            .context("failed to send Identify")?;

        let jitter = rand::thread_rng().gen_range(0.0..1.0);
        let mut next_beat = Instant::now() + first_heartbeat_delay(interval, jitter);
        let mut state = SessionState::default();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
                _ = tokio::time::sleep_until(next_beat) => {
                    let Some(beat) = state.next_heartbeat() else {
                        warn!("Heartbeat not acknowledged, reconnecting");
                        return Ok(SessionEnd::Reconnect);
                    };
                    sink.send(WsMessage::Text(serde_json::to_string(&beat)?))
                        .await
                        .context("failed to send heartbeat")?;
                    next_beat = Instant::now() + interval;
                }
                frame = source.next() => {
                    let Some(frame) = frame else {
                        bail!("gateway stream ended");
                    };
                    let text = match frame.context("failed reading gateway frame")? {
                        WsMessage::Text(text) => text,
                        WsMessage::Close(close) => {
                            let code = close.map(|c| u16::from(c.code)).unwrap_or(1000);
                            bail!(GatewayClosed(code));
                        }
                        _ => continue,
                    };

                    let payload = match GatewayPayload::parse(&text) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(error = %e, "Undecodable gateway frame");
                            continue;
                        }
                    };

                    match state.handle(payload) {
                        Ok(FrameAction::Nothing) => {}
                        Ok(FrameAction::HeartbeatNow) => {
                            let beat = GatewayPayload::heartbeat(state.last_sequence);
                            sink.send(WsMessage::Text(serde_json::to_string(&beat)?))
                                .await
                                .context("failed to send requested heartbeat")?;
                        }
                        Ok(FrameAction::Reconnect) => {
                            info!("Gateway requested reconnect");
                            return Ok(SessionEnd::Reconnect);
                        }
                        Ok(FrameAction::Dispatch(event)) => {
                            let Some(notification) = Notification::from_gateway(event) else {
                                continue;
                            };
                            if self.events.send(notification).await.is_err() {
                                return Ok(SessionEnd::Shutdown);
                            }
                        }
                        Err(e) => warn!(error = %e, "Skipping malformed gateway payload"),
                    }
                }
            }
        }
    }
}

/// Close frame received from the gateway.
#[derive(Debug, thiserror::Error)]
#[error("gateway closed the connection with code {0}")]
struct GatewayClosed(u16);

fn fatal_close_code(error: &anyhow::Error) -> Option<u16> {
    error
        .downcast_ref::<GatewayClosed>()
        .map(|closed| closed.0)
        .filter(|code| FATAL_CLOSE_CODES.contains(code))
}
