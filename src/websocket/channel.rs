//! Realtime channel to the game server.
//!
//! One websocket per game, authenticated with a bearer token. Outbound events
//! are written straight through while connected and queued (bounded) while
//! the socket is down; the queue is flushed in order after a reconnect.
//! Reconnects back off exponentially.

use actix::io::{SinkWrite, WriteHandler};
use actix::prelude::*;
use actix_codec::Framed;
use awc::error::WsProtocolError;
use awc::ws::{Codec, Frame, Message as WsMessage};
use awc::BoxedSocket;
use futures::stream::{SplitSink, StreamExt};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::time::Duration;

use crate::config::ChannelConfig;
use crate::error::TransportError;
use crate::models::{ClientEvent, ConnectionStatus, ServerMessage};

type WsSink = SplitSink<Framed<BoxedSocket, Codec>, WsMessage>;

/// Publish one event to the server
#[derive(Message, Debug, Clone)]
#[rtype(result = "Result<Delivery, TransportError>")]
pub struct Publish(pub ClientEvent);

/// What happened to a published event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Queued,
}

/// Connectivity change, reported to the owner of the channel
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct ChannelStatusChanged {
    pub status: ConnectionStatus,
    /// Why the channel went down, when a transport failure caused it
    pub cause: Option<TransportError>,
}

/// An event the channel could not take
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct TransportFailed {
    pub event: ClientEvent,
    pub error: TransportError,
}

/// Close the socket for good
#[derive(Message)]
#[rtype(result = "()")]
pub struct CloseChannel;

/// Delay before reconnect attempt `attempt` (1-based)
pub fn backoff_delay(base_ms: u64, max_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
}

/// Parses an inbound text frame, dropping events addressed to other games.
pub fn decode_event(text: &str, game_id: &str) -> Option<ServerMessage> {
    match serde_json::from_str::<ServerMessage>(text) {
        Ok(msg) if msg.game_id == game_id => Some(msg),
        Ok(msg) => {
            debug!("Dropping {:?} for foreign game {}", msg.kind, msg.game_id);
            None
        }
        Err(e) => {
            warn!("Malformed server event: {}", e);
            None
        }
    }
}

pub struct SyncChannel {
    config: ChannelConfig,
    inbound: Recipient<ServerMessage>,
    status: Recipient<ChannelStatusChanged>,
    failures: Recipient<TransportFailed>,
    sink: Option<SinkWrite<WsMessage, WsSink>>,
    outbox: VecDeque<ClientEvent>,
    attempt: u32,
    closing: bool,
}

impl SyncChannel {
    pub fn new(
        config: ChannelConfig,
        inbound: Recipient<ServerMessage>,
        status: Recipient<ChannelStatusChanged>,
        failures: Recipient<TransportFailed>,
    ) -> Self {
        SyncChannel {
            config,
            inbound,
            status,
            failures,
            sink: None,
            outbox: VecDeque::new(),
            attempt: 0,
            closing: false,
        }
    }

    fn report(&self, status: ConnectionStatus, cause: Option<TransportError>) {
        self.status.do_send(ChannelStatusChanged { status, cause });
    }

    fn connect(&mut self, ctx: &mut Context<Self>) {
        if self.closing {
            return;
        }
        let endpoint = self.config.endpoint();
        info!("Connecting to {}", endpoint);
        let mut request = awc::Client::new().ws(endpoint.as_str());
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }
        let connect = request.connect().into_actor(self).map(|res, act, ctx| match res {
            Ok((_response, framed)) => {
                let (sink, stream) = framed.split();
                act.sink = Some(SinkWrite::new(sink, ctx));
                ctx.add_stream(stream);
                act.attempt = 0;
                info!("Connected to game {}", act.config.game_id);
                act.report(ConnectionStatus::Connected, None);
                act.flush_outbox();
            }
            Err(e) => {
                warn!("Connect to game {} failed: {}", act.config.game_id, e);
                act.schedule_reconnect(ctx, Some(TransportError::Connect(e.to_string())));
            }
        });
        ctx.spawn(connect);
    }

    fn schedule_reconnect(&mut self, ctx: &mut Context<Self>, cause: Option<TransportError>) {
        self.sink = None;
        if self.closing {
            return;
        }
        self.attempt = self.attempt.saturating_add(1);
        let delay = backoff_delay(self.config.reconnect_base_ms, self.config.reconnect_max_ms, self.attempt);
        debug!("Reconnect attempt {} in {:?}", self.attempt, delay);
        self.report(ConnectionStatus::Reconnecting { attempt: self.attempt }, cause);
        ctx.run_later(delay, |act, ctx| act.connect(ctx));
    }

    fn write(&mut self, event: &ClientEvent) -> Result<(), TransportError> {
        let sink = self.sink.as_mut().ok_or(TransportError::Closed)?;
        let text = serde_json::to_string(event).map_err(|e| TransportError::Send(e.to_string()))?;
        sink.write(WsMessage::Text(text.into()))
            .map_err(|_| TransportError::Closed)
    }

    fn flush_outbox(&mut self) {
        while let Some(event) = self.outbox.pop_front() {
            if let Err(e) = self.write(&event) {
                debug!("Flush interrupted: {}", e);
                self.outbox.push_front(event);
                break;
            }
        }
    }

    fn enqueue(&mut self, event: ClientEvent) -> Result<Delivery, TransportError> {
        if self.outbox.len() >= self.config.outbox_capacity {
            return Err(TransportError::QueueFull(self.outbox.len()));
        }
        self.outbox.push_back(event);
        Ok(Delivery::Queued)
    }

    fn publish(&mut self, event: ClientEvent) -> Result<Delivery, TransportError> {
        if self.closing {
            return Err(TransportError::Closed);
        }
        if event.game_id() != self.config.game_id {
            return Err(TransportError::Send(format!("event for game {}", event.game_id())));
        }
        if self.sink.is_some() && self.outbox.is_empty() {
            match self.write(&event) {
                Ok(()) => return Ok(Delivery::Sent),
                Err(e) => debug!("Write failed, queueing: {}", e),
            }
        }
        self.enqueue(event)
    }
}

impl Actor for SyncChannel {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.report(ConnectionStatus::Connecting, None);
        self.connect(ctx);
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        info!("Channel to game {} stopped", self.config.game_id);
        self.report(ConnectionStatus::Closed, None);
    }
}

impl Handler<Publish> for SyncChannel {
    type Result = Result<Delivery, TransportError>;

    fn handle(&mut self, msg: Publish, _: &mut Self::Context) -> Self::Result {
        let result = self.publish(msg.0.clone());
        if let Err(error) = &result {
            warn!("Could not publish event: {}", error);
            self.failures.do_send(TransportFailed {
                event: msg.0,
                error: error.clone(),
            });
        }
        result
    }
}

impl Handler<CloseChannel> for SyncChannel {
    type Result = ();

    fn handle(&mut self, _: CloseChannel, ctx: &mut Self::Context) {
        self.closing = true;
        if let Some(mut sink) = self.sink.take() {
            let _ = sink.write(WsMessage::Close(None));
            sink.close();
        }
        if !self.outbox.is_empty() {
            warn!("Dropping {} unsent events on close", self.outbox.len());
        }
        ctx.stop();
    }
}

impl StreamHandler<Result<Frame, WsProtocolError>> for SyncChannel {
    fn handle(&mut self, frame: Result<Frame, WsProtocolError>, _: &mut Self::Context) {
        match frame {
            Ok(Frame::Text(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => {
                    if let Some(msg) = decode_event(text, &self.config.game_id) {
                        self.inbound.do_send(msg);
                    }
                }
                Err(e) => warn!("Non UTF-8 text frame: {}", e),
            },
            Ok(Frame::Ping(bytes)) => {
                if let Some(sink) = self.sink.as_mut() {
                    let _ = sink.write(WsMessage::Pong(bytes));
                }
            }
            Ok(Frame::Close(reason)) => {
                info!("Server closed the channel: {:?}", reason);
                self.sink = None;
            }
            Ok(Frame::Binary(_)) => warn!("Binary frames are not supported"),
            Ok(_) => {}
            Err(e) => {
                // The stream ends right after, which triggers the reconnect
                warn!("Protocol error: {}", e);
                self.sink = None;
            }
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        if self.closing {
            return;
        }
        info!("Stream to game {} ended", self.config.game_id);
        self.schedule_reconnect(ctx, None);
    }
}

impl WriteHandler<WsProtocolError> for SyncChannel {
    fn error(&mut self, err: WsProtocolError, _: &mut Self::Context) -> Running {
        warn!("Write error: {}", err);
        Running::Continue
    }

    fn finished(&mut self, _: &mut Self::Context) {
        debug!("Sink closed");
    }
}
