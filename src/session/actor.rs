//! Actor hosting one [`GameSession`].
//!
//! Local actions, server events and clock ticks all arrive through this
//! actor's mailbox, so they are handled strictly one at a time in arrival
//! order. After each message the queued outbound events are handed to the
//! channel and the refreshed view is pushed to every subscribed page.

use actix::prelude::*;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;

use crate::config::{ChannelConfig, ServerEndpoint};
use crate::error::SessionError;
use crate::models::{ChessWebSocketMessage, PieceKind, ServerMessage};
use crate::session::orchestrator::{GameSession, SessionNotice, SessionView};
use crate::websocket::channel::{ChannelStatusChanged, CloseChannel, Publish, SyncChannel, TransportFailed};

#[derive(Message, Debug, Clone)]
#[rtype(result = "Result<(), SessionError>")]
pub struct SubmitMove {
    pub from: String,
    pub to: String,
    pub promotion: Option<PieceKind>,
}

#[derive(Message, Debug, Clone, Copy)]
#[rtype(result = "Result<(), SessionError>")]
pub struct OfferDraw;

#[derive(Message, Debug, Clone, Copy)]
#[rtype(result = "Result<(), SessionError>")]
pub struct RespondDraw {
    pub accept: bool,
}

#[derive(Message, Debug, Clone, Copy)]
#[rtype(result = "Result<(), SessionError>")]
pub struct Resign;

#[derive(Message, Debug, Clone, Copy)]
#[rtype(result = "Result<(), SessionError>")]
pub struct Leave;

#[derive(Message, Debug, Clone, Copy)]
#[rtype(result = "SessionView")]
pub struct GetView;

#[derive(Message, Debug, Clone)]
#[rtype(result = "Vec<String>")]
pub struct LegalMoves {
    pub square: String,
}

/// Clock interval elapsed
#[derive(Message, Debug, Clone, Copy)]
#[rtype(result = "()")]
pub struct Tick;

/// Register a page for view pushes
#[derive(Message)]
#[rtype(result = "()")]
pub struct Subscribe {
    pub id: String,
    pub recipient: Recipient<ChessWebSocketMessage>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Unsubscribe {
    pub id: String,
}

/// Payload pushed to subscribed pages
#[derive(Serialize)]
struct ViewPush<'a> {
    message_type: &'static str,
    view: &'a SessionView,
    #[serde(skip_serializing_if = "<[SessionNotice]>::is_empty")]
    notices: &'a [SessionNotice],
}

pub struct SessionActor {
    session: GameSession,
    server: Option<ServerEndpoint>,
    channel: Option<Addr<SyncChannel>>,
    tick_handle: Option<SpawnHandle>,
    subscribers: HashMap<String, Recipient<ChessWebSocketMessage>>,
}

impl SessionActor {
    /// With no server the session runs offline and outbound events are dropped.
    pub fn new(session: GameSession, server: Option<ServerEndpoint>) -> Self {
        SessionActor {
            session,
            server,
            channel: None,
            tick_handle: None,
            subscribers: HashMap::new(),
        }
    }

    fn open_channel(&mut self, ctx: &mut Context<Self>) {
        if self.channel.is_some() {
            return;
        }
        let (Some(server), Some(game_id)) = (&self.server, self.session.game_id()) else {
            return;
        };
        let config = ChannelConfig::new(server.url.clone(), game_id, server.token.clone(), self.session.config());
        info!("Opening channel {}", config.endpoint());
        let addr = ctx.address();
        let channel = SyncChannel::new(config, addr.clone().recipient(), addr.clone().recipient(), addr.recipient());
        self.channel = Some(channel.start());
    }

    fn close_channel(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.do_send(CloseChannel);
        }
    }

    fn flush_outbound(&mut self) {
        let events = self.session.take_outbound();
        if events.is_empty() {
            return;
        }
        match &self.channel {
            Some(channel) => {
                for event in events {
                    channel.do_send(Publish(event));
                }
            }
            None => debug!("No channel; dropping {} outbound events", events.len()),
        }
    }

    /// Pushes the current view, with any pending notices, to every subscriber.
    fn broadcast(&mut self) {
        let notices = self.session.take_notices();
        for notice in &notices {
            info!("Session notice: {:?}", notice);
        }
        if self.subscribers.is_empty() {
            return;
        }
        let view = self.session.view();
        let push = ViewPush {
            message_type: "session",
            view: &view,
            notices: &notices,
        };
        let text = match serde_json::to_string(&push) {
            Ok(text) => text,
            Err(e) => {
                warn!("Error serializing view: {}", e);
                return;
            }
        };
        for recipient in self.subscribers.values() {
            recipient.do_send(ChessWebSocketMessage(text.clone()));
        }
    }

    /// Common tail of every handler
    fn settle(&mut self, flush: bool) {
        if flush {
            self.flush_outbound();
        }
        self.broadcast();
    }

    fn act<F>(&mut self, action: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut GameSession) -> Result<(), SessionError>,
    {
        let result = action(&mut self.session);
        if let Err(e) = &result {
            debug!("Action refused: {}", e);
        }
        self.settle(true);
        result
    }
}

impl Actor for SessionActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let interval = self.session.config().tick_interval();
        // Ticks go through the mailbox so they queue behind already-arrived events
        self.tick_handle = Some(ctx.run_interval(interval, |_, ctx| ctx.address().do_send(Tick)));
        self.open_channel(ctx);
        info!("Session started for {:?}", self.session.game_id());
    }

    fn stopping(&mut self, ctx: &mut Self::Context) -> Running {
        if let Some(handle) = self.tick_handle.take() {
            ctx.cancel_future(handle);
        }
        self.close_channel();
        Running::Stop
    }
}

impl Handler<SubmitMove> for SessionActor {
    type Result = Result<(), SessionError>;

    fn handle(&mut self, msg: SubmitMove, _: &mut Self::Context) -> Self::Result {
        self.act(|session| session.submit_move(&msg.from, &msg.to, msg.promotion).map(|_| ()))
    }
}

impl Handler<OfferDraw> for SessionActor {
    type Result = Result<(), SessionError>;

    fn handle(&mut self, _: OfferDraw, _: &mut Self::Context) -> Self::Result {
        self.act(GameSession::offer_draw)
    }
}

impl Handler<RespondDraw> for SessionActor {
    type Result = Result<(), SessionError>;

    fn handle(&mut self, msg: RespondDraw, _: &mut Self::Context) -> Self::Result {
        self.act(|session| session.respond_draw(msg.accept))
    }
}

impl Handler<Resign> for SessionActor {
    type Result = Result<(), SessionError>;

    fn handle(&mut self, _: Resign, _: &mut Self::Context) -> Self::Result {
        self.act(GameSession::resign)
    }
}

impl Handler<Leave> for SessionActor {
    type Result = Result<(), SessionError>;

    fn handle(&mut self, _: Leave, _: &mut Self::Context) -> Self::Result {
        // Anything still queued for the server goes out before the socket closes
        self.flush_outbound();
        let result = self.act(GameSession::leave);
        if result.is_ok() {
            self.close_channel();
        }
        result
    }
}

impl Handler<GetView> for SessionActor {
    type Result = MessageResult<GetView>;

    fn handle(&mut self, _: GetView, _: &mut Self::Context) -> Self::Result {
        MessageResult(self.session.view())
    }
}

impl Handler<LegalMoves> for SessionActor {
    type Result = MessageResult<LegalMoves>;

    fn handle(&mut self, msg: LegalMoves, _: &mut Self::Context) -> Self::Result {
        MessageResult(self.session.legal_moves_from(&msg.square))
    }
}

impl Handler<ServerMessage> for SessionActor {
    type Result = ();

    fn handle(&mut self, msg: ServerMessage, _: &mut Self::Context) {
        debug!("Server event {:?} for {}", msg.kind, msg.game_id);
        self.session.on_server_event(msg);
        self.settle(true);
    }
}

impl Handler<ChannelStatusChanged> for SessionActor {
    type Result = ();

    fn handle(&mut self, msg: ChannelStatusChanged, _: &mut Self::Context) {
        let connected = msg.status.is_connected();
        self.session.on_channel_status(msg.status, msg.cause);
        // Events requeued after a failed publish go out once connected again
        self.settle(connected);
    }
}

impl Handler<TransportFailed> for SessionActor {
    type Result = ();

    fn handle(&mut self, msg: TransportFailed, _: &mut Self::Context) {
        self.session.on_transport_error(msg.event, msg.error);
        self.settle(false);
    }
}

impl Handler<Tick> for SessionActor {
    type Result = ();

    fn handle(&mut self, _: Tick, _: &mut Self::Context) {
        let elapsed = self.session.config().tick_interval_ms.max(1);
        self.session.tick(elapsed);
        self.settle(false);
    }
}

impl Handler<Subscribe> for SessionActor {
    type Result = ();

    fn handle(&mut self, msg: Subscribe, _: &mut Self::Context) {
        info!("View {} subscribed", msg.id);
        let view = self.session.view();
        let push = ViewPush {
            message_type: "session",
            view: &view,
            notices: &[],
        };
        match serde_json::to_string(&push) {
            Ok(text) => msg.recipient.do_send(ChessWebSocketMessage(text)),
            Err(e) => warn!("Error serializing view: {}", e),
        }
        self.subscribers.insert(msg.id, msg.recipient);
    }
}

impl Handler<Unsubscribe> for SessionActor {
    type Result = ();

    fn handle(&mut self, msg: Unsubscribe, _: &mut Self::Context) {
        if self.subscribers.remove(&msg.id).is_some() {
            info!("View {} unsubscribed", msg.id);
        }
    }
}
