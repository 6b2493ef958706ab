use actix::dev::ToEnvelope;
use actix::prelude::*;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::error::SessionError;
use crate::models::app_state::AppState;
use crate::models::{ChessWebSocketMessage, ViewReply, ViewRequest};
use crate::session::actor::{
    GetView, Leave, LegalMoves, OfferDraw, Resign, RespondDraw, SessionActor, Subscribe, SubmitMove,
    Unsubscribe,
};
use crate::session::SessionView;

/// Full view sent on request
#[derive(Serialize)]
struct ViewSnapshot<'a> {
    message_type: &'static str,
    view: &'a SessionView,
}

/// WebSocket between the session and one open page
pub struct ChessWebSocket {
    pub id: String,
    pub session: Addr<SessionActor>,
}

impl Actor for ChessWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("View socket started: {}", self.id);
        self.session.do_send(Subscribe {
            id: self.id.clone(),
            recipient: ctx.address().recipient(),
        });
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        info!("View socket closed: {}", self.id);
        self.session.do_send(Unsubscribe { id: self.id.clone() });
        Running::Stop
    }
}

impl Handler<ChessWebSocketMessage> for ChessWebSocket {
    type Result = ();

    fn handle(&mut self, msg: ChessWebSocketMessage, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

// WebSocket message handler
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ChessWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ViewRequest>(text.as_ref()) {
                Ok(request) => {
                    info!("View request {} from {}", request.message_type, self.id);
                    self.handle_request(request, ctx);
                }
                Err(e) => {
                    warn!("Error parsing view request: {}", e);
                    reply(ctx, &ViewReply::error(format!("Invalid message format: {}", e)));
                }
            },
            Ok(ws::Message::Binary(_)) => {
                warn!("Binary messages are not supported");
                reply(ctx, &ViewReply::error("Binary messages are not supported"));
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            _ => {
                ctx.stop();
            }
        }
    }
}

fn reply(ctx: &mut ws::WebsocketContext<ChessWebSocket>, message: &ViewReply) {
    match serde_json::to_string(message) {
        Ok(text) => ctx.text(text),
        Err(e) => warn!("Error serializing reply: {}", e),
    }
}

impl ChessWebSocket {
    pub fn handle_request(&mut self, request: ViewRequest, ctx: &mut ws::WebsocketContext<Self>) {
        match request.message_type.as_str() {
            "move" => match (request.move_from, request.move_to) {
                (Some(from), Some(to)) => self.forward(
                    SubmitMove {
                        from,
                        to,
                        promotion: request.promote_to,
                    },
                    ctx,
                ),
                _ => reply(ctx, &ViewReply::error("Move requires from and to positions")),
            },
            "get_moves" => match request.square.or(request.move_from) {
                Some(square) => self.handle_get_moves(square, ctx),
                None => reply(ctx, &ViewReply::error("Get moves requires a square")),
            },
            "offer_draw" => self.forward(OfferDraw, ctx),
            "respond_draw" => match request.accept {
                Some(accept) => self.forward(RespondDraw { accept }, ctx),
                None => reply(ctx, &ViewReply::error("Draw response requires accept")),
            },
            "resign" => self.forward(Resign, ctx),
            "leave" => self.forward(Leave, ctx),
            "snapshot" => self.handle_snapshot(ctx),
            other => {
                warn!("Unknown message type: {}", other);
                reply(ctx, &ViewReply::error(format!("Unknown message type: {}", other)));
            }
        }
    }

    /// Sends an action to the session and answers only refusals. The
    /// resulting state arrives with the next view push.
    fn forward<M>(&self, msg: M, ctx: &mut ws::WebsocketContext<Self>)
    where
        M: Message<Result = Result<(), SessionError>> + Send + 'static,
        SessionActor: Handler<M>,
        <SessionActor as Actor>::Context: ToEnvelope<SessionActor, M>,
    {
        let request = self.session.send(msg).into_actor(self).map(|res, _, ctx| {
            let error = match res {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e.to_string(),
                Err(e) => format!("Session unavailable: {}", e),
            };
            reply(ctx, &ViewReply::error(error));
        });
        ctx.spawn(request);
    }

    fn handle_get_moves(&self, square: String, ctx: &mut ws::WebsocketContext<Self>) {
        let request = self
            .session
            .send(LegalMoves { square })
            .into_actor(self)
            .map(|res, _, ctx| match res {
                Ok(moves) => reply(ctx, &ViewReply::available_moves(moves)),
                Err(e) => reply(ctx, &ViewReply::error(format!("Session unavailable: {}", e))),
            });
        ctx.spawn(request);
    }

    fn handle_snapshot(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let request = self.session.send(GetView).into_actor(self).map(|res, _, ctx| match res {
            Ok(view) => match serde_json::to_string(&ViewSnapshot {
                message_type: "session",
                view: &view,
            }) {
                Ok(text) => ctx.text(text),
                Err(e) => warn!("Error serializing view: {}", e),
            },
            Err(e) => reply(ctx, &ViewReply::error(format!("Session unavailable: {}", e))),
        });
        ctx.spawn(request);
    }
}

/// WebSocket connection handler
pub async fn ws_index(req: HttpRequest, stream: web::Payload, app_state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let id = Uuid::new_v4().to_string();
    info!("New view connection: {}", id);

    let ws = ChessWebSocket {
        id,
        session: app_state.session.clone(),
    };

    ws::start(ws, &req, stream)
}
