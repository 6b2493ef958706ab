use actix::Message;
use serde::{Deserialize, Serialize};

use crate::models::game_state::{GameResult, PieceKind, PlayerInfo, Position, Side};

/// Event sent from this client to the game server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    MoveSubmitted {
        game_id: String,
        from: String,
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        promotion: Option<PieceKind>,
    },
    DrawOffered {
        game_id: String,
    },
    DrawResponded {
        game_id: String,
        accept: bool,
    },
    Resignation {
        game_id: String,
    },
}

impl ClientEvent {
    pub fn game_id(&self) -> &str {
        match self {
            ClientEvent::MoveSubmitted { game_id, .. }
            | ClientEvent::DrawOffered { game_id }
            | ClientEvent::DrawResponded { game_id, .. }
            | ClientEvent::Resignation { game_id } => game_id,
        }
    }
}

/// Kinds of event the game server pushes
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ServerEventKind {
    GameState,
    MoveApplied,
    MoveRejected,
    ClockUpdate,
    DrawOfferReceived,
    DrawDeclined,
    GameEnded,
    OpponentConnected,
    OpponentDisconnected,
}

/// Event received from the game server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Message)]
#[rtype(result = "()")]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub kind: ServerEventKind,
    pub game_id: String,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub turn: Option<Side>,
    #[serde(default)]
    pub white_ms: Option<u64>,
    #[serde(default)]
    pub black_ms: Option<u64>,
    #[serde(default)]
    pub result: Option<GameResult>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub promotion: Option<PieceKind>,
    #[serde(default)]
    pub color: Option<Side>,
    #[serde(default)]
    pub players: Option<Vec<PlayerInfo>>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ServerMessage {
    /// Bare event of the given kind; fields are filled in by the caller.
    pub fn new(kind: ServerEventKind, game_id: impl Into<String>) -> Self {
        ServerMessage {
            kind,
            game_id: game_id.into(),
            position: None,
            turn: None,
            white_ms: None,
            black_ms: None,
            result: None,
            from: None,
            to: None,
            promotion: None,
            color: None,
            players: None,
            reason: None,
        }
    }

    /// Position carried by the event. The side to move comes from `turn` when
    /// present, otherwise from the FEN itself.
    pub fn position(&self) -> Option<Position> {
        let fen = self.position.clone()?;
        let turn = self.turn.or_else(|| side_from_fen(&fen))?;
        Some(Position { fen, turn })
    }

    pub fn clocks(&self) -> Option<(u64, u64)> {
        match (self.white_ms, self.black_ms) {
            (Some(white), Some(black)) => Some((white, black)),
            _ => None,
        }
    }
}

fn side_from_fen(fen: &str) -> Option<Side> {
    match fen.split_whitespace().nth(1) {
        Some("w") => Some(Side::White),
        Some("b") => Some(Side::Black),
        _ => None,
    }
}

/// Request sent from the host page over the view socket
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ViewRequest {
    pub message_type: String,
    #[serde(default)]
    pub move_from: Option<String>,
    #[serde(default)]
    pub move_to: Option<String>,
    #[serde(default)]
    pub promote_to: Option<PieceKind>,
    #[serde(default)]
    pub square: Option<String>,
    #[serde(default)]
    pub accept: Option<bool>,
}

/// Reply sent to the host page for requests that are not plain view pushes
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ViewReply {
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_moves: Option<Vec<String>>,
}

impl ViewReply {
    pub fn error(message: impl Into<String>) -> Self {
        ViewReply {
            message_type: "error".to_string(),
            error: Some(message.into()),
            available_moves: None,
        }
    }

    pub fn available_moves(moves: Vec<String>) -> Self {
        ViewReply {
            message_type: "available_moves".to_string(),
            error: None,
            available_moves: Some(moves),
        }
    }
}

/// Message type for WebSocket communication
#[derive(Message)]
#[rtype(result = "()")]
pub struct ChessWebSocketMessage(pub String);
