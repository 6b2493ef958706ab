use chess::{Color, Piece};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One side of the board
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn opponent(self) -> Side {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::White => "white",
            Side::Black => "black",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::White => write!(f, "White"),
            Side::Black => write!(f, "Black"),
        }
    }
}

impl From<Color> for Side {
    fn from(color: Color) -> Self {
        match color {
            Color::White => Side::White,
            Color::Black => Side::Black,
        }
    }
}

impl From<Side> for Color {
    fn from(side: Side) -> Self {
        match side {
            Side::White => Color::White,
            Side::Black => Color::Black,
        }
    }
}

/// Piece type token, as used for promotions and captured-piece lists
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PieceKind {
    #[serde(rename = "p")]
    Pawn,
    #[serde(rename = "n")]
    Knight,
    #[serde(rename = "b")]
    Bishop,
    #[serde(rename = "r")]
    Rook,
    #[serde(rename = "q")]
    Queen,
    #[serde(rename = "k")]
    King,
}

impl From<Piece> for PieceKind {
    fn from(piece: Piece) -> Self {
        match piece {
            Piece::Pawn => PieceKind::Pawn,
            Piece::Knight => PieceKind::Knight,
            Piece::Bishop => PieceKind::Bishop,
            Piece::Rook => PieceKind::Rook,
            Piece::Queen => PieceKind::Queen,
            Piece::King => PieceKind::King,
        }
    }
}

impl From<PieceKind> for Piece {
    fn from(kind: PieceKind) -> Self {
        match kind {
            PieceKind::Pawn => Piece::Pawn,
            PieceKind::Knight => Piece::Knight,
            PieceKind::Bishop => Piece::Bishop,
            PieceKind::Rook => Piece::Rook,
            PieceKind::Queen => Piece::Queen,
            PieceKind::King => Piece::King,
        }
    }
}

/// Immutable board snapshot: FEN layout plus side to move
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub fen: String,
    pub turn: Side,
}

impl Position {
    pub fn starting() -> Self {
        Position {
            fen: chess::Board::default().to_string(),
            turn: Side::White,
        }
    }

    /// Compares piece placement, side to move, castling and en passant fields.
    /// Move counters are ignored since servers disagree on them.
    pub fn same_board(&self, other: &Position) -> bool {
        let ours: Vec<&str> = self.fen.split_whitespace().take(4).collect();
        let theirs: Vec<&str> = other.fen.split_whitespace().take(4).collect();
        ours == theirs
    }
}

/// A player seated in the game
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PlayerInfo {
    pub id: String,
    pub name: String,
    pub color: Side,
}

/// How a game ended
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Checkmate,
    Draw,
    Stalemate,
    Resignation,
    Timeout,
}

/// Terminal outcome, with the winning side when there is one
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameResult {
    pub kind: ResultKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<Side>,
}

impl GameResult {
    pub fn won(kind: ResultKind, winner: Side) -> Self {
        GameResult {
            kind,
            winner: Some(winner),
        }
    }

    pub fn drawn(kind: ResultKind) -> Self {
        GameResult { kind, winner: None }
    }

    pub fn describe(&self) -> String {
        match (self.kind, self.winner) {
            (ResultKind::Checkmate, Some(side)) => format!("Checkmate, {} wins", side),
            (ResultKind::Resignation, Some(side)) => {
                format!("{} resigned, {} wins", side.opponent(), side)
            }
            (ResultKind::Timeout, Some(side)) => {
                format!("{} ran out of time, {} wins", side.opponent(), side)
            }
            (ResultKind::Stalemate, _) => "Stalemate".to_string(),
            (ResultKind::Draw, _) => "Draw".to_string(),
            (kind, None) => format!("Game over ({:?})", kind),
            (kind, Some(side)) => format!("Game over ({:?}), {} wins", kind, side),
        }
    }
}

/// Outstanding draw offer
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawOffer {
    pub by: Side,
    pub pending: bool,
}

/// Aggregate state of one game, as the session sees it
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub game_id: String,
    pub position: Position,
    pub turn: Side,
    pub result: Option<GameResult>,
    pub players: Vec<PlayerInfo>,
    pub draw_offer: Option<DrawOffer>,
}

impl GameState {
    pub fn new(game_id: impl Into<String>, position: Position, players: Vec<PlayerInfo>) -> Self {
        let turn = position.turn;
        GameState {
            game_id: game_id.into(),
            position,
            turn,
            result: None,
            players,
            draw_offer: None,
        }
    }

    pub fn is_over(&self) -> bool {
        self.result.is_some()
    }

    pub fn player(&self, side: Side) -> Option<&PlayerInfo> {
        self.players.iter().find(|p| p.color == side)
    }

    /// Replaces the position wholesale, keeping `turn` in step with it.
    pub fn set_position(&mut self, position: Position) {
        self.turn = position.turn;
        self.position = position;
    }
}
