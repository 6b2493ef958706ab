//! Captured pieces, derived from what is missing on the board.
//!
//! Each side's on-board material is subtracted from the starting material and
//! every missing unit is credited to the opponent. This is recomputed from
//! scratch for every position; nothing is tracked move by move.
//!
//! Promotions are not reversed. A pawn that promoted to, say, a queen shows up
//! as a missing pawn (credited to the opponent as a capture) while the surplus
//! queen is simply not counted, because a deficit never goes below zero.
//! Board diffs carry no piece provenance, so a promoted piece cannot be told
//! apart from an original one.

use chess::Board;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::game::utils::MaterialCount;
use crate::models::{PieceKind, Position, Side};

/// Display order of captured pieces, least valuable first
const ORDER: [PieceKind; 5] = [
    PieceKind::Pawn,
    PieceKind::Knight,
    PieceKind::Bishop,
    PieceKind::Rook,
    PieceKind::Queen,
];

/// Pieces captured by each side
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct CapturedPieces {
    /// Black pieces captured by white
    pub white: Vec<PieceKind>,
    /// White pieces captured by black
    pub black: Vec<PieceKind>,
}

impl CapturedPieces {
    pub fn by(&self, side: Side) -> &[PieceKind] {
        match side {
            Side::White => &self.white,
            Side::Black => &self.black,
        }
    }

    pub fn count(&self, side: Side, kind: PieceKind) -> u32 {
        self.by(side).iter().filter(|k| **k == kind).count() as u32
    }
}

/// Recomputes captured pieces for a position. An unparseable position yields
/// no captures.
pub fn derive(position: &Position) -> CapturedPieces {
    match Board::from_str(&position.fen) {
        Ok(board) => derive_from_board(&board),
        Err(_) => CapturedPieces::default(),
    }
}

pub fn derive_from_board(board: &Board) -> CapturedPieces {
    CapturedPieces {
        white: missing(MaterialCount::of(board, Side::Black)),
        black: missing(MaterialCount::of(board, Side::White)),
    }
}

fn missing(on_board: MaterialCount) -> Vec<PieceKind> {
    ORDER
        .iter()
        .flat_map(|kind| {
            let deficit = MaterialCount::INITIAL
                .get(*kind)
                .saturating_sub(on_board.get(*kind));
            std::iter::repeat(*kind).take(deficit as usize)
        })
        .collect()
}
