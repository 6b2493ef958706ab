//! Adapter over the `chess` crate's move generator.
//!
//! The session never implements chess rules itself. It asks a [`RulesEngine`]
//! whether a move is legal, what position it produces, and whether that
//! position ends the game.

use chess::{Board, BoardStatus, ChessMove, MoveGen, Piece, Rank, Square};
use std::collections::BTreeSet;
use std::str::FromStr;

use crate::error::{Result, SessionError};
use crate::game::utils::has_insufficient_material;
use crate::models::{PieceKind, Position, Side};

/// Terminal classification of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    None,
    Checkmate,
    Draw,
    Stalemate,
}

/// Pure, deterministic chess rules oracle
pub trait RulesEngine {
    fn apply_move(
        &self,
        position: &Position,
        from: &str,
        to: &str,
        promotion: Option<PieceKind>,
    ) -> Result<Position>;

    fn classify_terminal(&self, position: &Position) -> Terminal;

    fn legal_moves_from(&self, position: &Position, square: &str) -> BTreeSet<String>;

    /// The promotion piece `apply_move` would use for this move: `requested`
    /// if given, otherwise the default for a pawn reaching the last rank.
    fn promotion_for(
        &self,
        position: &Position,
        from: &str,
        to: &str,
        requested: Option<PieceKind>,
    ) -> Option<PieceKind>;
}

/// Rules engine backed by the `chess` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct ChessRules;

impl ChessRules {
    fn board(position: &Position) -> Option<Board> {
        Board::from_str(&position.fen).ok()
    }
}

fn parse_square(square: &str) -> Option<Square> {
    Square::from_str(&square.trim().to_lowercase()).ok()
}

fn to_position(board: &Board) -> Position {
    Position {
        fen: board.to_string(),
        turn: Side::from(board.side_to_move()),
    }
}

impl RulesEngine for ChessRules {
    fn apply_move(
        &self,
        position: &Position,
        from: &str,
        to: &str,
        promotion: Option<PieceKind>,
    ) -> Result<Position> {
        let board = Self::board(position).ok_or_else(|| SessionError::illegal(from, to, "invalid position"))?;
        let (source, dest) = match (parse_square(from), parse_square(to)) {
            (Some(source), Some(dest)) => (source, dest),
            _ => return Err(SessionError::illegal(from, to, "invalid square")),
        };

        let promotion = match promotion {
            Some(PieceKind::Pawn) | Some(PieceKind::King) => {
                return Err(SessionError::illegal(from, to, "invalid promotion piece"));
            }
            Some(kind) => Some(Piece::from(kind)),
            // Pawn reaching the last rank promotes to a queen by default
            None if is_promoting_pawn(&board, source, dest) => Some(Piece::Queen),
            None => None,
        };

        let chess_move = ChessMove::new(source, dest, promotion);
        if !board.legal(chess_move) {
            return Err(SessionError::illegal(from, to, "not a legal move"));
        }

        Ok(to_position(&board.make_move_new(chess_move)))
    }

    fn classify_terminal(&self, position: &Position) -> Terminal {
        let board = match Self::board(position) {
            Some(board) => board,
            None => return Terminal::None,
        };
        match board.status() {
            BoardStatus::Checkmate => Terminal::Checkmate,
            BoardStatus::Stalemate => Terminal::Stalemate,
            BoardStatus::Ongoing if has_insufficient_material(&board) => Terminal::Draw,
            BoardStatus::Ongoing => Terminal::None,
        }
    }

    fn legal_moves_from(&self, position: &Position, square: &str) -> BTreeSet<String> {
        let (board, source) = match (Self::board(position), parse_square(square)) {
            (Some(board), Some(source)) => (board, source),
            _ => return BTreeSet::new(),
        };
        MoveGen::new_legal(&board)
            .filter(|m| m.get_source() == source)
            .map(|m| m.get_dest().to_string())
            .collect()
    }

    fn promotion_for(
        &self,
        position: &Position,
        from: &str,
        to: &str,
        requested: Option<PieceKind>,
    ) -> Option<PieceKind> {
        if requested.is_some() {
            return requested;
        }
        let board = Self::board(position)?;
        let (source, dest) = (parse_square(from)?, parse_square(to)?);
        is_promoting_pawn(&board, source, dest).then_some(PieceKind::Queen)
    }
}

fn is_promoting_pawn(board: &Board, source: Square, dest: Square) -> bool {
    board.piece_on(source) == Some(Piece::Pawn)
        && (dest.get_rank() == Rank::Eighth || dest.get_rank() == Rank::First)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(fen: &str) -> Position {
        let turn = if fen.split_whitespace().nth(1) == Some("b") {
            Side::Black
        } else {
            Side::White
        };
        Position {
            fen: fen.to_string(),
            turn,
        }
    }

    #[test]
    fn test_apply_legal_move() {
        let next = ChessRules
            .apply_move(&Position::starting(), "e2", "e4", None)
            .expect("e2e4 is legal");
        assert_eq!(next.turn, Side::Black);
        assert!(next.fen.starts_with("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b"));
    }

    #[test]
    fn test_squares_are_case_insensitive() {
        assert!(ChessRules.apply_move(&Position::starting(), "G1", "F3", None).is_ok());
    }

    #[test]
    fn test_illegal_move_is_rejected() {
        let err = ChessRules
            .apply_move(&Position::starting(), "e2", "e5", None)
            .unwrap_err();
        assert!(matches!(err, SessionError::IllegalMove { .. }));
    }

    #[test]
    fn test_moving_opponent_piece_is_rejected() {
        assert!(ChessRules.apply_move(&Position::starting(), "e7", "e5", None).is_err());
    }

    #[test]
    fn test_garbage_input_is_rejected_not_panicking() {
        assert!(ChessRules.apply_move(&Position::starting(), "z9", "e4", None).is_err());
        assert!(ChessRules.apply_move(&position("not a fen"), "e2", "e4", None).is_err());
    }

    #[test]
    fn test_promotion_defaults_to_queen() {
        let start = position("8/4P3/8/8/8/8/k7/4K3 w - - 0 1");
        let next = ChessRules.apply_move(&start, "e7", "e8", None).unwrap();
        assert!(next.fen.starts_with("4Q3/"), "Got {}", next.fen);
        let knight = ChessRules
            .apply_move(&start, "e7", "e8", Some(PieceKind::Knight))
            .unwrap();
        assert!(knight.fen.starts_with("4N3/"), "Got {}", knight.fen);
    }

    #[test]
    fn test_promotion_for_reports_the_default() {
        let start = position("8/4P3/8/8/8/8/k7/4K3 w - - 0 1");
        assert_eq!(ChessRules.promotion_for(&start, "e7", "e8", None), Some(PieceKind::Queen));
        assert_eq!(
            ChessRules.promotion_for(&start, "e7", "e8", Some(PieceKind::Rook)),
            Some(PieceKind::Rook)
        );
        assert_eq!(ChessRules.promotion_for(&start, "e1", "d1", None), None, "Not a pawn move");
        assert_eq!(ChessRules.promotion_for(&start, "zz", "e8", None), None);
    }

    #[test]
    fn test_classify_checkmate() {
        // Fool's mate
        let mated = position("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3");
        assert_eq!(ChessRules.classify_terminal(&mated), Terminal::Checkmate);
    }

    #[test]
    fn test_classify_stalemate() {
        let stale = position("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1");
        assert_eq!(ChessRules.classify_terminal(&stale), Terminal::Stalemate);
    }

    #[test]
    fn test_classify_insufficient_material_draw() {
        let bare = position("8/8/4k3/8/8/3K4/8/8 w - - 0 1");
        assert_eq!(ChessRules.classify_terminal(&bare), Terminal::Draw);
        assert_eq!(ChessRules.classify_terminal(&Position::starting()), Terminal::None);
    }

    #[test]
    fn test_legal_moves_from_knight() {
        let moves = ChessRules.legal_moves_from(&Position::starting(), "b1");
        let expected: BTreeSet<String> = ["a3", "c3"].iter().map(|s| s.to_string()).collect();
        assert_eq!(moves, expected);
    }

    #[test]
    fn test_legal_moves_from_empty_square() {
        assert!(ChessRules.legal_moves_from(&Position::starting(), "e4").is_empty());
    }
}
