use chess::{BitBoard, Board, Color, Piece};

use crate::models::{PieceKind, Side};

/// Non-king material one side has on the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaterialCount {
    pub pawns: u32,
    pub knights: u32,
    pub bishops: u32,
    pub rooks: u32,
    pub queens: u32,
}

impl MaterialCount {
    /// What each side starts the game with
    pub const INITIAL: MaterialCount = MaterialCount {
        pawns: 8,
        knights: 2,
        bishops: 2,
        rooks: 2,
        queens: 1,
    };

    pub fn of(board: &Board, side: Side) -> Self {
        let color: Color = side.into();
        let count = |piece: Piece| (*board.pieces(piece) & *board.color_combined(color)).popcnt();
        MaterialCount {
            pawns: count(Piece::Pawn),
            knights: count(Piece::Knight),
            bishops: count(Piece::Bishop),
            rooks: count(Piece::Rook),
            queens: count(Piece::Queen),
        }
    }

    pub fn get(&self, kind: PieceKind) -> u32 {
        match kind {
            PieceKind::Pawn => self.pawns,
            PieceKind::Knight => self.knights,
            PieceKind::Bishop => self.bishops,
            PieceKind::Rook => self.rooks,
            PieceKind::Queen => self.queens,
            PieceKind::King => 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.pawns + self.knights + self.bishops + self.rooks + self.queens
    }

    fn is_bare_king(&self) -> bool {
        self.total() == 0
    }

    fn is_lone_minor(&self) -> bool {
        self.total() == 1 && (self.knights == 1 || self.bishops == 1)
    }

    fn is_lone_bishop(&self) -> bool {
        self.total() == 1 && self.bishops == 1
    }
}

/// Check if the board has insufficient material for checkmate
pub fn has_insufficient_material(board: &Board) -> bool {
    let white = MaterialCount::of(board, Side::White);
    let black = MaterialCount::of(board, Side::Black);

    // King vs King
    if white.is_bare_king() && black.is_bare_king() {
        return true;
    }

    // King and minor piece vs King
    if (white.is_lone_minor() && black.is_bare_king()) || (black.is_lone_minor() && white.is_bare_king()) {
        return true;
    }

    // King and Bishop vs King and Bishop, bishops on the same square colour
    if white.is_lone_bishop() && black.is_lone_bishop() {
        let bishops = *board.pieces(Piece::Bishop);
        return light_squares(bishops) == 0 || dark_squares(bishops) == 0;
    }

    false
}

fn light_squares(bits: BitBoard) -> usize {
    bits.filter(|sq| (sq.get_rank().to_index() + sq.get_file().to_index()) % 2 == 1)
        .count()
}

fn dark_squares(bits: BitBoard) -> usize {
    bits.filter(|sq| (sq.get_rank().to_index() + sq.get_file().to_index()) % 2 == 0)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_initial_material() {
        let board = Board::default();
        assert_eq!(MaterialCount::of(&board, Side::White), MaterialCount::INITIAL);
        assert_eq!(MaterialCount::of(&board, Side::Black), MaterialCount::INITIAL);
        assert_eq!(MaterialCount::INITIAL.total(), 15);
    }

    #[test]
    fn test_bare_kings_are_insufficient() {
        let board = Board::from_str("8/8/4k3/8/8/3K4/8/8 w - - 0 1").unwrap();
        assert!(has_insufficient_material(&board));
    }

    #[test]
    fn test_king_and_knight_is_insufficient() {
        let board = Board::from_str("8/8/4k3/8/8/3K4/5N2/8 w - - 0 1").unwrap();
        assert!(has_insufficient_material(&board));
    }

    #[test]
    fn test_king_and_rook_is_sufficient() {
        let board = Board::from_str("8/8/4k3/8/8/3K4/5R2/8 w - - 0 1").unwrap();
        assert!(!has_insufficient_material(&board));
    }

    #[test]
    fn test_same_coloured_bishops_are_insufficient() {
        // c1 and f4 are both dark squares
        let board = Board::from_str("8/8/4k3/8/5b2/3K4/8/2B5 w - - 0 1").unwrap();
        assert!(has_insufficient_material(&board));
    }

    #[test]
    fn test_opposite_coloured_bishops_are_sufficient() {
        // c1 dark, f5 light
        let board = Board::from_str("8/8/4k3/5b2/8/K7/8/2B5 w - - 0 1").unwrap();
        assert!(!has_insufficient_material(&board));
    }
}
