pub mod captured;
pub mod rules;
pub mod utils;

pub use rules::{ChessRules, RulesEngine, Terminal};
