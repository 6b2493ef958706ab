pub mod app_state;
pub mod connection;
pub mod game_state;
pub mod messages;

// Re-export important types
pub use connection::*;
pub use game_state::*;
pub use messages::*;
