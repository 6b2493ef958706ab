pub mod actor;
pub mod event_log;
pub mod orchestrator;
pub mod snapshot;
pub mod storage;
pub mod timer;

pub use actor::SessionActor;
pub use orchestrator::{GameSession, SessionNotice, SessionView};
