use actix::Addr;
use std::path::PathBuf;

use crate::session::SessionActor;

/// Application state shared between HTTP workers
pub struct AppState {
    pub session: Addr<SessionActor>,
    pub static_dir: PathBuf,
}

impl AppState {
    pub fn new(session: Addr<SessionActor>, static_dir: impl Into<PathBuf>) -> Self {
        AppState {
            session,
            static_dir: static_dir.into(),
        }
    }
}
