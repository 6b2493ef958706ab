use log::warn;
use serde::{Deserialize, Serialize};

use crate::models::{GameState, Position, Side};
use crate::session::storage::{load_json, save_json, LocalStore, SESSION_KEY};

/// Last-known session identity, persisted so a reload reconnects into the
/// same game
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub game_id: String,
    pub state: GameState,
    /// Last position the server confirmed
    pub confirmed: Position,
    pub local_side: Option<Side>,
    pub white_ms: u64,
    pub black_ms: u64,
}

impl SessionSnapshot {
    pub fn load(store: &dyn LocalStore) -> Option<SessionSnapshot> {
        let snapshot: SessionSnapshot = load_json(store, SESSION_KEY)?;
        if snapshot.game_id.is_empty() || snapshot.game_id != snapshot.state.game_id {
            warn!("[SESSION] Ignoring snapshot with inconsistent game id");
            return None;
        }
        Some(snapshot)
    }

    pub fn save(&self, store: &dyn LocalStore) {
        if let Err(e) = save_json(store, SESSION_KEY, self) {
            warn!("[SESSION] Failed to persist session for {}: {}", self.game_id, e);
        }
    }

    pub fn clear(store: &dyn LocalStore) {
        if let Err(e) = store.remove(SESSION_KEY) {
            warn!("[SESSION] Failed to clear persisted session: {}", e);
        }
    }
}
