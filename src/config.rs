use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Tunables of one game session
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    pub tick_interval_ms: u64,
    pub low_time_threshold_ms: u64,
    pub log_capacity: usize,
    pub outbox_capacity: usize,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub storage_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            tick_interval_ms: 1000,
            low_time_threshold_ms: 60_000,
            log_capacity: 100,
            outbox_capacity: 64,
            reconnect_base_ms: 500,
            reconnect_max_ms: 15_000,
            storage_dir: None,
        }
    }
}

impl SessionConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// Game server the session synchronizes with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub url: String,
    pub token: Option<String>,
}

/// Where and how the realtime channel connects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub server_url: String,
    pub game_id: String,
    pub token: Option<String>,
    pub outbox_capacity: usize,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
}

impl ChannelConfig {
    pub fn new(server_url: impl Into<String>, game_id: impl Into<String>, token: Option<String>, config: &SessionConfig) -> Self {
        ChannelConfig {
            server_url: server_url.into(),
            game_id: game_id.into(),
            token,
            outbox_capacity: config.outbox_capacity,
            reconnect_base_ms: config.reconnect_base_ms,
            reconnect_max_ms: config.reconnect_max_ms,
        }
    }

    /// Websocket endpoint of the game
    pub fn endpoint(&self) -> String {
        format!("{}/games/{}/ws", self.server_url.trim_end_matches('/'), self.game_id)
    }
}

/// Command line of the session host
#[derive(Parser, Debug, Clone)]
#[command(name = "chess_session", about = "Attach to a chess game and serve it to a local page")]
pub struct Cli {
    /// Base URL of the game server, e.g. ws://localhost:9000
    #[arg(long)]
    pub server_url: Option<String>,

    /// Bearer token for the game server
    #[arg(long, env = "CHESS_SESSION_TOKEN")]
    pub token: Option<String>,

    /// Game to attach to; falls back to the persisted session
    #[arg(long)]
    pub game_id: Option<String>,

    /// Address the host page server binds to
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub bind: String,

    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 1000)]
    pub tick_ms: u64,

    #[arg(long, default_value_t = 100)]
    pub log_capacity: usize,

    /// Directory served under /static
    #[arg(long)]
    pub static_dir: Option<PathBuf>,
}

impl Cli {
    /// `None` runs the session offline
    pub fn server(&self) -> Option<ServerEndpoint> {
        self.server_url.clone().map(|url| ServerEndpoint {
            url,
            token: self.token.clone(),
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            tick_interval_ms: self.tick_ms,
            log_capacity: self.log_capacity,
            storage_dir: self.storage_dir.clone(),
            ..SessionConfig::default()
        }
    }
}
