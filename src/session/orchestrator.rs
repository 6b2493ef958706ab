//! The game session: one coherent view of a game built from the rules engine,
//! the clocks, the captured-piece deriver and the event log, kept in step with
//! an authoritative server.
//!
//! Local moves are applied optimistically and marked pending. The server's
//! answer either confirms the pending move or replaces it, in which case the
//! session rolls back to the last confirmed position first. The session never
//! touches the network itself: outbound events and notices are queued and
//! drained by whoever hosts it.

use log::{debug, info, warn};
use serde::Serialize;
use std::rc::Rc;

use crate::config::SessionConfig;
use crate::error::{Result, SessionError, TransportError};
use crate::game::captured::{self, CapturedPieces};
use crate::game::rules::{RulesEngine, Terminal};
use crate::models::{
    ClientEvent, ConnectionStatus, DrawOffer, GameResult, GameState, PieceKind, Position, ResultKind,
    ServerEventKind, ServerMessage, Side,
};
use crate::session::event_log::{EventLog, LogColor, LogEntry};
use crate::session::snapshot::SessionSnapshot;
use crate::session::storage::LocalStore;
use crate::session::timer::{ClockPhase, GameTimer};

/// Something the host should surface to the user
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "notice", content = "detail", rename_all = "kebab-case")]
pub enum SessionNotice {
    TimeExpired(Side),
    Reconciliation(String),
    ConnectivityDegraded(String),
    ConnectivityRestored,
    OpponentConnected,
    OpponentDisconnected,
    DrawOffered(Side),
    DrawDeclined,
    GameEnded(GameResult),
}

/// Local move applied ahead of server confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMove {
    pub from: String,
    pub to: String,
    pub promotion: Option<PieceKind>,
    pub provisional: Position,
}

impl PendingMove {
    fn matches(&self, from: Option<&str>, to: Option<&str>) -> bool {
        let same = |a: &str, b: Option<&str>| b.map_or(false, |b| a.eq_ignore_ascii_case(b));
        same(&self.from, from) && same(&self.to, to)
    }
}

/// Clock state as rendered by the host
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerView {
    pub white_time_remaining_ms: u64,
    pub black_time_remaining_ms: u64,
    pub white_phase: ClockPhase,
    pub black_phase: ClockPhase,
    pub is_running: bool,
    pub white_low_time: bool,
    pub black_low_time: bool,
}

/// Everything the host page needs to render the session
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub game_id: Option<String>,
    pub local_side: Option<Side>,
    pub state: Option<GameState>,
    pub timer: TimerView,
    pub captured: CapturedPieces,
    pub log: Vec<LogEntry>,
    pub connection: ConnectionStatus,
    pub pending_move: bool,
}

pub struct GameSession {
    rules: Box<dyn RulesEngine>,
    config: SessionConfig,
    store: Rc<dyn LocalStore>,
    game_id: Option<String>,
    state: Option<GameState>,
    confirmed: Option<Position>,
    local_side: Option<Side>,
    pending: Option<PendingMove>,
    timer: GameTimer,
    captured: CapturedPieces,
    log: EventLog,
    connection: ConnectionStatus,
    outbound: Vec<ClientEvent>,
    /// Events the channel refused, oldest first
    retry: Vec<ClientEvent>,
    notices: Vec<SessionNotice>,
}

impl GameSession {
    /// Unattached session with its event log hydrated from storage.
    pub fn new(rules: Box<dyn RulesEngine>, store: Rc<dyn LocalStore>, config: SessionConfig) -> Self {
        let log = EventLog::load(store.clone(), config.log_capacity);
        GameSession {
            rules,
            config,
            store,
            game_id: None,
            state: None,
            confirmed: None,
            local_side: None,
            pending: None,
            timer: GameTimer::default(),
            captured: CapturedPieces::default(),
            log,
            connection: ConnectionStatus::Offline,
            outbound: Vec::new(),
            retry: Vec::new(),
            notices: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn game_id(&self) -> Option<&str> {
        self.game_id.as_deref()
    }

    pub fn is_attached(&self) -> bool {
        self.game_id.is_some()
    }

    pub fn state(&self) -> Option<&GameState> {
        self.state.as_ref()
    }

    pub fn confirmed_position(&self) -> Option<&Position> {
        self.confirmed.as_ref()
    }

    pub fn local_side(&self) -> Option<Side> {
        self.local_side
    }

    pub fn pending_move(&self) -> Option<&PendingMove> {
        self.pending.as_ref()
    }

    pub fn timer(&self) -> &GameTimer {
        &self.timer
    }

    pub fn captured(&self) -> &CapturedPieces {
        &self.captured
    }

    pub fn log(&self) -> &[LogEntry] {
        self.log.entries()
    }

    pub fn connection(&self) -> ConnectionStatus {
        self.connection
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Drains events for the server: refused ones first, in their original
    /// order, then newly queued ones.
    pub fn take_outbound(&mut self) -> Vec<ClientEvent> {
        let mut events = std::mem::take(&mut self.retry);
        events.append(&mut self.outbound);
        events
    }

    pub fn take_notices(&mut self) -> Vec<SessionNotice> {
        std::mem::take(&mut self.notices)
    }

    pub fn view(&self) -> SessionView {
        let threshold = self.config.low_time_threshold_ms;
        SessionView {
            game_id: self.game_id.clone(),
            local_side: self.local_side,
            state: self.state.clone(),
            timer: TimerView {
                white_time_remaining_ms: self.timer.white_time_remaining_ms,
                black_time_remaining_ms: self.timer.black_time_remaining_ms,
                white_phase: self.timer.phase(Side::White),
                black_phase: self.timer.phase(Side::Black),
                is_running: self.timer.is_running(),
                white_low_time: self.timer.is_low_time(Side::White, threshold),
                black_low_time: self.timer.is_low_time(Side::Black, threshold),
            },
            captured: self.captured.clone(),
            log: self.log.entries().to_vec(),
            connection: self.connection,
            pending_move: self.pending.is_some(),
        }
    }

    // ------------------------------------------------------------------
    // Attach / detach
    // ------------------------------------------------------------------

    /// Resolves which game to operate on. An explicit id wins over the
    /// persisted session; with neither, the session stays unattached and no
    /// game is synthesized.
    pub fn resume(&mut self, game_id: Option<String>) -> Option<&str> {
        let snapshot = SessionSnapshot::load(self.store.as_ref());
        match (game_id, snapshot) {
            (Some(id), Some(snapshot)) if snapshot.game_id == id => self.hydrate(snapshot),
            (Some(id), stale) => {
                if stale.is_some() {
                    // A different game replaces the persisted one
                    SessionSnapshot::clear(self.store.as_ref());
                    self.log.clear();
                }
                info!("Attaching to game {}", id);
                self.log.append(format!("Joining game {}", id), LogColor::Info);
                self.game_id = Some(id);
            }
            (None, Some(snapshot)) => self.hydrate(snapshot),
            (None, None) => {
                info!("No game to resume; session is unattached");
                SessionSnapshot::clear(self.store.as_ref());
            }
        }
        self.game_id()
    }

    fn hydrate(&mut self, snapshot: SessionSnapshot) {
        info!("Resuming game {}", snapshot.game_id);
        let mut state = snapshot.state;
        if !state.position.same_board(&snapshot.confirmed) {
            // The reload interrupted an unconfirmed move; the server will resend it if it stuck
            warn!("Dropping unconfirmed move from persisted session {}", snapshot.game_id);
            state.set_position(snapshot.confirmed.clone());
            state.result = None;
        }
        self.captured = captured::derive(&state.position);
        self.timer = GameTimer::new(snapshot.white_ms, snapshot.black_ms);
        self.local_side = snapshot.local_side;
        self.confirmed = Some(snapshot.confirmed);
        self.game_id = Some(snapshot.game_id.clone());
        self.state = Some(state);
        self.pending = None;
        self.log
            .append(format!("Resumed game {}", snapshot.game_id), LogColor::Info);
    }

    /// Detaches from a finished game and forgets the persisted session.
    pub fn leave(&mut self) -> Result<()> {
        if let Some(state) = &self.state {
            if !state.is_over() {
                return Err(SessionError::invalid_turn("game is still in progress"));
            }
        }
        if let Some(id) = self.game_id.take() {
            info!("Leaving game {}", id);
            self.log.append(format!("Left game {}", id), LogColor::Info);
        }
        SessionSnapshot::clear(self.store.as_ref());
        self.state = None;
        self.confirmed = None;
        self.local_side = None;
        self.pending = None;
        self.timer = GameTimer::default();
        self.captured = CapturedPieces::default();
        self.outbound.clear();
        self.retry.clear();
        self.connection = ConnectionStatus::Offline;
        Ok(())
    }

    fn persist(&self) {
        let (Some(game_id), Some(state), Some(confirmed)) = (&self.game_id, &self.state, &self.confirmed) else {
            return;
        };
        SessionSnapshot {
            game_id: game_id.clone(),
            state: state.clone(),
            confirmed: confirmed.clone(),
            local_side: self.local_side,
            white_ms: self.timer.white_time_remaining_ms,
            black_ms: self.timer.black_time_remaining_ms,
        }
        .save(self.store.as_ref());
    }

    /// Side whose clock should run: nobody once the game is over or while a
    /// local move awaits confirmation.
    fn active_side(&self) -> Option<Side> {
        let state = self.state.as_ref()?;
        if state.is_over() || self.pending.is_some() {
            return None;
        }
        Some(state.turn)
    }

    fn active_game(&self) -> Result<&GameState> {
        let state = self.state.as_ref().ok_or(SessionError::NotAttached)?;
        if state.is_over() {
            return Err(SessionError::invalid_turn("the game is over"));
        }
        Ok(state)
    }

    fn seat(&self) -> Result<Side> {
        self.local_side
            .ok_or_else(|| SessionError::invalid_turn("not seated in this game"))
    }

    // ------------------------------------------------------------------
    // Local actions
    // ------------------------------------------------------------------

    /// Applies a local move optimistically and queues it for the server.
    pub fn submit_move(&mut self, from: &str, to: &str, promotion: Option<PieceKind>) -> Result<Position> {
        let state = self.active_game()?;
        let local = self.seat()?;
        if self.pending.is_some() {
            return Err(SessionError::invalid_turn("previous move is awaiting confirmation"));
        }
        if state.turn != local {
            return Err(SessionError::invalid_turn(format!("it is {}'s turn", state.turn)));
        }

        let promotion = self.rules.promotion_for(&state.position, from, to, promotion);
        let next = match self.rules.apply_move(&state.position, from, to, promotion) {
            Ok(next) => next,
            Err(e) => {
                warn!("Rejected local move: {}", e);
                return Err(e);
            }
        };
        let game_id = state.game_id.clone();

        self.timer.stop();
        self.pending = Some(PendingMove {
            from: from.to_lowercase(),
            to: to.to_lowercase(),
            promotion,
            provisional: next.clone(),
        });
        if let Some(state) = self.state.as_mut() {
            state.set_position(next.clone());
            if state.draw_offer.map_or(false, |offer| offer.by != local) {
                state.draw_offer = None;
            }
        }
        self.captured = captured::derive(&next);
        self.log
            .append(format!("{} played {}{}", local, from.to_lowercase(), to.to_lowercase()), local.into());
        self.apply_local_terminal(&next, local);

        self.outbound.push(ClientEvent::MoveSubmitted {
            game_id,
            from: from.to_lowercase(),
            to: to.to_lowercase(),
            promotion,
        });
        self.persist();
        Ok(next)
    }

    /// Provisional result when the rules engine says the position is final;
    /// the server's `game-ended` overrides it.
    fn apply_local_terminal(&mut self, position: &Position, mover: Side) {
        let result = match self.rules.classify_terminal(position) {
            Terminal::None => return,
            Terminal::Checkmate => GameResult::won(ResultKind::Checkmate, mover),
            Terminal::Stalemate => GameResult::drawn(ResultKind::Stalemate),
            Terminal::Draw => GameResult::drawn(ResultKind::Draw),
        };
        if let Some(state) = self.state.as_mut() {
            state.result = Some(result);
        }
        self.timer.stop();
        self.log.append(result.describe(), LogColor::Info);
        self.notices.push(SessionNotice::GameEnded(result));
    }

    pub fn offer_draw(&mut self) -> Result<()> {
        let state = self.active_game()?;
        let local = self.seat()?;
        if state.draw_offer.map_or(false, |offer| offer.pending) {
            return Err(SessionError::invalid_turn("a draw offer is already pending"));
        }
        let game_id = state.game_id.clone();
        if let Some(state) = self.state.as_mut() {
            state.draw_offer = Some(DrawOffer { by: local, pending: true });
        }
        self.log.append(format!("{} offered a draw", local), local.into());
        self.outbound.push(ClientEvent::DrawOffered { game_id });
        self.persist();
        Ok(())
    }

    pub fn respond_draw(&mut self, accept: bool) -> Result<()> {
        let state = self.active_game()?;
        let local = self.seat()?;
        match state.draw_offer {
            Some(offer) if offer.pending && offer.by != local => {}
            _ => return Err(SessionError::invalid_turn("no draw offer to respond to")),
        }
        let game_id = state.game_id.clone();
        if let Some(state) = self.state.as_mut() {
            state.draw_offer = None;
        }
        let verb = if accept { "accepted" } else { "declined" };
        self.log.append(format!("{} {} the draw offer", local, verb), local.into());
        self.outbound.push(ClientEvent::DrawResponded { game_id, accept });
        self.persist();
        Ok(())
    }

    pub fn resign(&mut self) -> Result<()> {
        let state = self.active_game()?;
        let local = self.seat()?;
        let game_id = state.game_id.clone();
        let result = GameResult::won(ResultKind::Resignation, local.opponent());
        self.outbound.push(ClientEvent::Resignation { game_id });
        self.finish(result);
        Ok(())
    }

    /// Legal destinations for the piece on `square`, for move highlighting.
    /// A seated player only gets moves on their own turn.
    pub fn legal_moves_from(&self, square: &str) -> Vec<String> {
        match &self.state {
            Some(state) if !state.is_over() && self.local_side.map_or(true, |side| side == state.turn) => self
                .rules
                .legal_moves_from(&state.position, square)
                .into_iter()
                .collect(),
            _ => Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Clock
    // ------------------------------------------------------------------

    /// Advances the running clock by one interval and handles expiry.
    pub fn tick(&mut self, elapsed_ms: u64) {
        if let Some(side) = self.timer.tick(elapsed_ms) {
            info!("{} clock expired", side);
            self.notices.push(SessionNotice::TimeExpired(side));
            self.on_time_up(side);
        }
    }

    /// Ends the game on time unless it already has a result. Returns whether
    /// anything changed.
    pub fn on_time_up(&mut self, side: Side) -> bool {
        match &self.state {
            Some(state) if !state.is_over() => {}
            _ => return false,
        }
        self.finish(GameResult::won(ResultKind::Timeout, side.opponent()));
        true
    }

    fn finish(&mut self, result: GameResult) {
        if let Some(state) = self.state.as_mut() {
            state.result = Some(result);
            state.draw_offer = None;
        }
        self.pending = None;
        self.timer.stop();
        let color = if result.kind == ResultKind::Timeout {
            LogColor::Warning
        } else {
            LogColor::Info
        };
        self.log.append(result.describe(), color);
        self.notices.push(SessionNotice::GameEnded(result));
        self.persist();
    }

    // ------------------------------------------------------------------
    // Server events
    // ------------------------------------------------------------------

    /// Entry point for everything the channel delivers.
    pub fn on_server_event(&mut self, msg: ServerMessage) {
        if self.game_id.as_deref() != Some(msg.game_id.as_str()) {
            debug!("Ignoring {:?} for foreign game {}", msg.kind, msg.game_id);
            return;
        }
        if msg.kind != ServerEventKind::GameState && self.state.is_none() {
            debug!("Ignoring {:?} before the game state arrived", msg.kind);
            return;
        }
        match msg.kind {
            ServerEventKind::GameState => self.on_full_state(msg),
            ServerEventKind::MoveApplied => self.on_remote_move_applied(msg),
            ServerEventKind::MoveRejected => self.on_move_rejected(msg),
            ServerEventKind::ClockUpdate => self.on_clock_update(msg),
            ServerEventKind::DrawOfferReceived => self.on_draw_offer_received(msg),
            ServerEventKind::DrawDeclined => self.on_draw_declined(),
            ServerEventKind::GameEnded => self.on_game_ended(msg),
            ServerEventKind::OpponentConnected => {
                self.log.append("Opponent connected", LogColor::Info);
                self.notices.push(SessionNotice::OpponentConnected);
            }
            ServerEventKind::OpponentDisconnected => {
                self.log.append("Opponent disconnected", LogColor::Warning);
                self.notices.push(SessionNotice::OpponentDisconnected);
            }
        }
    }

    fn sync_clocks(&mut self, msg: &ServerMessage) {
        if let Some((white, black)) = msg.clocks() {
            let active = self.active_side();
            self.timer.sync_from_server(white, black, active);
        } else if let Some(side) = self.active_side() {
            if self.timer.phase(side) != ClockPhase::Idle {
                self.timer.start(side);
            }
        }
    }

    fn reconcile(&mut self, pending: &PendingMove, actual: &Position, reason: &str) {
        let err = SessionError::Reconciliation {
            expected: pending.provisional.fen.clone(),
            actual: actual.fen.clone(),
        };
        warn!("Move {}{} not confirmed ({}): {}", pending.from, pending.to, reason, err);
        self.log.append(
            format!("Move {}{} was not accepted: {}", pending.from, pending.to, reason),
            LogColor::Warning,
        );
        self.notices.push(SessionNotice::Reconciliation(err.to_string()));
    }

    fn on_full_state(&mut self, msg: ServerMessage) {
        let Some(position) = msg.position() else {
            warn!("Game state for {} carried no position", msg.game_id);
            return;
        };
        if let Some(pending) = self.pending.take() {
            if !pending.provisional.same_board(&position) {
                self.reconcile(&pending, &position, "server state differs");
            }
        }
        let players = msg
            .players
            .clone()
            .or_else(|| self.state.as_ref().map(|s| s.players.clone()))
            .unwrap_or_default();
        let previous_offer = self.state.as_ref().and_then(|s| s.draw_offer);
        let mut state = GameState::new(msg.game_id.clone(), position.clone(), players);
        state.result = msg.result;
        // A full resync does not retract an open draw offer
        if state.result.is_none() {
            state.draw_offer = previous_offer;
        }
        let fresh = self.state.is_none();
        if let Some(color) = msg.color {
            self.local_side = Some(color);
        }
        self.captured = captured::derive(&position);
        if fresh {
            let seat = self
                .local_side
                .map_or_else(|| "spectator".to_string(), |side| side.as_str().to_string());
            let opponent = self
                .local_side
                .and_then(|side| state.player(side.opponent()))
                .map_or_else(String::new, |p| format!(" against {}", p.name));
            self.log
                .append(format!("Joined game {} as {}{}", msg.game_id, seat, opponent), LogColor::Info);
        }
        self.confirmed = Some(position);
        self.state = Some(state);
        self.sync_clocks(&msg);
        if msg.result.is_some() {
            self.timer.stop();
        }
        self.persist();
    }

    /// Authoritative move from the server: either the echo of our pending
    /// move or a move by the opponent.
    pub fn on_remote_move_applied(&mut self, msg: ServerMessage) {
        let server_position = msg.position();
        let (from, to) = (msg.from.as_deref(), msg.to.as_deref());
        let confirmed_own = match self.pending.take() {
            Some(pending) if pending.matches(from, to) => {
                let position = server_position.clone().unwrap_or_else(|| pending.provisional.clone());
                if !position.same_board(&pending.provisional) {
                    warn!("Server position after {}{} differs from ours; adopting it", pending.from, pending.to);
                }
                self.adopt(position);
                Some(pending)
            }
            Some(pending) => {
                let actual = server_position
                    .clone()
                    .or_else(|| self.confirmed.clone())
                    .unwrap_or_else(Position::starting);
                self.reconcile(&pending, &actual, "server applied a different move");
                self.roll_back();
                None
            }
            None => None,
        };

        let mover = match &confirmed_own {
            Some(_) => self.local_side,
            None => {
                let Some(base) = self.confirmed.clone() else {
                    return;
                };
                let replayed = match (from, to) {
                    (Some(from), Some(to)) => match self.rules.apply_move(&base, from, to, msg.promotion) {
                        Ok(next) => Some(next),
                        Err(e) => {
                            warn!("Server move does not replay locally: {}", e);
                            None
                        }
                    },
                    _ => None,
                };
                let position = match (server_position, replayed) {
                    (Some(server), Some(local)) => {
                        if !server.same_board(&local) {
                            warn!("Server position differs from local replay; adopting server's");
                        }
                        server
                    }
                    (Some(server), None) => server,
                    (None, Some(local)) => local,
                    (None, None) => {
                        warn!("Move event without move or position for {}", msg.game_id);
                        return;
                    }
                };
                let mover = base.turn;
                self.adopt(position);
                let label = match (from, to) {
                    (Some(from), Some(to)) => format!("{} played {}{}", mover, from, to),
                    _ => format!("{} moved", mover),
                };
                self.log.append(label, mover.into());
                Some(mover)
            }
        };

        if let (Some(mover), Some(state)) = (mover, self.state.as_mut()) {
            // Moving declines the opponent's outstanding offer
            if state.draw_offer.map_or(false, |offer| offer.by != mover) {
                state.draw_offer = None;
            }
        }

        if let Some(result) = msg.result {
            self.sync_clocks(&msg);
            self.finish(result);
            return;
        }
        if confirmed_own.is_none() {
            if let (Some(position), Some(mover)) = (self.confirmed.clone(), mover) {
                self.apply_local_terminal(&position, mover);
            }
        }
        self.sync_clocks(&msg);
        self.persist();
    }

    /// Makes `position` both current and confirmed.
    fn adopt(&mut self, position: Position) {
        self.captured = captured::derive(&position);
        if let Some(state) = self.state.as_mut() {
            state.set_position(position.clone());
        }
        self.confirmed = Some(position);
    }

    fn roll_back(&mut self) {
        let Some(confirmed) = self.confirmed.clone() else {
            return;
        };
        self.captured = captured::derive(&confirmed);
        if let Some(state) = self.state.as_mut() {
            state.set_position(confirmed);
            state.result = None;
        }
    }

    fn on_move_rejected(&mut self, msg: ServerMessage) {
        let Some(pending) = self.pending.take() else {
            warn!("Server rejected a move while none was pending");
            return;
        };
        let reason = msg.reason.clone().unwrap_or_else(|| "rejected by server".to_string());
        let actual = msg
            .position()
            .or_else(|| self.confirmed.clone())
            .unwrap_or_else(Position::starting);
        self.reconcile(&pending, &actual, &reason);
        self.roll_back();
        if let Some(server) = msg.position() {
            self.adopt(server);
        }
        self.sync_clocks(&msg);
        self.persist();
    }

    fn on_clock_update(&mut self, msg: ServerMessage) {
        if let Some((white, black)) = msg.clocks() {
            let active = self.active_side();
            self.timer.sync_from_server(white, black, active);
            self.persist();
        }
    }

    fn on_draw_offer_received(&mut self, msg: ServerMessage) {
        if self.active_game().is_err() {
            return;
        }
        let by = msg
            .color
            .or_else(|| self.local_side.map(Side::opponent))
            .unwrap_or(Side::White);
        if let Some(state) = self.state.as_mut() {
            state.draw_offer = Some(DrawOffer { by, pending: true });
        }
        self.log.append(format!("{} offered a draw", by), by.into());
        self.notices.push(SessionNotice::DrawOffered(by));
        self.persist();
    }

    fn on_draw_declined(&mut self) {
        if let Some(state) = self.state.as_mut() {
            state.draw_offer = None;
        }
        self.log.append("Draw offer declined", LogColor::Info);
        self.notices.push(SessionNotice::DrawDeclined);
        self.persist();
    }

    fn on_game_ended(&mut self, msg: ServerMessage) {
        let Some(result) = msg.result else {
            warn!("Game-ended event for {} without a result", msg.game_id);
            return;
        };
        if let Some(position) = msg.position() {
            self.pending = None;
            self.adopt(position);
        }
        if let Some((white, black)) = msg.clocks() {
            self.timer.sync_from_server(white, black, None);
        }
        let already = self.state.as_ref().and_then(|s| s.result) == Some(result);
        if already {
            self.timer.stop();
            self.persist();
            return;
        }
        self.finish(result);
    }

    // ------------------------------------------------------------------
    // Connectivity
    // ------------------------------------------------------------------

    /// `cause` is the transport failure behind a degraded status, if known.
    pub fn on_channel_status(&mut self, status: ConnectionStatus, cause: Option<TransportError>) {
        let previous = self.connection;
        self.connection = status;
        match status {
            ConnectionStatus::Connected if !previous.is_connected() => {
                info!("Channel connected");
                if matches!(previous, ConnectionStatus::Reconnecting { .. }) {
                    self.log.append("Reconnected to server", LogColor::Info);
                    self.notices.push(SessionNotice::ConnectivityRestored);
                }
            }
            ConnectionStatus::Reconnecting { attempt } if previous.is_connected() || attempt <= 1 => {
                let reason = cause.map_or_else(|| "connection lost".to_string(), |e| SessionError::from(e).to_string());
                warn!("Channel down ({}), reconnecting (attempt {})", reason, attempt);
                self.log.append("Connection lost, reconnecting", LogColor::Warning);
                self.notices.push(SessionNotice::ConnectivityDegraded(reason));
            }
            _ => {}
        }
    }

    /// Publishing `event` failed; keep it for the next flush. Failures arrive
    /// in publish order, so the retry queue keeps that order.
    pub fn on_transport_error(&mut self, event: ClientEvent, err: TransportError) {
        warn!("Failed to publish {:?}: {}", event, err);
        if self.game_id.as_deref() != Some(event.game_id()) {
            return;
        }
        self.notices
            .push(SessionNotice::ConnectivityDegraded(SessionError::from(err).to_string()));
        self.retry.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::rules::ChessRules;
    use crate::models::PlayerInfo;
    use crate::session::storage::MemoryStore;

    fn session_with(store: Rc<dyn LocalStore>) -> GameSession {
        GameSession::new(Box::new(ChessRules), store, SessionConfig::default())
    }

    fn joined(side: Side) -> GameSession {
        let mut session = session_with(Rc::new(MemoryStore::new()));
        session.resume(Some("g1".to_string()));
        let mut msg = ServerMessage::new(ServerEventKind::GameState, "g1");
        msg.position = Some(Position::starting().fen);
        msg.color = Some(side);
        session.on_server_event(msg);
        session
    }

    fn applied(from: &str, to: &str, after: &Position, white_ms: u64, black_ms: u64) -> ServerMessage {
        let mut msg = ServerMessage::new(ServerEventKind::MoveApplied, "g1");
        msg.from = Some(from.to_string());
        msg.to = Some(to.to_string());
        msg.position = Some(after.fen.clone());
        msg.turn = Some(after.turn);
        msg.white_ms = Some(white_ms);
        msg.black_ms = Some(black_ms);
        msg
    }

    #[test]
    fn test_unattached_without_any_game() {
        let mut session = session_with(Rc::new(MemoryStore::new()));
        assert_eq!(session.resume(None), None);
        assert!(session.state().is_none(), "No empty game is synthesized");
        assert_eq!(session.submit_move("e2", "e4", None), Err(SessionError::NotAttached));
    }

    #[test]
    fn test_explicit_id_awaits_server_state() {
        let mut session = session_with(Rc::new(MemoryStore::new()));
        assert_eq!(session.resume(Some("g1".to_string())), Some("g1"));
        assert!(session.state().is_none());
    }

    #[test]
    fn test_full_state_seats_the_player() {
        let session = joined(Side::White);
        assert_eq!(session.local_side(), Some(Side::White));
        assert_eq!(session.state().unwrap().turn, Side::White);
        assert_eq!(session.timer().phase(Side::White), ClockPhase::Idle);
    }

    #[test]
    fn test_submit_move_is_optimistic_and_queued() {
        let mut session = joined(Side::White);
        let next = session.submit_move("e2", "e4", None).unwrap();
        assert_eq!(session.state().unwrap().position, next);
        assert_eq!(session.state().unwrap().turn, Side::Black);
        assert!(session.pending_move().is_some());
        assert_eq!(session.confirmed_position(), Some(&Position::starting()));
        assert!(!session.timer().is_running());
        let outbound = session.take_outbound();
        assert_eq!(
            outbound,
            vec![ClientEvent::MoveSubmitted {
                game_id: "g1".to_string(),
                from: "e2".to_string(),
                to: "e4".to_string(),
                promotion: None,
            }]
        );
    }

    #[test]
    fn test_illegal_move_leaves_state_untouched() {
        let mut session = joined(Side::White);
        let before = session.state().cloned();
        let log_len = session.log().len();
        let err = session.submit_move("e2", "e5", None).unwrap_err();
        assert!(matches!(err, SessionError::IllegalMove { .. }));
        assert_eq!(session.state().cloned(), before);
        assert_eq!(session.log().len(), log_len);
        assert!(session.take_outbound().is_empty());
    }

    #[test]
    fn test_out_of_turn_is_rejected() {
        let mut session = joined(Side::Black);
        let err = session.submit_move("e7", "e5", None).unwrap_err();
        assert!(matches!(err, SessionError::InvalidTurn(_)));
    }

    #[test]
    fn test_second_move_while_pending_is_rejected() {
        let mut session = joined(Side::White);
        session.submit_move("e2", "e4", None).unwrap();
        assert!(matches!(
            session.submit_move("d2", "d4", None),
            Err(SessionError::InvalidTurn(_))
        ));
    }

    #[test]
    fn test_confirmation_starts_opponent_clock() {
        let mut session = joined(Side::White);
        let next = session.submit_move("e2", "e4", None).unwrap();
        session.on_server_event(applied("e2", "e4", &next, 299_000, 300_000));
        assert!(session.pending_move().is_none());
        assert_eq!(session.confirmed_position(), Some(&next));
        assert_eq!(session.timer().running(), Some(Side::Black));
        assert_eq!(session.timer().white_time_remaining_ms, 299_000);
    }

    #[test]
    fn test_opponent_move_starts_our_clock_and_logs() {
        let mut session = joined(Side::White);
        let after_e4 = session.submit_move("e2", "e4", None).unwrap();
        session.on_server_event(applied("e2", "e4", &after_e4, 300_000, 300_000));
        let after_e5 = ChessRules.apply_move(&after_e4, "e7", "e5", None).unwrap();
        session.on_server_event(applied("e7", "e5", &after_e5, 300_000, 297_000));
        assert_eq!(session.state().unwrap().turn, Side::White);
        assert_eq!(session.timer().running(), Some(Side::White));
        assert_eq!(session.timer().phase(Side::Black), ClockPhase::Paused);
        assert!(session.log().last().unwrap().message.ends_with("Black played e7e5"));
    }

    #[test]
    fn test_capture_updates_captured_pieces() {
        let mut session = joined(Side::White);
        let mut position = Position::starting();
        for (from, to, ours) in [("e2", "e4", true), ("d7", "d5", false), ("e4", "d5", true)] {
            if ours {
                position = session.submit_move(from, to, None).unwrap();
            } else {
                position = ChessRules.apply_move(&position, from, to, None).unwrap();
            }
            session.on_server_event(applied(from, to, &position, 300_000, 300_000));
        }
        assert_eq!(session.captured().white, vec![PieceKind::Pawn]);
        assert!(session.captured().black.is_empty());
    }

    #[test]
    fn test_rejection_rolls_back() {
        let mut session = joined(Side::White);
        session.submit_move("e2", "e4", None).unwrap();
        let mut msg = ServerMessage::new(ServerEventKind::MoveRejected, "g1");
        msg.reason = Some("clock flagged".to_string());
        session.on_server_event(msg);
        assert!(session.pending_move().is_none());
        assert_eq!(session.state().unwrap().position, Position::starting());
        assert!(session
            .take_notices()
            .iter()
            .any(|n| matches!(n, SessionNotice::Reconciliation(_))));
    }

    #[test]
    fn test_different_server_move_replaces_pending() {
        let mut session = joined(Side::White);
        session.submit_move("e2", "e4", None).unwrap();
        let d4 = ChessRules.apply_move(&Position::starting(), "d2", "d4", None).unwrap();
        session.on_server_event(applied("d2", "d4", &d4, 300_000, 300_000));
        assert!(session.state().unwrap().position.same_board(&d4));
        assert!(session
            .take_notices()
            .iter()
            .any(|n| matches!(n, SessionNotice::Reconciliation(_))));
    }

    #[test]
    fn test_time_up_is_idempotent() {
        let mut session = joined(Side::White);
        assert!(session.on_time_up(Side::White));
        let result = session.state().unwrap().result;
        assert_eq!(result, Some(GameResult::won(ResultKind::Timeout, Side::Black)));
        let log_len = session.log().len();
        assert!(!session.on_time_up(Side::White), "Second call is a no-op");
        assert!(!session.on_time_up(Side::Black));
        assert_eq!(session.state().unwrap().result, result);
        assert_eq!(session.log().len(), log_len);
    }

    #[test]
    fn test_tick_expiry_ends_game_once() {
        let mut session = joined(Side::White);
        let mut clock = ServerMessage::new(ServerEventKind::ClockUpdate, "g1");
        clock.white_ms = Some(1500);
        clock.black_ms = Some(60_000);
        session.on_server_event(clock);
        assert_eq!(session.timer().running(), Some(Side::White));
        session.tick(1000);
        session.tick(1000);
        session.tick(1000);
        let expiries = session
            .take_notices()
            .into_iter()
            .filter(|n| matches!(n, SessionNotice::TimeExpired(_)))
            .count();
        assert_eq!(expiries, 1);
        assert_eq!(
            session.state().unwrap().result,
            Some(GameResult::won(ResultKind::Timeout, Side::Black))
        );
        assert!(!session.timer().is_running());
    }

    #[test]
    fn test_moves_rejected_after_result() {
        let mut session = joined(Side::White);
        session.resign().unwrap();
        assert!(matches!(
            session.submit_move("e2", "e4", None),
            Err(SessionError::InvalidTurn(_))
        ));
        assert!(session
            .take_outbound()
            .contains(&ClientEvent::Resignation { game_id: "g1".to_string() }));
    }

    #[test]
    fn test_draw_offer_flow() {
        let mut session = joined(Side::White);
        assert!(session.respond_draw(true).is_err(), "Nothing to respond to");
        let mut offer = ServerMessage::new(ServerEventKind::DrawOfferReceived, "g1");
        offer.color = Some(Side::Black);
        session.on_server_event(offer);
        assert_eq!(
            session.state().unwrap().draw_offer,
            Some(DrawOffer { by: Side::Black, pending: true })
        );
        session.respond_draw(false).unwrap();
        assert!(session.state().unwrap().draw_offer.is_none());
        session.offer_draw().unwrap();
        assert!(session.offer_draw().is_err(), "Only one pending offer");
        let outbound = session.take_outbound();
        assert_eq!(outbound.len(), 2);
    }

    #[test]
    fn test_legal_moves_only_on_own_turn() {
        let mut session = joined(Side::Black);
        assert!(session.legal_moves_from("e7").is_empty(), "White to move");
        let e4 = ChessRules.apply_move(&Position::starting(), "e2", "e4", None).unwrap();
        session.on_server_event(applied("e2", "e4", &e4, 300_000, 300_000));
        assert_eq!(session.legal_moves_from("e7"), vec!["e5".to_string(), "e6".to_string()]);
    }

    #[test]
    fn test_foreign_game_events_are_ignored() {
        let mut session = joined(Side::White);
        let mut msg = ServerMessage::new(ServerEventKind::GameEnded, "other");
        msg.result = Some(GameResult::drawn(ResultKind::Draw));
        session.on_server_event(msg);
        assert!(session.state().unwrap().result.is_none());
    }

    #[test]
    fn test_game_ended_is_authoritative() {
        let mut session = joined(Side::White);
        session.on_time_up(Side::Black);
        let mut msg = ServerMessage::new(ServerEventKind::GameEnded, "g1");
        msg.result = Some(GameResult::won(ResultKind::Checkmate, Side::Black));
        session.on_server_event(msg);
        assert_eq!(
            session.state().unwrap().result,
            Some(GameResult::won(ResultKind::Checkmate, Side::Black))
        );
    }

    #[test]
    fn test_resume_from_snapshot() {
        let store: Rc<dyn LocalStore> = Rc::new(MemoryStore::new());
        {
            let mut session = session_with(store.clone());
            session.resume(Some("g1".to_string()));
            let mut msg = ServerMessage::new(ServerEventKind::GameState, "g1");
            msg.position = Some(Position::starting().fen);
            msg.color = Some(Side::Black);
            msg.white_ms = Some(120_000);
            msg.black_ms = Some(90_000);
            session.on_server_event(msg);
        }
        let mut session = session_with(store);
        assert_eq!(session.resume(None), Some("g1"));
        assert_eq!(session.local_side(), Some(Side::Black));
        assert_eq!(session.timer().black_time_remaining_ms, 90_000);
        assert!(!session.timer().is_running(), "Clocks wait for the server after a reload");
    }

    #[test]
    fn test_resume_drops_unconfirmed_move() {
        let store: Rc<dyn LocalStore> = Rc::new(MemoryStore::new());
        {
            let mut session = session_with(store.clone());
            session.resume(Some("g1".to_string()));
            let mut msg = ServerMessage::new(ServerEventKind::GameState, "g1");
            msg.position = Some(Position::starting().fen);
            msg.color = Some(Side::White);
            session.on_server_event(msg);
            session.submit_move("e2", "e4", None).unwrap();
        }
        let mut session = session_with(store);
        session.resume(Some("g1".to_string()));
        assert_eq!(session.state().unwrap().position, Position::starting());
    }

    #[test]
    fn test_leave_requires_finished_game() {
        let store: Rc<dyn LocalStore> = Rc::new(MemoryStore::new());
        let mut session = session_with(store.clone());
        session.resume(Some("g1".to_string()));
        let mut msg = ServerMessage::new(ServerEventKind::GameState, "g1");
        msg.position = Some(Position::starting().fen);
        msg.color = Some(Side::White);
        session.on_server_event(msg);
        assert!(session.leave().is_err());
        session.resign().unwrap();
        session.leave().unwrap();
        assert!(!session.is_attached());
        assert!(SessionSnapshot::load(store.as_ref()).is_none());
    }

    #[test]
    fn test_transport_error_requeues_event() {
        let mut session = joined(Side::White);
        session.submit_move("e2", "e4", None).unwrap();
        let event = session.take_outbound().remove(0);
        session.on_transport_error(event.clone(), TransportError::QueueFull(64));
        assert_eq!(session.take_outbound(), vec![event]);
        assert!(session
            .take_notices()
            .iter()
            .any(|n| matches!(n, SessionNotice::ConnectivityDegraded(_))));
    }

    #[test]
    fn test_failed_events_are_retried_in_publish_order() {
        let mut session = joined(Side::White);
        session.offer_draw().unwrap();
        session.resign().unwrap();
        let published = session.take_outbound();
        assert_eq!(published.len(), 2);
        for event in published.clone() {
            session.on_transport_error(event, TransportError::QueueFull(64));
        }
        assert_eq!(
            session.take_outbound(),
            vec![
                ClientEvent::DrawOffered { game_id: "g1".to_string() },
                ClientEvent::Resignation { game_id: "g1".to_string() },
            ]
        );
        assert!(session.take_outbound().is_empty(), "Retried events are handed out once");
    }

    #[test]
    fn test_retried_events_go_before_new_ones() {
        let mut session = joined(Side::White);
        session.offer_draw().unwrap();
        let offer = session.take_outbound().remove(0);
        session.on_transport_error(offer.clone(), TransportError::Closed);
        session.resign().unwrap();
        assert_eq!(
            session.take_outbound(),
            vec![offer, ClientEvent::Resignation { game_id: "g1".to_string() }]
        );
    }

    #[test]
    fn test_local_checkmate_raises_game_ended() {
        let mut position = Position::starting();
        for (from, to) in [("f2", "f3"), ("e7", "e5"), ("g2", "g4")] {
            position = ChessRules.apply_move(&position, from, to, None).unwrap();
        }
        let mut session = session_with(Rc::new(MemoryStore::new()));
        session.resume(Some("g1".to_string()));
        let mut msg = ServerMessage::new(ServerEventKind::GameState, "g1");
        msg.position = Some(position.fen.clone());
        msg.color = Some(Side::Black);
        session.on_server_event(msg);
        session.take_notices();

        session.submit_move("d8", "h4", None).unwrap();
        assert_eq!(
            session.take_notices(),
            vec![SessionNotice::GameEnded(GameResult::won(ResultKind::Checkmate, Side::Black))]
        );
    }

    #[test]
    fn test_default_promotion_is_sent_to_the_server() {
        let mut session = session_with(Rc::new(MemoryStore::new()));
        session.resume(Some("g1".to_string()));
        let mut msg = ServerMessage::new(ServerEventKind::GameState, "g1");
        msg.position = Some("8/4P3/8/8/8/8/k7/4K3 w - - 0 1".to_string());
        msg.color = Some(Side::White);
        session.on_server_event(msg);

        let next = session.submit_move("e7", "e8", None).unwrap();
        assert!(next.fen.starts_with("4Q3/"));
        assert_eq!(
            session.take_outbound(),
            vec![ClientEvent::MoveSubmitted {
                game_id: "g1".to_string(),
                from: "e7".to_string(),
                to: "e8".to_string(),
                promotion: Some(PieceKind::Queen),
            }]
        );
    }

    #[test]
    fn test_connect_failure_reason_reaches_the_notice() {
        let mut session = joined(Side::White);
        session.on_channel_status(ConnectionStatus::Connected, None);
        session.on_channel_status(
            ConnectionStatus::Reconnecting { attempt: 1 },
            Some(TransportError::Connect("connection refused".to_string())),
        );
        let degraded: Vec<String> = session
            .take_notices()
            .into_iter()
            .filter_map(|n| match n {
                SessionNotice::ConnectivityDegraded(reason) => Some(reason),
                _ => None,
            })
            .collect();
        assert_eq!(degraded, vec!["Transport error: Connect failed: connection refused".to_string()]);

        session.on_channel_status(ConnectionStatus::Connected, None);
        assert_eq!(session.take_notices(), vec![SessionNotice::ConnectivityRestored]);
    }

    #[test]
    fn test_join_log_names_the_opponent() {
        let mut session = session_with(Rc::new(MemoryStore::new()));
        session.resume(Some("g1".to_string()));
        let mut msg = ServerMessage::new(ServerEventKind::GameState, "g1");
        msg.position = Some(Position::starting().fen);
        msg.color = Some(Side::White);
        msg.players = Some(vec![
            PlayerInfo { id: "p1".to_string(), name: "alice".to_string(), color: Side::White },
            PlayerInfo { id: "p2".to_string(), name: "bob".to_string(), color: Side::Black },
        ]);
        session.on_server_event(msg);
        assert!(session
            .log()
            .iter()
            .any(|entry| entry.message == "Joined game g1 as white against bob"));
    }

    #[test]
    fn test_full_state_keeps_open_draw_offer() {
        let mut session = joined(Side::White);
        let mut offer = ServerMessage::new(ServerEventKind::DrawOfferReceived, "g1");
        offer.color = Some(Side::Black);
        session.on_server_event(offer);

        let mut resync = ServerMessage::new(ServerEventKind::GameState, "g1");
        resync.position = Some(Position::starting().fen);
        resync.color = Some(Side::White);
        session.on_server_event(resync);
        assert_eq!(
            session.state().unwrap().draw_offer,
            Some(DrawOffer { by: Side::Black, pending: true })
        );

        let mut ended = ServerMessage::new(ServerEventKind::GameState, "g1");
        ended.position = Some(Position::starting().fen);
        ended.result = Some(GameResult::drawn(ResultKind::Draw));
        session.on_server_event(ended);
        assert!(session.state().unwrap().draw_offer.is_none(), "No offer survives a finished game");
    }
}
