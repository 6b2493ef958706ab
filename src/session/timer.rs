//! Two-sided countdown clock.
//!
//! Only one side's clock runs at a time. The engine has no notion of wall time:
//! the hosting actor calls [`GameTimer::tick`] on a fixed interval with the
//! elapsed milliseconds. Server corrections always overwrite local values.

use serde::{Deserialize, Serialize};

use crate::models::Side;

/// Phase of one side's clock
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClockPhase {
    Idle,
    Running,
    Paused,
    Expired,
}

/// Remaining time and phase for both sides
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameTimer {
    pub white_time_remaining_ms: u64,
    pub black_time_remaining_ms: u64,
    white_phase: ClockPhase,
    black_phase: ClockPhase,
}

impl GameTimer {
    pub fn new(white_ms: u64, black_ms: u64) -> Self {
        GameTimer {
            white_time_remaining_ms: white_ms,
            black_time_remaining_ms: black_ms,
            white_phase: ClockPhase::Idle,
            black_phase: ClockPhase::Idle,
        }
    }

    pub fn remaining(&self, side: Side) -> u64 {
        match side {
            Side::White => self.white_time_remaining_ms,
            Side::Black => self.black_time_remaining_ms,
        }
    }

    pub fn phase(&self, side: Side) -> ClockPhase {
        match side {
            Side::White => self.white_phase,
            Side::Black => self.black_phase,
        }
    }

    /// Side whose clock is currently counting down, if any
    pub fn running(&self) -> Option<Side> {
        if self.white_phase == ClockPhase::Running {
            Some(Side::White)
        } else if self.black_phase == ClockPhase::Running {
            Some(Side::Black)
        } else {
            None
        }
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    pub fn is_low_time(&self, side: Side, threshold_ms: u64) -> bool {
        self.remaining(side) < threshold_ms
    }

    fn phase_mut(&mut self, side: Side) -> &mut ClockPhase {
        match side {
            Side::White => &mut self.white_phase,
            Side::Black => &mut self.black_phase,
        }
    }

    fn remaining_mut(&mut self, side: Side) -> &mut u64 {
        match side {
            Side::White => &mut self.white_time_remaining_ms,
            Side::Black => &mut self.black_time_remaining_ms,
        }
    }

    /// Runs `side`'s clock and pauses the other one. An expired clock stays
    /// expired; the caller is responsible for not starting clocks after the
    /// game has a result.
    pub fn start(&mut self, side: Side) {
        if self.phase(side) == ClockPhase::Expired {
            return;
        }
        *self.phase_mut(side) = ClockPhase::Running;
        self.pause(side.opponent());
    }

    fn pause(&mut self, side: Side) {
        let phase = self.phase_mut(side);
        if *phase == ClockPhase::Running {
            *phase = ClockPhase::Paused;
        }
    }

    /// Pauses whichever clock is running.
    pub fn stop(&mut self) {
        self.pause(Side::White);
        self.pause(Side::Black);
    }

    /// Advances the running clock. Returns the side whose clock hit zero on
    /// this tick; a clock that is already expired never reports again.
    pub fn tick(&mut self, elapsed_ms: u64) -> Option<Side> {
        let side = self.running()?;
        let remaining = self.remaining_mut(side);
        *remaining = remaining.saturating_sub(elapsed_ms);
        if *remaining == 0 {
            *self.phase_mut(side) = ClockPhase::Expired;
            return Some(side);
        }
        None
    }

    /// Overwrites both clocks with authoritative values and reassigns the
    /// running clock from `active`. `None` leaves both clocks paused. A zero
    /// value does not raise expiry here.
    pub fn sync_from_server(&mut self, white_ms: u64, black_ms: u64, active: Option<Side>) {
        self.white_time_remaining_ms = white_ms;
        self.black_time_remaining_ms = black_ms;
        for side in [Side::White, Side::Black] {
            // A corrected non-zero clock is no longer expired
            let revived = self.phase(side) == ClockPhase::Expired && self.remaining(side) > 0;
            let phase = self.phase_mut(side);
            if revived || *phase == ClockPhase::Running {
                *phase = ClockPhase::Paused;
            }
        }
        match active {
            Some(side) => self.start(side),
            None => {
                // Server has spoken, so the clocks are no longer idle
                for side in [Side::White, Side::Black] {
                    let phase = self.phase_mut(side);
                    if *phase == ClockPhase::Idle {
                        *phase = ClockPhase::Paused;
                    }
                }
            }
        }
    }
}

impl Default for GameTimer {
    fn default() -> Self {
        GameTimer::new(0, 0)
    }
}
