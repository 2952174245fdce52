use serde::{Deserialize, Serialize};

use crate::clock::WallClock;

pub const MAX_SCHEDULE_SLOTS: usize = 8;

/// Elapsed-interval timer state, advanced by an injected `now_ms` instead
/// of a global millisecond counter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IntervalTimer {
    interval_ms: u64,
    last_fired_ms: u64,
}

impl IntervalTimer {
    /// Starts the timer at `now_ms`: the first firing happens one full
    /// interval later, matching the device's boot behavior.
    pub fn new(interval_ms: u64, now_ms: u64) -> Self {
        Self {
            interval_ms,
            last_fired_ms: now_ms,
        }
    }

    pub fn expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_fired_ms) >= self.interval_ms
    }

    /// Checks and rearms in one step.
    pub fn should_fire(&mut self, now_ms: u64) -> bool {
        if self.expired(now_ms) {
            self.last_fired_ms = now_ms;
            true
        } else {
            false
        }
    }
}

/// A ground-poll target instant, matched on exact hour and minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub hour: u8,
    pub minute: u8,
}

impl ScheduleSlot {
    pub fn new(hour: u8, minute: u8) -> Self {
        Self { hour, minute }
    }

    fn total_minutes(&self) -> u16 {
        u16::from(self.hour) * 60 + u16::from(self.minute)
    }
}

/// Decides when a ground poll cycle runs. Two implementations are
/// provided and the choice is a configuration decision, not a compile-time
/// branch: a fixed elapsed interval, or an exact wall-clock minute match.
pub trait TriggerStrategy: Send {
    fn should_fire(&mut self, now_ms: u64) -> bool;
}

/// Fixed-interval trigger.
#[derive(Debug)]
pub struct IntervalTrigger {
    timer: IntervalTimer,
}

impl IntervalTrigger {
    pub fn new(interval_ms: u64, now_ms: u64) -> Self {
        Self {
            timer: IntervalTimer::new(interval_ms, now_ms),
        }
    }
}

impl TriggerStrategy for IntervalTrigger {
    fn should_fire(&mut self, now_ms: u64) -> bool {
        self.timer.should_fire(now_ms)
    }
}

/// Exact HH:MM match against a short target list, read from the RTC.
/// Refuses to fire while the RTC is invalid or halted. There is no
/// catch-up: a target minute skipped between ticks stays missed, and a
/// minute observed across several ticks fires on each of them.
pub struct WallClockTrigger<W: WallClock> {
    rtc: W,
    targets: heapless::Vec<ScheduleSlot, MAX_SCHEDULE_SLOTS>,
}

impl<W: WallClock> WallClockTrigger<W> {
    pub fn new(rtc: W, targets: &[ScheduleSlot]) -> Self {
        let mut slots = heapless::Vec::new();
        for &slot in targets.iter().take(MAX_SCHEDULE_SLOTS) {
            let _ = slots.push(slot);
        }
        Self { rtc, targets: slots }
    }
}

impl<W: WallClock + Send> TriggerStrategy for WallClockTrigger<W> {
    fn should_fire(&mut self, _now_ms: u64) -> bool {
        if !self.rtc.is_valid() || !self.rtc.is_running() {
            return false;
        }
        let (hour, minute) = self.rtc.now_hhmm();
        let now = ScheduleSlot::new(hour, minute).total_minutes();
        self.targets.iter().any(|slot| slot.total_minutes() == now)
    }
}
