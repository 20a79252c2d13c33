//! Adaptive poll interval
//!
//! Two tiers: success and error. Consecutive outcomes of the same kind grow the
//! interval geometrically from the tier floor up to its ceiling; switching
//! outcome kind restarts at the new tier's floor.

use dubtrack_common::config::PollingSettings;
use std::time::Duration;

/// Kind of the last completed poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// `min(floor * factor^streak, ceiling)`, computed in milliseconds
pub fn tier_interval(floor: Duration, ceiling: Duration, factor: f64, streak: u32) -> Duration {
    let floor_ms = floor.as_millis() as f64;
    let ceiling_ms = ceiling.as_millis() as f64;
    let grown = floor_ms * factor.powi(streak.min(i32::MAX as u32) as i32);
    let ms = if grown.is_finite() { grown.min(ceiling_ms) } else { ceiling_ms };
    Duration::from_millis(ms.round() as u64)
}

/// Tracks the current streak and hands out the next wait
#[derive(Debug, Clone)]
pub struct PollSchedule {
    success_floor: Duration,
    success_ceiling: Duration,
    error_floor: Duration,
    error_ceiling: Duration,
    growth_factor: f64,
    last: Option<Outcome>,
    streak: u32,
}

impl PollSchedule {
    pub fn new(settings: &PollingSettings) -> Self {
        Self {
            success_floor: Duration::from_millis(settings.success_floor_ms),
            success_ceiling: Duration::from_millis(settings.success_ceiling_ms),
            error_floor: Duration::from_millis(settings.error_floor_ms),
            error_ceiling: Duration::from_millis(settings.error_ceiling_ms),
            growth_factor: settings.growth_factor,
            last: None,
            streak: 0,
        }
    }

    /// Record `outcome` and return how long to wait before the next fetch
    pub fn next_delay(&mut self, outcome: Outcome) -> Duration {
        if self.last == Some(outcome) {
            self.streak = self.streak.saturating_add(1);
        } else {
            self.last = Some(outcome);
            self.streak = 0;
        }

        match outcome {
            Outcome::Success => tier_interval(
                self.success_floor,
                self.success_ceiling,
                self.growth_factor,
                self.streak,
            ),
            Outcome::Failure => tier_interval(
                self.error_floor,
                self.error_ceiling,
                self.growth_factor,
                self.streak,
            ),
        }
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }
}
