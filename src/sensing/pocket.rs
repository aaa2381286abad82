//! Stowed/exposed heuristic.
//!
//! Two signals feed the same debounced state: ambient light when a recent reading exists, and
//! otherwise quiet time since the last accepted motion event. A candidate state has to hold for
//! a dwell time before it is confirmed, and quiet mode additionally has a band between the exit
//! and enter thresholds in which the current state is kept.

use serde::{Deserialize, Serialize};

use crate::models::{PocketSignal, PocketState, PocketStateChange};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PocketConfig {
    pub enter_quiet_ms: u64,
    pub exit_quiet_ms: u64,
    pub quiet_enter_dwell_ms: u64,
    pub quiet_exit_dwell_ms: u64,
    pub dark_lux: f64,
    pub light_enter_dwell_ms: u64,
    pub light_exit_dwell_ms: u64,
    /// Light readings older than this fall back to quiet-time mode.
    pub light_max_age_ms: u64,
}

impl Default for PocketConfig {
    fn default() -> Self {
        Self {
            enter_quiet_ms: 10_000,
            exit_quiet_ms: 3_000,
            quiet_enter_dwell_ms: 2_000,
            quiet_exit_dwell_ms: 1_000,
            dark_lux: 10.0,
            light_enter_dwell_ms: 3_000,
            light_exit_dwell_ms: 2_000,
            light_max_age_ms: 120_000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LightReading {
    lux: f64,
    at_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    in_pocket: bool,
    signal: PocketSignal,
    since_ms: u64,
}

pub struct PocketHeuristic {
    config: PocketConfig,
    state: PocketState,
    first_sample_ms: Option<u64>,
    last_motion_ms: Option<u64>,
    light: Option<LightReading>,
    pending: Option<Pending>,
}

impl PocketHeuristic {
    pub fn new(config: PocketConfig) -> Self {
        Self {
            config,
            state: PocketState::default(),
            first_sample_ms: None,
            last_motion_ms: None,
            light: None,
            pending: None,
        }
    }

    pub fn state(&self) -> PocketState {
        self.state
    }

    pub fn record_sample(&mut self, timestamp_ms: u64) {
        self.first_sample_ms.get_or_insert(timestamp_ms);
    }

    pub fn record_motion(&mut self, timestamp_ms: u64) {
        self.last_motion_ms = Some(timestamp_ms);
    }

    pub fn record_light(&mut self, lux: f64, at_ms: u64) {
        self.light = Some(LightReading { lux, at_ms });
    }

    pub fn tick(&mut self, now_ms: u64) -> Option<PocketStateChange> {
        let Some((in_pocket, signal)) = self.candidate(now_ms) else {
            self.pending = None;
            return None;
        };

        if in_pocket == self.state.in_pocket {
            self.pending = None;
            return None;
        }

        let pending = match self.pending {
            Some(pending) if pending.in_pocket == in_pocket && pending.signal == signal => pending,
            _ => {
                let pending = Pending {
                    in_pocket,
                    signal,
                    since_ms: now_ms,
                };
                self.pending = Some(pending);
                pending
            }
        };

        if now_ms.saturating_sub(pending.since_ms) < self.dwell_ms(in_pocket, signal) {
            return None;
        }

        self.pending = None;
        self.state = PocketState {
            in_pocket,
            since_ms: now_ms,
        };
        Some(PocketStateChange {
            state: self.state,
            signal,
        })
    }

    fn candidate(&self, now_ms: u64) -> Option<(bool, PocketSignal)> {
        if let Some(light) = self.light {
            if now_ms.saturating_sub(light.at_ms) <= self.config.light_max_age_ms {
                return Some((light.lux < self.config.dark_lux, PocketSignal::Light));
            }
        }

        // Never stowed before the first sample has arrived.
        let first_sample = self.first_sample_ms?;
        let reference = self.last_motion_ms.unwrap_or(first_sample);
        let quiet = now_ms.saturating_sub(reference);

        let in_pocket = if quiet >= self.config.enter_quiet_ms {
            true
        } else if quiet <= self.config.exit_quiet_ms {
            false
        } else {
            self.state.in_pocket
        };
        Some((in_pocket, PocketSignal::Quiet))
    }

    fn dwell_ms(&self, entering: bool, signal: PocketSignal) -> u64 {
        match (signal, entering) {
            (PocketSignal::Quiet, true) => self.config.quiet_enter_dwell_ms,
            (PocketSignal::Quiet, false) => self.config.quiet_exit_dwell_ms,
            (PocketSignal::Light, true) => self.config.light_enter_dwell_ms,
            (PocketSignal::Light, false) => self.config.light_exit_dwell_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_ticks(
        heuristic: &mut PocketHeuristic,
        from_ms: u64,
        to_ms: u64,
    ) -> Vec<PocketStateChange> {
        (from_ms..=to_ms)
            .step_by(1_000)
            .filter_map(|now| heuristic.tick(now))
            .collect()
    }

    #[test]
    fn stays_out_without_samples() {
        let mut heuristic = PocketHeuristic::new(PocketConfig::default());
        assert!(run_ticks(&mut heuristic, 0, 60_000).is_empty());
        assert!(!heuristic.state().in_pocket);
    }

    #[test]
    fn enters_after_quiet_period_plus_dwell() {
        let mut heuristic = PocketHeuristic::new(PocketConfig::default());
        heuristic.record_sample(0);

        assert!(run_ticks(&mut heuristic, 0, 11_000).is_empty());
        let change = heuristic.tick(12_000).expect("dwell elapsed");
        assert!(change.state.in_pocket);
        assert_eq!(change.state.since_ms, 12_000);
        assert_eq!(change.signal, PocketSignal::Quiet);

        // steady state is silent
        assert!(run_ticks(&mut heuristic, 13_000, 30_000).is_empty());
    }

    #[test]
    fn fresh_motion_takes_it_out() {
        let mut heuristic = PocketHeuristic::new(PocketConfig::default());
        heuristic.record_sample(0);
        run_ticks(&mut heuristic, 0, 12_000);
        assert!(heuristic.state().in_pocket);

        heuristic.record_motion(20_500);
        assert!(heuristic.tick(21_000).is_none());
        let change = heuristic.tick(22_000).expect("exit dwell elapsed");
        assert!(!change.state.in_pocket);
    }

    #[test]
    fn short_flicker_is_debounced() {
        let mut heuristic = PocketHeuristic::new(PocketConfig::default());
        heuristic.record_light(2.0, 0);
        assert!(heuristic.tick(0).is_none());
        assert!(heuristic.tick(1_000).is_none());

        // light comes back before the 3 s dwell completes
        heuristic.record_light(80.0, 1_500);
        assert!(heuristic.tick(2_000).is_none());

        heuristic.record_light(2.0, 2_500);
        assert!(heuristic.tick(3_000).is_none());
        assert!(heuristic.tick(5_000).is_none());
        let change = heuristic.tick(6_000).expect("dark long enough");
        assert!(change.state.in_pocket);
        assert_eq!(change.signal, PocketSignal::Light);
    }

    #[test]
    fn stale_light_falls_back_to_quiet_time() {
        let mut heuristic = PocketHeuristic::new(PocketConfig::default());
        heuristic.record_light(1.0, 0);
        heuristic.record_sample(0);
        heuristic.record_motion(200_000);

        // light reading is 200 s old, motion is fresh: quiet mode keeps it out
        assert!(heuristic.tick(200_500).is_none());
        assert!(!heuristic.state().in_pocket);
    }
}
