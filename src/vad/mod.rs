//! Interruption detection (C2): adaptive-baseline energy VAD over
//! agent-speaking intervals (spec §4.2).

use crate::config::InterruptConfig;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::info;

/// Rolling noise-floor baseline and recent energy samples (spec §3
/// `EnergyStats`).
#[derive(Debug)]
pub struct EnergyStats {
    /// Rolling baseline (noise floor).
    baseline: f32,
}

const BASELINE_FLOOR: f32 = 50.0;

impl Default for EnergyStats {
    fn default() -> Self {
        Self {
            baseline: BASELINE_FLOOR,
        }
    }
}

impl EnergyStats {
    /// Update the rolling baseline with a new energy sample (spec §4.1
    /// step 3). Only called while the agent is not speaking.
    pub fn update_baseline(&mut self, energy: f32) {
        self.baseline = (0.95 * self.baseline + 0.05 * energy).max(BASELINE_FLOOR);
    }

    /// Current rolling baseline.
    #[must_use]
    pub fn baseline(&self) -> f32 {
        self.baseline
    }
}

/// Output of one detector tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VadTick {
    /// Whether a cancel signal should fire on this frame.
    pub fire_cancel: bool,
}

/// Adaptive-baseline interruption detector (spec §4.2).
///
/// One instance per session. Armed only while the session `phase` is
/// `Responding`; the caller is responsible for only calling
/// [`InterruptionDetector::process_frame`] in that phase, and for calling
/// [`InterruptionDetector::rearm`] on every transition back into
/// `Responding` (the detector fires at most once per `Responding` phase).
pub struct InterruptionDetector {
    config: InterruptConfig,
    high_energy_window: VecDeque<bool>,
    speech_start_at: Option<Instant>,
    last_interrupt_at: Option<Instant>,
    fired_this_phase: bool,
}

impl InterruptionDetector {
    /// Create a new detector from configuration.
    #[must_use]
    pub fn new(config: InterruptConfig) -> Self {
        let capacity = config.required_samples.max(1);
        Self {
            config,
            high_energy_window: VecDeque::with_capacity(capacity),
            speech_start_at: None,
            last_interrupt_at: None,
            fired_this_phase: false,
        }
    }

    /// Re-arm the detector on entering `Responding`. Must be called once per
    /// phase transition; the detector will not fire again until this is
    /// called, even if the underlying energy conditions persist.
    pub fn rearm(&mut self) {
        self.fired_this_phase = false;
        self.high_energy_window.clear();
        self.speech_start_at = None;
    }

    /// Process one inbound frame's energy against the given baseline.
    ///
    /// Returns a [`VadTick`] indicating whether to fire the cancel signal.
    /// No-op (never fires) if `enabled` is false or the detector already
    /// fired during this `Responding` phase.
    pub fn process_frame(&mut self, energy: f32, baseline: f32, now: Instant) -> VadTick {
        if !self.config.enabled || self.fired_this_phase {
            return VadTick { fire_cancel: false };
        }

        let threshold = (baseline * self.config.baseline_factor).max(self.config.min_energy);
        let is_loud = energy > threshold;

        if is_loud {
            if self.speech_start_at.is_none() {
                self.speech_start_at = Some(now);
            }
        } else {
            self.high_energy_window.clear();
            self.speech_start_at = None;
        }

        let capacity = self.config.required_samples.max(1);
        self.high_energy_window.push_back(is_loud);
        while self.high_energy_window.len() > capacity {
            self.high_energy_window.pop_front();
        }

        let window_all_loud = self.high_energy_window.len() == capacity
            && self.high_energy_window.iter().all(|&loud| loud);

        let sustained = self.speech_start_at.is_some_and(|start| {
            now.duration_since(start) >= Duration::from_millis(u64::from(self.config.min_speech_ms))
        });

        let debounced = self.last_interrupt_at.is_none_or(|last| {
            now.duration_since(last) >= Duration::from_millis(u64::from(self.config.debounce_ms))
        });

        if window_all_loud && sustained && debounced {
            self.last_interrupt_at = Some(now);
            self.high_energy_window.clear();
            self.fired_this_phase = true;
            info!("interruption detector fired: barge-in cancel");
            return VadTick { fire_cancel: true };
        }

        VadTick { fire_cancel: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det() -> InterruptionDetector {
        InterruptionDetector::new(InterruptConfig::default())
    }

    #[test]
    fn barge_in_scenario_from_spec_section_8() {
        // Energies [320, 340, 900, 950, 930] at 20ms spacing, baseline 300,
        // defaults (min_energy=500, baseline_factor=2.0, min_speech_ms=100,
        // debounce=300, required_samples=2). Threshold = max(500, 600)=600.
        let mut d = det();
        let baseline = 300.0;
        let t0 = Instant::now();
        let energies = [320.0, 340.0, 900.0, 950.0, 930.0];
        let mut fired_at = None;
        for (i, &e) in energies.iter().enumerate() {
            let now = t0 + Duration::from_millis(20 * i as u64);
            let tick = d.process_frame(e, baseline, now);
            if tick.fire_cancel {
                fired_at = Some(i);
                break;
            }
        }
        assert_eq!(
            fired_at,
            Some(4),
            "expected cancel at frame index 4 (5th frame)"
        );
    }

    #[test]
    fn fires_at_most_once_per_responding_phase() {
        let mut d = det();
        let t0 = Instant::now();
        let mut fires = 0;
        for i in 0..20 {
            let now = t0 + Duration::from_millis(20 * i);
            if d.process_frame(2000.0, 100.0, now).fire_cancel {
                fires += 1;
            }
        }
        assert_eq!(fires, 1);
    }

    #[test]
    fn rearm_allows_a_second_fire() {
        let mut d = det();
        let t0 = Instant::now();
        for i in 0..10 {
            d.process_frame(2000.0, 100.0, t0 + Duration::from_millis(20 * i));
        }
        d.rearm();
        let t1 = t0 + Duration::from_secs(2);
        let mut fired = false;
        for i in 0..10 {
            if d
                .process_frame(2000.0, 100.0, t1 + Duration::from_millis(20 * i))
                .fire_cancel
            {
                fired = true;
                break;
            }
        }
        assert!(fired);
    }

    #[test]
    fn disabled_never_fires() {
        let cfg = InterruptConfig {
            enabled: false,
            ..InterruptConfig::default()
        };
        let mut d = InterruptionDetector::new(cfg);
        let t0 = Instant::now();
        for i in 0..20 {
            assert!(
                !d.process_frame(5000.0, 100.0, t0 + Duration::from_millis(20 * i))
                    .fire_cancel
            );
        }
    }

    #[test]
    fn baseline_converges_to_constant_energy_within_100_frames() {
        let mut stats = EnergyStats::default();
        let target = 1200.0;
        for _ in 0..100 {
            stats.update_baseline(target);
        }
        let ratio = (stats.baseline() - target).abs() / target;
        assert!(ratio <= 0.05, "baseline={} target={target}", stats.baseline());
    }
}
