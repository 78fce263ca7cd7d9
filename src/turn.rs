//! Turn Assembler (C3): consumes STT partial/final events and applies the
//! end-of-turn silence gate to emit utterances (spec §4.3).

use crate::config::TurnConfig;
use crate::pipeline::messages::{SttEvent, Utterance};
use std::time::{Duration, Instant};

/// Mutable partial transcript under assembly (spec §3 `TurnBuffer`).
#[derive(Debug, Clone)]
pub struct TurnBuffer {
    text: String,
    is_final: bool,
    last_speech_at: Instant,
    last_partial_at: Instant,
}

impl TurnBuffer {
    /// A freshly reset buffer, as created at the start of every listening
    /// phase (spec §3 invariant).
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            text: String::new(),
            is_final: false,
            last_speech_at: now,
            last_partial_at: now,
        }
    }

    /// Current best-effort utterance text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    fn ends_with_terminal_punctuation(&self) -> bool {
        matches!(self.text.trim_end().chars().last(), Some('.' | '!' | '?'))
    }

    /// Apply a partial STT event (`is_final=false`, spec §4.3).
    pub fn apply_partial(&mut self, text: &str, now: Instant) {
        self.last_partial_at = now;
        self.last_speech_at = now;
        if self.text.is_empty() || !self.is_final {
            self.text = text.to_string();
        }
    }

    /// Apply a final STT event (`is_final=true`, spec §4.3).
    pub fn apply_final(&mut self, text: &str, now: Instant) {
        if !self.text.is_empty() && !self.ends_with_terminal_punctuation() {
            self.text.push(' ');
            self.text.push_str(text);
        } else {
            self.text = text.to_string();
        }
        self.is_final = true;
        self.last_speech_at = now;
    }

    /// Evaluate the end-of-turn gate (spec §4.3): fires when `is_final`
    /// (or fast-path conditions hold), the silence threshold has elapsed
    /// since the last speech event, and no partial has arrived in the last
    /// 300ms.
    #[must_use]
    pub fn should_fire(&self, config: &TurnConfig, now: Instant) -> bool {
        if self.text.is_empty() {
            return false;
        }
        let fast_path = config.interim_processing_enabled && self.text.len() >= config.interim_min_length;
        if !self.is_final && !fast_path {
            return false;
        }
        let silence = Duration::from_secs_f32(config.silence_threshold_sec.max(0.0));
        if now.duration_since(self.last_speech_at) < silence {
            return false;
        }
        if now.duration_since(self.last_partial_at) < Duration::from_millis(300) {
            return false;
        }
        true
    }

    /// Consume the buffer into an [`Utterance`], per the `from_final` flag
    /// it was fired under.
    #[must_use]
    pub fn into_utterance(self) -> Utterance {
        Utterance {
            from_final: self.is_final,
            text: self.text,
        }
    }
}

/// Owns the turn-in-progress state machine for one session: applies STT
/// events to a [`TurnBuffer`] and decides when to fire an utterance.
pub struct TurnAssembler {
    config: TurnConfig,
    buffer: TurnBuffer,
}

impl TurnAssembler {
    /// Create a new assembler with a freshly reset buffer.
    #[must_use]
    pub fn new(config: TurnConfig, now: Instant) -> Self {
        Self {
            config,
            buffer: TurnBuffer::new(now),
        }
    }

    /// Apply an inbound STT event to the buffer (spec §4.3).
    pub fn on_stt_event(&mut self, event: &SttEvent, now: Instant) {
        if event.is_final {
            self.buffer.apply_final(&event.text, now);
        } else {
            self.buffer.apply_partial(&event.text, now);
        }
    }

    /// Evaluate the end-of-turn gate. If it fires, resets the buffer and
    /// returns the fired [`Utterance`] — unless the fired text is empty
    /// (spec §8 boundary behaviour: "Final STT event with empty text must
    /// not produce an empty utterance dispatch"), in which case the buffer
    /// is reset without firing.
    pub fn tick(&mut self, now: Instant) -> Option<Utterance> {
        if !self.buffer.should_fire(&self.config, now) {
            return None;
        }
        let fired = std::mem::replace(&mut self.buffer, TurnBuffer::new(now));
        if fired.text().trim().is_empty() {
            return None;
        }
        Some(fired.into_utterance())
    }

    /// Reset the buffer atomically, e.g. on entering a new listening phase
    /// or after a cancel signal (spec §3 invariant, §4.2 cancel semantics).
    pub fn reset(&mut self, now: Instant) {
        self.buffer = TurnBuffer::new(now);
    }
}

/// Period of the end-of-turn ticker (spec §5: "≤50 ms period").
pub const TICK_PERIOD: Duration = Duration::from_millis(50);

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> TurnConfig {
        TurnConfig {
            silence_threshold_sec: 0.8,
            interim_processing_enabled: false,
            interim_min_length: 5,
        }
    }

    #[test]
    fn partial_then_silence_does_not_fire_before_threshold() {
        let t0 = Instant::now();
        let mut a = TurnAssembler::new(cfg(), t0);
        a.on_stt_event(
            &SttEvent {
                text: "hello".into(),
                is_final: false,
                confidence: 0.9,
                start_ms: 0,
                end_ms: 100,
            },
            t0,
        );
        assert!(a.tick(t0 + Duration::from_millis(500)).is_none());
    }

    #[test]
    fn stt_flap_scenario_fires_once_with_final_text() {
        // spec §8 scenario 5.
        let t0 = Instant::now();
        let mut a = TurnAssembler::new(cfg(), t0);
        a.on_stt_event(
            &SttEvent {
                text: "hello".into(),
                is_final: false,
                confidence: 0.9,
                start_ms: 0,
                end_ms: 100,
            },
            t0,
        );
        let t1 = t0 + Duration::from_millis(200);
        assert!(a.tick(t1).is_none());

        let t2 = t1 + Duration::from_millis(50);
        a.on_stt_event(
            &SttEvent {
                text: "hello there".into(),
                is_final: true,
                confidence: 0.95,
                start_ms: 0,
                end_ms: 400,
            },
            t2,
        );
        assert!(a.tick(t2 + Duration::from_millis(300)).is_none());

        let fire_at = t2 + Duration::from_millis(800);
        let fired = a.tick(fire_at).expect("should fire");
        assert_eq!(fired.text, "hello there");
        assert!(fired.from_final);

        assert!(a.tick(fire_at + Duration::from_millis(100)).is_none());
    }

    #[test]
    fn interim_fast_path_fires_on_long_partial() {
        // spec §8 scenario 6.
        let config = TurnConfig {
            silence_threshold_sec: 0.05,
            interim_processing_enabled: true,
            interim_min_length: 8,
        };
        let t0 = Instant::now();
        let mut a = TurnAssembler::new(config, t0);
        a.on_stt_event(
            &SttEvent {
                text: "I want to schedule a meeting".into(),
                is_final: false,
                confidence: 0.8,
                start_ms: 0,
                end_ms: 900,
            },
            t0,
        );
        assert!(a.tick(t0 + Duration::from_millis(20)).is_none());
        let fired = a
            .tick(t0 + Duration::from_millis(360))
            .expect("fast path should fire");
        assert!(!fired.from_final);
        assert_eq!(fired.text, "I want to schedule a meeting");
    }

    #[test]
    fn short_partial_in_fast_path_does_not_fire() {
        let config = TurnConfig {
            silence_threshold_sec: 0.05,
            interim_processing_enabled: true,
            interim_min_length: 20,
        };
        let t0 = Instant::now();
        let mut a = TurnAssembler::new(config, t0);
        a.on_stt_event(
            &SttEvent {
                text: "hi".into(),
                is_final: false,
                confidence: 0.8,
                start_ms: 0,
                end_ms: 100,
            },
            t0,
        );
        assert!(a.tick(t0 + Duration::from_secs(1)).is_none());
    }

    #[test]
    fn empty_final_text_does_not_dispatch() {
        let t0 = Instant::now();
        let mut a = TurnAssembler::new(cfg(), t0);
        a.on_stt_event(
            &SttEvent {
                text: String::new(),
                is_final: true,
                confidence: 0.0,
                start_ms: 0,
                end_ms: 0,
            },
            t0,
        );
        assert!(a.tick(t0 + Duration::from_secs(2)).is_none());
    }

    #[test]
    fn final_appends_when_no_terminal_punctuation() {
        let t0 = Instant::now();
        let mut buf = TurnBuffer::new(t0);
        buf.apply_final("hello", t0);
        buf.apply_final("world", t0);
        assert_eq!(buf.text(), "hello world");
    }

    #[test]
    fn final_replaces_after_terminal_punctuation() {
        let t0 = Instant::now();
        let mut buf = TurnBuffer::new(t0);
        buf.apply_final("hello.", t0);
        buf.apply_final("world", t0);
        assert_eq!(buf.text(), "world");
    }
}
