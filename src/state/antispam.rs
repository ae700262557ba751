//! Per-channel flood scoring.
//!
//! Each `(channel, session)` pair carries a floating score: every message
//! costs `1 + max(0, len - bonus_length) / bonus_length`, and the score
//! decays by one unit per `timeout` seconds, recomputed lazily on touch.
//! Crossing `aggressiveness` triggers an automatic channel mute.

use std::collections::HashMap;

use super::SessionId;

/// Tunable scorer parameters, adjustable per channel via ChanServ.
#[derive(Debug, Clone, PartialEq)]
pub struct AntiSpamSettings {
    /// Seconds for one unit of score to decay.
    pub timeout: f64,
    /// Score threshold above which the auto-mute fires.
    pub aggressiveness: f64,
    /// Message length granted before extra cost accrues.
    pub bonus_length: f64,
    /// Auto-mute duration in seconds.
    pub duration_secs: i64,
    /// Suppress the channel announcement when muting.
    pub quiet: bool,
}

impl Default for AntiSpamSettings {
    fn default() -> Self {
        Self {
            timeout: 10.0,
            aggressiveness: 5.0,
            bonus_length: 50.0,
            duration_secs: 30,
            quiet: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Score {
    value: f64,
    last_update: f64,
}

/// Scorer state for one channel.
#[derive(Debug, Clone, Default)]
pub struct AntiSpam {
    pub enabled: bool,
    pub settings: AntiSpamSettings,
    scores: HashMap<SessionId, Score>,
}

impl AntiSpam {
    /// Account one message; returns true when the sender must be muted.
    ///
    /// `now` is a monotonic timestamp in seconds.
    pub fn record(&mut self, sid: SessionId, msg_len: usize, now: f64) -> bool {
        if !self.enabled {
            return false;
        }
        let settings = &self.settings;
        let entry = self.scores.entry(sid).or_default();

        let elapsed = (now - entry.last_update).max(0.0);
        entry.value = (entry.value - elapsed / settings.timeout).max(0.0);
        entry.value += cost(msg_len, settings.bonus_length);
        entry.last_update = now;

        entry.value > settings.aggressiveness
    }

    /// Drop the score of a departed session.
    pub fn forget(&mut self, sid: SessionId) {
        self.scores.remove(&sid);
    }

    /// Settings summary for the ChanServ status line.
    pub fn describe(&self) -> String {
        let s = &self.settings;
        format!(
            "timeout:{}, quiet:{}, aggressiveness:{}, bonuslength:{}, duration:{}",
            s.timeout as i64,
            if s.quiet { "on" } else { "off" },
            s.aggressiveness as i64,
            s.bonus_length as i64,
            s.duration_secs,
        )
    }
}

fn cost(msg_len: usize, bonus_length: f64) -> f64 {
    1.0 + (msg_len as f64 - bonus_length).max(0.0) / bonus_length
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armed() -> AntiSpam {
        AntiSpam {
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn disabled_scorer_never_fires() {
        let mut spam = AntiSpam::default();
        for _ in 0..100 {
            assert!(!spam.record(1, 10, 0.0));
        }
    }

    #[test]
    fn sixth_rapid_message_trips_default_threshold() {
        let mut spam = armed();
        for i in 0..5 {
            assert!(!spam.record(1, 5, i as f64 * 0.1), "message {} should pass", i + 1);
        }
        assert!(spam.record(1, 5, 0.5));
    }

    #[test]
    fn long_messages_cost_more() {
        let mut spam = armed();
        // 150 chars => cost 1 + 100/50 = 3; two messages stay under 5, a third crosses it
        assert!(!spam.record(1, 150, 0.0));
        assert!(!spam.record(1, 150, 0.1));
        assert!(spam.record(1, 150, 0.2));
    }

    #[test]
    fn score_decays_over_time() {
        let mut spam = armed();
        for i in 0..5 {
            spam.record(1, 5, i as f64 * 0.1);
        }
        // one minute later the score has fully decayed
        assert!(!spam.record(1, 5, 60.0));
    }

    #[test]
    fn scores_are_per_session() {
        let mut spam = armed();
        for i in 0..5 {
            spam.record(1, 5, i as f64 * 0.1);
        }
        assert!(!spam.record(2, 5, 0.5));
    }

    #[test]
    fn describe_defaults() {
        let spam = AntiSpam::default();
        assert_eq!(
            spam.describe(),
            "timeout:10, quiet:off, aggressiveness:5, bonuslength:50, duration:30"
        );
    }
}
