//! Wall-clock maintenance timers.
//!
//! Every timer fires an event into the dispatcher queue; no scheduler
//! task touches lobby state directly. Under high system load the mute
//! and idle sweeps are skipped to shed work.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::state::events::Event;

/// Load average above which the periodic sweeps are skipped.
const LOAD_SHED_THRESHOLD: f64 = 8.0;

/// One-minute load average, when the platform exposes it.
fn load_average() -> Option<f64> {
    let data = std::fs::read_to_string("/proc/loadavg").ok()?;
    data.split_whitespace().next()?.parse().ok()
}

fn overloaded() -> bool {
    match load_average() {
        Some(load) if load > LOAD_SHED_THRESHOLD => {
            debug!(load, "High load, skipping sweep");
            true
        }
        _ => false,
    }
}

/// Spawn all maintenance timers.
pub fn spawn_tasks(events: mpsc::UnboundedSender<Event>) {
    // 1 s: channel mute expiry
    {
        let events = events.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if !overloaded() && events.send(Event::SweepMutes).is_err() {
                    break;
                }
            }
        });
    }

    // 10 s: idle and flooded connections
    {
        let events = events.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if !overloaded() && events.send(Event::SweepIdle).is_err() {
                    break;
                }
            }
        });
    }

    // 20 min: registration / rename throttle decay
    {
        let events = events.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(20 * 60));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if events.send(Event::DecayThrottles).is_err() {
                    break;
                }
            }
        });
    }

    // 24 h: database clean + access audit
    {
        let events = events.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // the first tick fires immediately; skip it so the clean runs daily
            interval.tick().await;
            loop {
                interval.tick().await;
                if events.send(Event::DailyClean).is_err() {
                    break;
                }
            }
        });
    }

    info!("Maintenance timers started");
}
