use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

use tokio::time::Instant;

use crate::domain::UserId;

// ============== Inbound Admission (Sliding Window) ==============

/// How many admissions between sweeps of idle actors.
const PRUNE_EVERY: u64 = 1024;

#[derive(Debug, Default)]
struct Windows {
    by_actor: HashMap<UserId, VecDeque<Instant>>,
    admitted_since_prune: u64,
}

/// Per-actor sliding-window cap on inbound events.
///
/// Saturated actors are dropped, never delayed: this runs on the update
/// consumer's path and must not block it.
#[derive(Debug)]
pub struct AdmissionLimiter {
    limit: usize,
    window: Duration,
    windows: Mutex<Windows>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdmissionStatus {
    pub in_window: usize,
    pub limit: usize,
}

impl AdmissionLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit as usize,
            window,
            windows: Mutex::new(Windows::default()),
        }
    }

    pub fn admit(&self, actor: UserId) -> bool {
        self.admit_at(actor, Instant::now())
    }

    pub fn admit_at(&self, actor: UserId, now: Instant) -> bool {
        let mut w = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        let window = self.window;
        let log = w.by_actor.entry(actor).or_default();
        evict_older_than(log, now, window);
        if log.len() >= self.limit {
            return false;
        }
        log.push_back(now);

        w.admitted_since_prune += 1;
        if w.admitted_since_prune >= PRUNE_EVERY {
            w.admitted_since_prune = 0;
            prune(&mut w.by_actor, now, window);
        }
        true
    }

    pub fn status_at(&self, actor: UserId, now: Instant) -> AdmissionStatus {
        let w = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let in_window = w
            .by_actor
            .get(&actor)
            .map(|log| {
                log.iter()
                    .filter(|t| now.saturating_duration_since(**t) < self.window)
                    .count()
            })
            .unwrap_or(0);
        AdmissionStatus {
            in_window,
            limit: self.limit,
        }
    }

    /// Forget actors with no admissions inside the window.
    pub fn prune_at(&self, now: Instant) {
        let mut w = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        prune(&mut w.by_actor, now, self.window);
    }

    pub fn tracked_actors(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .by_actor
            .len()
    }
}

fn evict_older_than(log: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = log.front() {
        if now.saturating_duration_since(*front) >= window {
            log.pop_front();
        } else {
            break;
        }
    }
}

fn prune(by_actor: &mut HashMap<UserId, VecDeque<Instant>>, now: Instant, window: Duration) {
    by_actor.retain(|_, log| {
        evict_older_than(log, now, window);
        !log.is_empty()
    });
}
