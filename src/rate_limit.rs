use crate::settings::RateLimitSettings;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct CallerWindow {
    hits: VecDeque<Instant>,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    callers: HashMap<String, CallerWindow>,
    max_requests: usize,
    window: Duration,
    max_callers: usize,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration, max_callers: usize) -> Self {
        Self {
            callers: HashMap::new(),
            max_requests,
            window,
            max_callers: max_callers.max(1),
        }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::new(
            settings.max_requests,
            Duration::from_millis(settings.window_ms),
            settings.max_callers,
        )
    }

    pub fn is_allowed(&mut self, caller: &str) -> bool {
        self.is_allowed_at(caller, Instant::now())
    }

    pub fn is_allowed_at(&mut self, caller: &str, now: Instant) -> bool {
        if !self.callers.contains_key(caller) && self.callers.len() >= self.max_callers {
            self.sweep_at(now);
            // Callers at their limit are never evicted; if nobody else can go, the newcomer is refused.
            if self.callers.len() >= self.max_callers && !self.evict_least_recent(now) {
                return false;
            }
        }

        let window = self.window;
        let entry = self
            .callers
            .entry(caller.to_string())
            .or_insert_with(|| CallerWindow {
                hits: VecDeque::new(),
                last_seen: now,
            });
        entry.last_seen = now;

        while let Some(oldest) = entry.hits.front() {
            if now.saturating_duration_since(*oldest) > window {
                entry.hits.pop_front();
            } else {
                break;
            }
        }

        if entry.hits.len() < self.max_requests {
            entry.hits.push_back(now);
            true
        } else {
            false
        }
    }

    pub fn sweep(&mut self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&mut self, now: Instant) -> usize {
        let window = self.window;
        let before = self.callers.len();
        self.callers.retain(|_, entry| {
            entry
                .hits
                .back()
                .map(|latest| now.saturating_duration_since(*latest) <= window)
                .unwrap_or(false)
        });
        before - self.callers.len()
    }

    fn evict_least_recent(&mut self, now: Instant) -> bool {
        let window = self.window;
        let max_requests = self.max_requests;
        let oldest = self
            .callers
            .iter()
            .filter(|(_, entry)| {
                let live = entry
                    .hits
                    .iter()
                    .filter(|hit| now.saturating_duration_since(**hit) <= window)
                    .count();
                live < max_requests
            })
            .min_by_key(|(_, entry)| entry.last_seen)
            .map(|(caller, _)| caller.clone());
        match oldest {
            Some(caller) => {
                self.callers.remove(&caller);
                true
            }
            None => false,
        }
    }

    pub fn tracked_callers(&self) -> usize {
        self.callers.len()
    }
}
