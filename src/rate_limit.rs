//! Fixed-window request limiting for the harvest endpoint.
//!
//! Each client gets a counter and a window start. Requests inside the window bump the
//! counter and are refused once it passes the limit; the first request after the window
//! starts a fresh one. Stale entries are swept opportunistically while handling requests,
//! so memory stays bounded without a background task.
//!
//! The state lives in this process only. Several server processes each keep their own
//! counters.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Identifier used when a request carries no proxy headers
pub const ANONYMOUS_CLIENT: &str = "anonymous";

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window: Duration,
    pub sweep_interval: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: 3,
            window: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Denied { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct RateRecord {
    count: u32,
    window_start: Instant,
}

#[derive(Debug)]
struct GovernorState {
    records: HashMap<String, RateRecord>,
    last_sweep: Instant,
}

#[derive(Debug)]
pub struct RateGovernor {
    settings: RateLimitSettings,
    state: Mutex<GovernorState>,
}

impl RateGovernor {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(GovernorState {
                records: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    pub fn check(&self, client: &str) -> RateDecision {
        self.check_at(client, Instant::now())
    }

    pub fn check_at(&self, client: &str, now: Instant) -> RateDecision {
        let window = self.settings.window;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if now.saturating_duration_since(state.last_sweep) >= self.settings.sweep_interval {
            let before = state.records.len();
            state
                .records
                .retain(|_, record| now.saturating_duration_since(record.window_start) < window);
            state.last_sweep = now;
            log::debug!("Rate limiter sweep: {} -> {} tracked clients", before, state.records.len());
        }

        match state.records.get_mut(client) {
            Some(record) if now.saturating_duration_since(record.window_start) < window => {
                record.count = record.count.saturating_add(1);
                if record.count > self.settings.max_requests {
                    let elapsed = now.saturating_duration_since(record.window_start);
                    RateDecision::Denied {
                        retry_after: window.saturating_sub(elapsed),
                    }
                } else {
                    RateDecision::Allowed {
                        remaining: self.settings.max_requests - record.count,
                    }
                }
            }
            _ => {
                state.records.insert(
                    client.to_string(),
                    RateRecord {
                        count: 1,
                        window_start: now,
                    },
                );
                RateDecision::Allowed {
                    remaining: self.settings.max_requests.saturating_sub(1),
                }
            }
        }
    }

    pub fn tracked_clients(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .len()
    }
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new(RateLimitSettings::default())
    }
}

/// Bucket key for a request: the proxy's real-IP header, else the first
/// forwarded-for hop, else [`ANONYMOUS_CLIENT`].
pub fn client_identifier(real_ip: Option<&str>, forwarded_for: Option<&str>) -> String {
    real_ip
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .or_else(|| {
            forwarded_for
                .and_then(|list| list.split(',').next())
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
        })
        .unwrap_or(ANONYMOUS_CLIENT)
        .to_string()
}
