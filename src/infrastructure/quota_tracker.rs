use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use tokio::{sync::Mutex, time::sleep};

use crate::QuotaSnapshot;

/// The hourly GraphQL quota of an authenticated GitHub user.
pub const DEFAULT_QUOTA_LIMIT: u32 = 5000;

/// Extra time waited after a reset, so the server has rolled its window over.
const RESET_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct QuotaState {
    limit: u32,
    remaining: u32,
    reset_at: DateTime<Utc>,
    /// Whether `remaining` was reported by the server rather than estimated.
    is_synced: bool,
}

/// Tracks the API quota and holds callers back until spending is safe.
///
/// The server is the source of truth: every response re-synchronizes the tracker through
/// [`QuotaTracker::update`]. Reservations are only deducted locally while the counters are
/// an estimate, that is before the first update and after waiting for a reset.
#[derive(Debug)]
pub struct QuotaTracker {
    /// Quota units that are never spent.
    safety_buffer: u32,

    /// The last known counters.
    state: Mutex<QuotaState>,
}

impl QuotaTracker {
    /// Creates a new `QuotaTracker` that assumes a full quota until the first update.
    pub fn new(limit: u32, safety_buffer: u32) -> Self {
        Self {
            safety_buffer,
            state: Mutex::new(QuotaState {
                limit,
                remaining: limit,
                reset_at: Utc::now(),
                is_synced: false,
            }),
        }
    }

    /// Waits until `cost` units can be spent without cutting into the safety buffer.
    /// Returns how long it waited.
    pub async fn reserve(&self, cost: u32) -> Duration {
        let mut state = self.state.lock().await;
        let mut waited = Duration::ZERO;
        if i64::from(state.remaining) - i64::from(cost) < i64::from(self.safety_buffer) {
            let until_reset = (state.reset_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            if !until_reset.is_zero() {
                waited = until_reset + RESET_GRACE;
                warn!(
                    "Quota low (remaining={}, cost={cost}, buffer={}), waiting {waited:?} until reset",
                    state.remaining, self.safety_buffer
                );
                sleep(waited).await;
            }
            state.remaining = state.limit;
            state.is_synced = false;
        }
        if !state.is_synced {
            state.remaining = state.remaining.saturating_sub(cost);
        }
        debug!("Reserved {cost} quota units, {} left", state.remaining);

        waited
    }

    /// Re-synchronizes with the counters reported by the server.
    pub async fn update(&self, snapshot: &QuotaSnapshot) {
        let mut state = self.state.lock().await;
        state.limit = snapshot.limit;
        state.remaining = snapshot.remaining;
        state.reset_at = snapshot.reset_at;
        state.is_synced = true;
    }

    /// Retrieves the last known remaining units.
    pub async fn remaining(&self) -> u32 {
        self.state.lock().await.remaining
    }

    /// Retrieves a summary of the last known counters.
    pub async fn status(&self) -> String {
        let state = self.state.lock().await;

        format!(
            "Quota: remaining={}/{}, reset={}",
            state.remaining,
            state.limit,
            state.reset_at.to_rfc3339()
        )
    }
}
