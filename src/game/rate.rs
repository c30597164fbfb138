//! Sliding-window rate limiter keyed by participant.

use std::collections::{BTreeMap, VecDeque};

use crate::core::time::Millis;
use crate::game::state::ParticipantId;

/// How long an idle identity is kept before `cleanup` purges it.
pub const RATE_RETENTION_MS: u64 = 60_000;

/// Per-identity request log.
#[derive(Debug, Default)]
pub struct RateGuard {
    windows: BTreeMap<ParticipantId, VecDeque<Millis>>,
}

impl RateGuard {
    /// Create an empty guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request if fewer than `max_requests` were accepted in the
    /// last `window_ms`.
    pub fn is_allowed(
        &mut self,
        id: &ParticipantId,
        max_requests: usize,
        window_ms: u64,
        now: Millis,
    ) -> bool {
        let log = self.windows.entry(*id).or_default();
        while let Some(&oldest) = log.front() {
            if now.saturating_sub(oldest) >= window_ms {
                log.pop_front();
            } else {
                break;
            }
        }
        if log.len() >= max_requests {
            return false;
        }
        log.push_back(now);
        true
    }

    /// Purge identities whose newest request is older than the retention
    /// window. Returns the number purged.
    pub fn cleanup(&mut self, now: Millis) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, log| {
            log.back()
                .is_some_and(|&newest| now.saturating_sub(newest) < RATE_RETENTION_MS)
        });
        before - self.windows.len()
    }

    /// Forget an identity.
    pub fn remove(&mut self, id: &ParticipantId) {
        self.windows.remove(id);
    }

    /// Number of tracked identities.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}
