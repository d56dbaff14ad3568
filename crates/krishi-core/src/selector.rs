//! Credential scoring.
//!
//! The selector is a pure function of the usage records and the current
//! instant. It rewards unused quota and recent good health:
//!
//! ```text
//! score(c) = (max_requests_per_window - c.requests_in_window)
//!          + (time_since_last_error(c) > error_cooldown ? health_bonus : 0)
//! ```
//!
//! The highest score wins and ties go to the lowest id. A credential whose
//! quota is used up in its current window is never selected until that
//! window resets.

use std::time::{Duration, Instant};

use crate::credential::{CredentialId, UsageRecord};

/// Tunable scoring constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorConfig {
    /// Requests a credential may serve per window
    pub max_requests_per_window: u32,

    /// Length of a rate-limit window
    pub window: Duration,

    /// How long an error de-prioritizes a credential
    pub error_cooldown: Duration,

    /// Score bonus for credentials outside their error cooldown
    pub health_bonus: u32,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            max_requests_per_window: 15,
            window: Duration::from_secs(60),
            error_cooldown: Duration::from_secs(30),
            health_bonus: 10,
        }
    }
}

/// Result of a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Use this credential next
    Ready(CredentialId),

    /// Every credential has used its quota; the earliest window resets
    /// after `retry_in`
    Saturated { retry_in: Duration },
}

/// Picks the best credential for the next attempt.
#[derive(Debug, Clone, Default)]
pub struct KeySelector {
    config: SelectorConfig,
}

impl KeySelector {
    /// Create a selector with the given constants.
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    /// The scoring constants.
    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// Score one credential at `now`, or `None` if its quota is used up.
    pub fn score(&self, record: &UsageRecord, now: Instant) -> Option<u64> {
        let used = record.effective_requests(now, self.config.window);
        let remaining = self.config.max_requests_per_window.checked_sub(used)?;
        if remaining == 0 {
            return None;
        }

        let bonus = if record.is_healthy(now, self.config.error_cooldown) {
            self.config.health_bonus
        } else {
            0
        };

        Some(u64::from(remaining) + u64::from(bonus))
    }

    /// Select among `records` at `now`.
    ///
    /// Records are expected in id order; ties resolve to the earliest one.
    pub fn select(&self, records: &[UsageRecord], now: Instant) -> Selection {
        let mut best: Option<(CredentialId, u64)> = None;

        for record in records {
            let Some(score) = self.score(record, now) else {
                continue;
            };
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((record.id, score)),
            }
        }

        match best {
            Some((id, score)) => {
                tracing::trace!(credential = id, score, "Selected credential");
                Selection::Ready(id)
            }
            None => {
                let retry_in = records
                    .iter()
                    .map(|r| r.time_until_reset(now, self.config.window))
                    .min()
                    .unwrap_or(self.config.window);
                Selection::Saturated { retry_in }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn selector(limit: u32) -> KeySelector {
        KeySelector::new(SelectorConfig {
            max_requests_per_window: limit,
            ..Default::default()
        })
    }

    fn pool(n: usize, now: Instant) -> Vec<UsageRecord> {
        (0..n).map(|id| UsageRecord::new(id, now)).collect()
    }

    #[test]
    fn test_tie_breaks_to_lowest_id() {
        let now = Instant::now();
        let records = pool(3, now);
        assert_eq!(selector(5).select(&records, now), Selection::Ready(0));
    }

    #[test]
    fn test_prefers_unused_quota() {
        let now = Instant::now();
        let mut records = pool(3, now);
        records[0].record_request();
        records[1].record_request();

        assert_eq!(selector(5).select(&records, now), Selection::Ready(2));
    }

    #[test]
    fn test_recent_error_deprioritizes_without_excluding() {
        let now = Instant::now();
        let mut records = pool(2, now);
        records[0].record_failure(now, true);

        let s = selector(5);
        assert_eq!(s.select(&records, now), Selection::Ready(1));

        // Quota still counts: a nearly used-up healthy credential keeps
        // the lead until it is saturated
        for _ in 0..4 {
            records[1].record_request();
        }
        assert_eq!(s.score(&records[0], now), Some(5));
        assert_eq!(s.score(&records[1], now), Some(11));

        records[1].record_request();
        assert_eq!(s.select(&records, now), Selection::Ready(0));

        // Once its cooldown passes, credential 0 regains the bonus
        let later = now + Duration::from_secs(31);
        assert_eq!(s.score(&records[0], later), Some(15));
    }

    #[test]
    fn test_saturated_credential_is_never_selected_within_window() {
        let now = Instant::now();
        let mut records = pool(2, now);
        records[0].record_request();
        records[0].record_request();

        let s = selector(2);
        for offset in [0, 10, 30, 60] {
            let at = now + Duration::from_secs(offset);
            assert_eq!(s.select(&records, at), Selection::Ready(1));
        }

        // After the window elapses the quota is available again
        let after = now + Duration::from_secs(61);
        assert_eq!(s.select(&records, after), Selection::Ready(0));
    }

    #[test]
    fn test_all_saturated_reports_earliest_reset() {
        let base = Instant::now();
        let now = base + Duration::from_secs(40);
        let mut records = vec![UsageRecord::new(0, now), UsageRecord::new(1, base)];
        for record in &mut records {
            record.record_request();
        }

        match selector(1).select(&records, now) {
            Selection::Saturated { retry_in } => {
                assert_eq!(retry_in, Duration::from_millis(20_001));
            }
            other => panic!("expected saturation, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_pool_is_saturated() {
        let now = Instant::now();
        assert!(matches!(
            selector(1).select(&[], now),
            Selection::Saturated { .. }
        ));
    }

    proptest! {
        #[test]
        fn prop_selection_is_deterministic(
            used in proptest::collection::vec(0u32..6, 1..8),
            erred in proptest::collection::vec(any::<bool>(), 8),
        ) {
            let now = Instant::now();
            let records: Vec<UsageRecord> = used
                .iter()
                .enumerate()
                .map(|(id, &count)| {
                    let mut record = UsageRecord::new(id, now);
                    record.requests_in_window = count;
                    if erred[id] {
                        record.record_failure(now, false);
                    }
                    record
                })
                .collect();

            let s = selector(5);
            let first = s.select(&records, now);
            prop_assert_eq!(first, s.select(&records, now));

            if let Selection::Ready(id) = first {
                prop_assert!(records[id].requests_in_window < 5);
                let best = s.score(&records[id], now).unwrap();
                for record in &records {
                    if let Some(score) = s.score(record, now) {
                        prop_assert!(score <= best);
                        if score == best {
                            prop_assert!(record.id >= id);
                        }
                    }
                }
            } else {
                prop_assert!(records.iter().all(|r| r.requests_in_window >= 5));
            }
        }
    }
}
