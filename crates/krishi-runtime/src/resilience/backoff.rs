//! Delay schedule between executor retry rounds.
//!
//! Delays come from `backon` builders. A policy with `R` rounds needs at
//! most `R - 1` delays: none is applied after the final round.

use backon::{BackoffBuilder, ConstantBuilder, ExponentialBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::humantime_duration;

/// How long to wait before starting the next retry round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoundBackoff {
    /// Same delay before every round
    Fixed {
        #[serde(with = "humantime_duration")]
        delay: Duration,
    },

    /// Delay grows by `factor` per round, capped at `max_delay`
    Exponential {
        #[serde(with = "humantime_duration")]
        min_delay: Duration,
        #[serde(with = "humantime_duration")]
        max_delay: Duration,
        factor: f32,
    },
}

impl Default for RoundBackoff {
    fn default() -> Self {
        RoundBackoff::Fixed {
            delay: Duration::from_secs(2),
        }
    }
}

impl RoundBackoff {
    /// No delay between rounds.
    pub fn none() -> Self {
        RoundBackoff::Fixed {
            delay: Duration::ZERO,
        }
    }

    /// Delays to apply between `rounds` rounds.
    pub fn delays(&self, rounds: u32) -> Box<dyn Iterator<Item = Duration> + Send> {
        let gaps = rounds.saturating_sub(1) as usize;
        match self {
            RoundBackoff::Fixed { delay } => Box::new(
                ConstantBuilder::default()
                    .with_delay(*delay)
                    .with_max_times(gaps)
                    .build(),
            ),
            RoundBackoff::Exponential {
                min_delay,
                max_delay,
                factor,
            } => Box::new(
                ExponentialBuilder::default()
                    .with_min_delay(*min_delay)
                    .with_max_delay(*max_delay)
                    .with_factor(*factor)
                    .with_max_times(gaps)
                    .build(),
            ),
        }
    }
}
