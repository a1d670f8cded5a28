//! Randomized spacing between consecutive greetings, so a large batch of
//! joins does not go out as a burst.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `[dispatch.pacing]` section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pacing {
    #[serde(with = "humantime_serde")]
    pub min: Duration,
    #[serde(with = "humantime_serde")]
    pub max: Duration,
}

impl Pacing {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            min: delay,
            max: delay,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.min > self.max {
            return Err(format!(
                "dispatch.pacing.min ({:?}) exceeds dispatch.pacing.max ({:?})",
                self.min, self.max
            ));
        }
        Ok(())
    }

    /// Uniform in `[min, max]`
    pub fn next_delay(&self) -> Duration {
        if self.min >= self.max {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..=self.max)
    }
}
