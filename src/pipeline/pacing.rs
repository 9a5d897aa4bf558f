use std::time::Duration;

use anyhow::{bail, Result};
use rand::Rng;

/// Uniform random delay between two bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub fn new(min: Duration, max: Duration) -> Result<Self> {
        if min > max { bail!("delay range is inverted: min {:?} > max {:?}", min, max); }
        Ok(DelayRange { min, max })
    }

    pub fn from_millis(min_ms: u64, max_ms: u64) -> Result<Self> {
        Self::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms))
    }

    pub const fn zero() -> Self { DelayRange { min: Duration::ZERO, max: Duration::ZERO } }

    pub fn is_zero(&self) -> bool { self.max.is_zero() }

    pub fn sample(&self) -> Duration {
        if self.min == self.max { return self.min; }
        let ms = rand::rng().random_range(self.min.as_millis()..=self.max.as_millis());
        Duration::from_millis(ms as u64)
    }

    /// Sleep for one sampled delay and return it.
    pub async fn pause(&self) -> Duration {
        if self.is_zero() { return Duration::ZERO; }
        let d = self.sample();
        tokio::time::sleep(d).await;
        d
    }
}
