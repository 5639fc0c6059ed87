//! Call pacing for rate-limited providers.
//!
//! The provider enforces a global per-minute ceiling per endpoint class that is
//! shared by all of a caller's concurrent workers. With a ceiling of `G` calls per
//! minute and `W` workers, each worker waits `60 / (G / W)` seconds between its own
//! calls so that the workers together stay within `G`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ScreenError;

/// Ceiling for endpoint classes that do not scale with the account tier.
pub const METADATA_CALLS_PER_MINUTE: u64 = 60;

const NANOS_PER_MINUTE: u64 = 60_000_000_000;

/// Account tier of the provider subscription.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountTier {
    /// Unauthenticated or fewer than 120 points.
    Unverified,
    /// Registered account, 120 to 599 points.
    Registered,
    /// 600 to 4999 points.
    #[default]
    Intermediate,
    /// 5000 points and above.
    Premium,
}

impl AccountTier {
    /// Maps an account's point balance to its tier.
    #[must_use]
    pub const fn from_points(points: u32) -> Self {
        match points {
            0..120 => Self::Unverified,
            120..600 => Self::Registered,
            600..5000 => Self::Intermediate,
            _ => Self::Premium,
        }
    }

    /// Documented per-minute ceiling for tier-scaled endpoints.
    #[must_use]
    pub const fn calls_per_minute(&self) -> u64 {
        match self {
            Self::Unverified => 2,
            Self::Registered => 5,
            Self::Intermediate => 20,
            Self::Premium => 200,
        }
    }
}

impl fmt::Display for AccountTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unverified => "unverified",
            Self::Registered => "registered",
            Self::Intermediate => "intermediate",
            Self::Premium => "premium",
        };
        f.write_str(name)
    }
}

impl FromStr for AccountTier {
    type Err = ScreenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unverified" => Ok(Self::Unverified),
            "registered" => Ok(Self::Registered),
            "intermediate" => Ok(Self::Intermediate),
            "premium" => Ok(Self::Premium),
            other => Err(ScreenError::InvalidParameter(format!(
                "unknown account tier: {other}"
            ))),
        }
    }
}

/// Class of provider endpoint, each with its own ceiling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    /// Entity metadata lookups; fixed ceiling regardless of tier.
    Metadata,
    /// Financial statements and audit records; ceiling scales with tier.
    Financial,
}

impl EndpointClass {
    /// Global calls-per-minute ceiling for this class under `tier`.
    #[must_use]
    pub const fn ceiling(&self, tier: AccountTier) -> u64 {
        match self {
            Self::Metadata => METADATA_CALLS_PER_MINUTE,
            Self::Financial => tier.calls_per_minute(),
        }
    }
}

/// Computes per-worker pacing delays.
///
/// Pure: holds only the caller-supplied extra delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RateScheduler {
    extra_delay: Duration,
}

impl RateScheduler {
    /// Creates a scheduler with no extra delay.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            extra_delay: Duration::ZERO,
        }
    }

    /// Adds a fixed delay on top of every computed delay.
    #[must_use]
    pub const fn with_extra_delay(mut self, extra_delay: Duration) -> Self {
        self.extra_delay = extra_delay;
        self
    }

    /// Returns the configured extra delay.
    #[must_use]
    pub const fn extra_delay(&self) -> Duration {
        self.extra_delay
    }

    /// Delay a worker must wait before its next call to `class`.
    ///
    /// `workers == 0` is treated as a single worker.
    #[must_use]
    pub fn delay_for(&self, class: EndpointClass, tier: AccountTier, workers: usize) -> Duration {
        let ceiling = class.ceiling(tier).max(1);
        let workers = u64::try_from(workers.max(1)).unwrap_or(u64::MAX);
        let nanos = NANOS_PER_MINUTE.saturating_mul(workers) / ceiling;
        Duration::from_nanos(nanos) + self.extra_delay
    }

    /// [`delay_for`](Self::delay_for) in seconds.
    #[must_use]
    pub fn delay_secs(&self, class: EndpointClass, tier: AccountTier, workers: usize) -> f64 {
        self.delay_for(class, tier, workers).as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_premium_delay_scales_with_workers() {
        let scheduler = RateScheduler::new();
        let tier = AccountTier::Premium;
        assert_eq!(
            scheduler.delay_for(EndpointClass::Financial, tier, 10),
            Duration::from_secs(3)
        );
        assert_eq!(
            scheduler.delay_for(EndpointClass::Financial, tier, 1),
            Duration::from_millis(300)
        );
        assert!((scheduler.delay_secs(EndpointClass::Financial, tier, 10) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_metadata_ignores_tier() {
        let scheduler = RateScheduler::new();
        let delays: Vec<_> = [
            AccountTier::Unverified,
            AccountTier::Registered,
            AccountTier::Intermediate,
            AccountTier::Premium,
        ]
        .into_iter()
        .map(|tier| scheduler.delay_for(EndpointClass::Metadata, tier, 4))
        .collect();
        assert!(delays.iter().all(|d| *d == Duration::from_secs(4)));
    }

    #[test]
    fn test_zero_workers_treated_as_one() {
        let scheduler = RateScheduler::new();
        assert_eq!(
            scheduler.delay_for(EndpointClass::Financial, AccountTier::Intermediate, 0),
            scheduler.delay_for(EndpointClass::Financial, AccountTier::Intermediate, 1)
        );
    }

    #[test]
    fn test_extra_delay_is_additive() {
        let scheduler = RateScheduler::new().with_extra_delay(Duration::from_millis(250));
        assert_eq!(
            scheduler.delay_for(EndpointClass::Financial, AccountTier::Intermediate, 2),
            Duration::from_millis(6250)
        );
    }

    #[test]
    fn test_tier_from_points() {
        assert_eq!(AccountTier::from_points(0), AccountTier::Unverified);
        assert_eq!(AccountTier::from_points(119), AccountTier::Unverified);
        assert_eq!(AccountTier::from_points(120), AccountTier::Registered);
        assert_eq!(AccountTier::from_points(2000), AccountTier::Intermediate);
        assert_eq!(AccountTier::from_points(5000), AccountTier::Premium);
        assert_eq!(AccountTier::default(), AccountTier::Intermediate);
        assert_eq!("Premium".parse::<AccountTier>().unwrap(), AccountTier::Premium);
        assert!("gold".parse::<AccountTier>().is_err());
    }
}
