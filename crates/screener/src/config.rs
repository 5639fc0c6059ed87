//! Runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use screener_core::{AccountTier, RateScheduler, Result, ScreenError, TtlPolicy};

/// Environment variable naming the cache directory.
pub const CACHE_DIR_ENV: &str = "SCREENER_CACHE_DIR";
/// Environment variable naming the account tier.
pub const ACCOUNT_TIER_ENV: &str = "SCREENER_ACCOUNT_TIER";
/// Environment variable holding the account's point balance.
pub const ACCOUNT_POINTS_ENV: &str = "SCREENER_ACCOUNT_POINTS";
/// Environment variable holding the per-call timeout in seconds.
pub const CALL_TIMEOUT_ENV: &str = "SCREENER_CALL_TIMEOUT_SECS";
/// Environment variable holding the extra per-call delay in milliseconds.
pub const EXTRA_DELAY_ENV: &str = "SCREENER_EXTRA_DELAY_MS";

const DEFAULT_CACHE_DIR: &str = "data/cache";
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Worker pool limits for batch runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    /// Upper bound on workers for entities served entirely from cache.
    pub ready_concurrency_cap: usize,
    /// Upper bound on workers for entities that need provider calls.
    pub max_fetch_concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            ready_concurrency_cap: 32,
            max_fetch_concurrency: 8,
        }
    }
}

/// Screener configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct ScreenerConfig {
    /// Directory holding cache files.
    pub cache_dir: PathBuf,
    /// Provider account tier used for pacing.
    pub tier: AccountTier,
    /// Timeout applied to every provider call.
    pub call_timeout: Duration,
    /// Delay added on top of every computed pacing delay.
    pub extra_delay: Duration,
    /// Cache expiry policy.
    pub ttl: TtlPolicy,
    /// Batch worker limits.
    pub batch: BatchConfig,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            tier: AccountTier::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            extra_delay: Duration::ZERO,
            ttl: TtlPolicy::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl ScreenerConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads overrides from the process environment.
    ///
    /// # Errors
    /// Returns [`ScreenError::InvalidParameter`] for malformed values.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads overrides through `lookup`, which maps a variable name to its value.
    ///
    /// # Errors
    /// Returns [`ScreenError::InvalidParameter`] for malformed values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(dir) = get(CACHE_DIR_ENV) {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(tier) = get(ACCOUNT_TIER_ENV) {
            config.tier = tier.parse()?;
        } else if let Some(points) = get(ACCOUNT_POINTS_ENV) {
            config.tier = AccountTier::from_points(parse_number(ACCOUNT_POINTS_ENV, &points)?);
        }
        if let Some(secs) = get(CALL_TIMEOUT_ENV) {
            let secs: u64 = parse_number(CALL_TIMEOUT_ENV, &secs)?;
            if secs == 0 {
                return Err(ScreenError::InvalidParameter(format!(
                    "{CALL_TIMEOUT_ENV} must be positive"
                )));
            }
            config.call_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = get(EXTRA_DELAY_ENV) {
            config.extra_delay = Duration::from_millis(parse_number(EXTRA_DELAY_ENV, &ms)?);
        }
        Ok(config)
    }

    /// Set the cache directory.
    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Set the account tier.
    #[must_use]
    pub const fn with_tier(mut self, tier: AccountTier) -> Self {
        self.tier = tier;
        self
    }

    /// Set the per-call timeout.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the extra per-call delay.
    #[must_use]
    pub const fn with_extra_delay(mut self, delay: Duration) -> Self {
        self.extra_delay = delay;
        self
    }

    /// Set the cache expiry policy.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the batch worker limits.
    #[must_use]
    pub const fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    /// Scheduler carrying the configured extra delay.
    #[must_use]
    pub const fn scheduler(&self) -> RateScheduler {
        RateScheduler::new().with_extra_delay(self.extra_delay)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ScreenError::InvalidParameter(format!("{name}: invalid number {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ScreenerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ScreenerConfig::default());
        assert_eq!(config.cache_dir, PathBuf::from("data/cache"));
        assert_eq!(config.tier, AccountTier::Intermediate);
        assert_eq!(config.call_timeout, Duration::from_secs(30));
        assert_eq!(config.batch.ready_concurrency_cap, 32);
    }

    #[test]
    fn test_env_overrides() {
        let config = ScreenerConfig::from_lookup(lookup(&[
            (CACHE_DIR_ENV, "/tmp/screener"),
            (ACCOUNT_POINTS_ENV, "5000"),
            (CALL_TIMEOUT_ENV, "5"),
            (EXTRA_DELAY_ENV, "250"),
        ]))
        .unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/screener"));
        assert_eq!(config.tier, AccountTier::Premium);
        assert_eq!(config.call_timeout, Duration::from_secs(5));
        assert_eq!(config.scheduler().extra_delay(), Duration::from_millis(250));
    }

    #[test]
    fn test_tier_name_wins_over_points() {
        let config = ScreenerConfig::from_lookup(lookup(&[
            (ACCOUNT_TIER_ENV, "registered"),
            (ACCOUNT_POINTS_ENV, "9000"),
        ]))
        .unwrap();
        assert_eq!(config.tier, AccountTier::Registered);
    }

    #[test]
    fn test_malformed_values_rejected() {
        assert!(ScreenerConfig::from_lookup(lookup(&[(ACCOUNT_POINTS_ENV, "lots")])).is_err());
        assert!(ScreenerConfig::from_lookup(lookup(&[(CALL_TIMEOUT_ENV, "0")])).is_err());
        assert!(ScreenerConfig::from_lookup(lookup(&[(ACCOUNT_TIER_ENV, "gold")])).is_err());
    }
}
