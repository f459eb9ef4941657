//! Tuning knobs for the rid cache.
//!
//! The gap constants are empirical; they trade memory for insert headroom and
//! have no derivation beyond "works well". They are exposed as configuration
//! and can be changed per table through PRAGMA-style updates.

use std::time::Duration;

use emberdb_error::{EmberError, Result};

/// Default rid spacing budget: `65536 * 4096`.
pub const DEFAULT_GAP_BUDGET: u64 = 65_536 * 4_096;

/// Smallest rid spacing chosen for very large tables.
pub const DEFAULT_MIN_GAP: i64 = 8;

/// Largest rid spacing chosen for small tables.
pub const DEFAULT_MAX_GAP: i64 = 16_384;

/// Deferral between a build request and the build itself.
pub const DEFAULT_BUILD_DELAY: Duration = Duration::from_millis(50);

/// Configuration backing `PRAGMA rid_cache.*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RidCacheConfig {
    gap_budget: u64,
    min_gap: i64,
    max_gap: i64,
    build_delay: Duration,
}

impl RidCacheConfig {
    /// Build a validated config.
    ///
    /// # Errors
    ///
    /// Returns [`EmberError::InvalidConfig`] if `gap_budget` is zero,
    /// `min_gap < 2` (a midpoint needs at least one free integer) or
    /// `min_gap > max_gap`.
    pub fn new(gap_budget: u64, min_gap: i64, max_gap: i64, build_delay: Duration) -> Result<Self> {
        validate(gap_budget, min_gap, max_gap)?;
        Ok(Self {
            gap_budget,
            min_gap,
            max_gap,
            build_delay,
        })
    }

    #[must_use]
    pub const fn gap_budget(self) -> u64 {
        self.gap_budget
    }

    #[must_use]
    pub const fn min_gap(self) -> i64 {
        self.min_gap
    }

    #[must_use]
    pub const fn max_gap(self) -> i64 {
        self.max_gap
    }

    #[must_use]
    pub const fn build_delay(self) -> Duration {
        self.build_delay
    }

    /// Rid spacing for an index of `size` entries:
    /// `clamp(gap_budget / max(size, 1), min_gap, max_gap)`.
    #[must_use]
    pub fn hash_rid_difference(self, size: usize) -> i64 {
        let size = u64::try_from(size.max(1)).unwrap_or(u64::MAX);
        let raw = i64::try_from(self.gap_budget / size).unwrap_or(i64::MAX);
        raw.clamp(self.min_gap, self.max_gap)
    }

    /// Apply a `PRAGMA rid_cache.<name> = <value>` style update.
    ///
    /// The update is rejected as a whole if the resulting config would be
    /// invalid; `self` is left unchanged in that case.
    ///
    /// # Errors
    ///
    /// Returns [`EmberError::InvalidConfig`] for an unknown name, a value that
    /// does not parse, or a combination that fails validation.
    pub fn set_from_pragma(&mut self, name: &str, value: &str) -> Result<()> {
        let mut next = *self;
        match name {
            "rid_cache.gap_budget" => next.gap_budget = parse_pragma(name, value)?,
            "rid_cache.min_gap" => next.min_gap = parse_pragma(name, value)?,
            "rid_cache.max_gap" => next.max_gap = parse_pragma(name, value)?,
            "rid_cache.build_delay_ms" => {
                next.build_delay = Duration::from_millis(parse_pragma(name, value)?);
            }
            _ => return Err(EmberError::invalid_config(name, "unknown setting")),
        }
        validate(next.gap_budget, next.min_gap, next.max_gap)?;
        *self = next;
        Ok(())
    }
}

impl Default for RidCacheConfig {
    fn default() -> Self {
        Self {
            gap_budget: DEFAULT_GAP_BUDGET,
            min_gap: DEFAULT_MIN_GAP,
            max_gap: DEFAULT_MAX_GAP,
            build_delay: DEFAULT_BUILD_DELAY,
        }
    }
}

/// Per-table engine settings handed to a [`TableRuntime`](crate::TableRuntime).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineConfig {
    pub rid_cache: RidCacheConfig,
}

fn validate(gap_budget: u64, min_gap: i64, max_gap: i64) -> Result<()> {
    if gap_budget == 0 {
        return Err(EmberError::invalid_config(
            "rid_cache.gap_budget",
            "must be positive",
        ));
    }
    if min_gap < 2 {
        return Err(EmberError::invalid_config(
            "rid_cache.min_gap",
            format!("must be at least 2, got {min_gap}"),
        ));
    }
    if min_gap > max_gap {
        return Err(EmberError::invalid_config(
            "rid_cache.max_gap",
            format!("must be >= min_gap ({min_gap}), got {max_gap}"),
        ));
    }
    Ok(())
}

fn parse_pragma<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| EmberError::invalid_config(name, format!("cannot parse {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_gap_is_clamped() {
        let cfg = RidCacheConfig::default();
        // Small tables get the widest gap.
        assert_eq!(cfg.hash_rid_difference(0), DEFAULT_MAX_GAP);
        assert_eq!(cfg.hash_rid_difference(4), DEFAULT_MAX_GAP);
        // 65536*4096 / 16384 == 16384: the boundary.
        assert_eq!(cfg.hash_rid_difference(16_384), 16_384);
        assert_eq!(cfg.hash_rid_difference(65_536), 4_096);
        // Huge tables bottom out at the minimum.
        assert_eq!(cfg.hash_rid_difference(100_000_000), DEFAULT_MIN_GAP);
    }

    #[test]
    fn test_new_rejects_bad_bounds() {
        let delay = Duration::ZERO;
        assert!(RidCacheConfig::new(0, 8, 16, delay).is_err());
        assert!(RidCacheConfig::new(1024, 1, 16, delay).is_err());
        assert!(RidCacheConfig::new(1024, 32, 16, delay).is_err());
        let cfg = RidCacheConfig::new(1024, 2, 2, delay).unwrap();
        assert_eq!(cfg.hash_rid_difference(10), 2);
    }

    #[test]
    fn test_pragma_updates() {
        let mut cfg = RidCacheConfig::default();
        cfg.set_from_pragma("rid_cache.max_gap", "64").unwrap();
        cfg.set_from_pragma("rid_cache.build_delay_ms", " 5 ").unwrap();
        assert_eq!(cfg.max_gap(), 64);
        assert_eq!(cfg.build_delay(), Duration::from_millis(5));
        assert_eq!(cfg.hash_rid_difference(1), 64);
    }

    #[test]
    fn test_pragma_rejects_and_preserves() {
        let mut cfg = RidCacheConfig::default();
        let before = cfg;

        let err = cfg.set_from_pragma("rid_cache.min_gap", "1").unwrap_err();
        assert!(matches!(err, EmberError::InvalidConfig { .. }));
        assert!(cfg.set_from_pragma("rid_cache.max_gap", "4").is_err());
        assert!(cfg.set_from_pragma("rid_cache.gap_budget", "lots").is_err());
        assert!(cfg.set_from_pragma("rid_cache.colour", "blue").is_err());

        assert_eq!(cfg, before);
    }
}
