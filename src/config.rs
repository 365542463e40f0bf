//! Database configuration.
//!
//! Every option can be set explicitly; the flush threshold and
//! changeset cap additionally fall back to the `SHALE_FLUSH_THRESHOLD`
//! and `SHALE_MAX_CHANGESETS` environment variables, read once when the
//! writable database is constructed.

use serde::{Deserialize, Serialize};

use crate::table::DEFAULT_BLOCK_SIZE;

/// Environment fallback for [`DatabaseConfig::flush_threshold`].
pub const ENV_FLUSH_THRESHOLD: &str = "SHALE_FLUSH_THRESHOLD";

/// Environment fallback for [`DatabaseConfig::max_changesets`].
pub const ENV_MAX_CHANGESETS: &str = "SHALE_MAX_CHANGESETS";

const DEFAULT_FLUSH_THRESHOLD: u32 = 10_000;

/// Options for opening or creating a writable database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Block size for newly created tables, in bytes. Out-of-range or
    /// non-power-of-two values fall back to the default.
    pub block_size: u32,

    /// Number of buffered changes that trigger an automatic flush.
    /// `None` consults the environment, then defaults to 10 000.
    pub flush_threshold: Option<u32>,

    /// Maximum number of changesets worth keeping; zero disables
    /// changeset emission. `None` consults the environment, then
    /// defaults to zero.
    pub max_changesets: Option<u32>,

    /// Mark emitted changesets as unsafe to apply to a live follower.
    pub dangerous_changesets: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            block_size: DEFAULT_BLOCK_SIZE,
            flush_threshold: None,
            max_changesets: None,
            dangerous_changesets: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolvedConfig {
    pub block_size: u32,
    pub flush_threshold: u32,
    pub max_changesets: u32,
    pub dangerous_changesets: bool,
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok()?.trim().parse().ok()
}

impl DatabaseConfig {
    pub(crate) fn resolve(&self) -> ResolvedConfig {
        let block_size = if (2048..=65536).contains(&self.block_size)
            && self.block_size.is_power_of_two()
        {
            self.block_size
        } else {
            DEFAULT_BLOCK_SIZE
        };

        let flush_threshold = self
            .flush_threshold
            .or_else(|| env_u32(ENV_FLUSH_THRESHOLD))
            .filter(|&t| t > 0)
            .unwrap_or(DEFAULT_FLUSH_THRESHOLD);

        let max_changesets = self
            .max_changesets
            .or_else(|| env_u32(ENV_MAX_CHANGESETS))
            .unwrap_or(0);

        ResolvedConfig {
            block_size,
            flush_threshold,
            max_changesets,
            dangerous_changesets: self.dangerous_changesets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let resolved = DatabaseConfig::default().resolve();
        assert_eq!(resolved.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(resolved.flush_threshold, DEFAULT_FLUSH_THRESHOLD);
        assert!(!resolved.dangerous_changesets);
    }

    #[test]
    fn test_explicit_options_win() {
        let config = DatabaseConfig {
            block_size: 4096,
            flush_threshold: Some(5),
            max_changesets: Some(2),
            dangerous_changesets: true,
        };
        let resolved = config.resolve();
        assert_eq!(resolved.block_size, 4096);
        assert_eq!(resolved.flush_threshold, 5);
        assert_eq!(resolved.max_changesets, 2);
        assert!(resolved.dangerous_changesets);
    }

    #[test]
    fn test_bad_block_size_falls_back() {
        let config = DatabaseConfig {
            block_size: 3000,
            ..DatabaseConfig::default()
        };
        assert_eq!(config.resolve().block_size, DEFAULT_BLOCK_SIZE);

        let config = DatabaseConfig {
            block_size: 1,
            ..DatabaseConfig::default()
        };
        assert_eq!(config.resolve().block_size, DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn test_zero_flush_threshold_falls_back() {
        let config = DatabaseConfig {
            flush_threshold: Some(0),
            ..DatabaseConfig::default()
        };
        assert_eq!(config.resolve().flush_threshold, DEFAULT_FLUSH_THRESHOLD);
    }
}
