//! Timeout configuration and deadline tracking
//!
//! Every external tool invocation runs under a wall-clock limit:
//! - `compile_seconds`: one compiler run (default 120)
//! - `flash_seconds`: one flasher run (default 120)
//! - `check_seconds`: installed-platform check (default 60)
//! - `index_update_seconds` / `platform_install_seconds`: toolchain install steps
//! - `termination_grace_seconds`: SIGTERM-to-SIGKILL grace when a limit expires
//!
//! The deadline only reports expiry. Killing the child is the process
//! runner's job.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Upper bound for any configured limit (one day).
const MAX_LIMIT_SECONDS: u64 = 86_400;

/// Upper bound for the termination grace period.
const MAX_GRACE_SECONDS: u64 = 60;

/// Timeout configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Maximum wall-clock time for one compile (default: 120)
    pub compile_seconds: u64,

    /// Maximum wall-clock time for one flash (default: 120)
    pub flash_seconds: u64,

    /// Maximum time for the installed-platform check (default: 60)
    pub check_seconds: u64,

    /// Maximum time for the toolchain index update step (default: 300)
    pub index_update_seconds: u64,

    /// Maximum time for the platform install step (default: 1200)
    pub platform_install_seconds: u64,

    /// Grace period between SIGTERM and SIGKILL (default: 5)
    pub termination_grace_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            compile_seconds: 120,
            flash_seconds: 120,
            check_seconds: 60,
            index_update_seconds: 300,
            platform_install_seconds: 1200,
            termination_grace_seconds: 5,
        }
    }
}

impl TimeoutConfig {
    /// Validate timeout bounds
    pub fn validate(&self) -> Result<(), TimeoutValidationError> {
        let limits = [
            ("compile_seconds", self.compile_seconds),
            ("flash_seconds", self.flash_seconds),
            ("check_seconds", self.check_seconds),
            ("index_update_seconds", self.index_update_seconds),
            ("platform_install_seconds", self.platform_install_seconds),
        ];

        for (field, value) in limits {
            if value == 0 || value > MAX_LIMIT_SECONDS {
                return Err(TimeoutValidationError::LimitOutOfBounds { field, value });
            }
        }

        if self.termination_grace_seconds == 0 || self.termination_grace_seconds > MAX_GRACE_SECONDS {
            return Err(TimeoutValidationError::GraceOutOfBounds {
                value: self.termination_grace_seconds,
            });
        }

        Ok(())
    }

    pub fn compile(&self) -> Duration {
        Duration::from_secs(self.compile_seconds)
    }

    pub fn flash(&self) -> Duration {
        Duration::from_secs(self.flash_seconds)
    }

    pub fn check(&self) -> Duration {
        Duration::from_secs(self.check_seconds)
    }

    pub fn index_update(&self) -> Duration {
        Duration::from_secs(self.index_update_seconds)
    }

    pub fn platform_install(&self) -> Duration {
        Duration::from_secs(self.platform_install_seconds)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_secs(self.termination_grace_seconds)
    }
}

/// Timeout validation errors
#[derive(Debug, thiserror::Error)]
pub enum TimeoutValidationError {
    #[error("{field} must be in (0, 86400], got {value}")]
    LimitOutOfBounds { field: &'static str, value: u64 },

    #[error("termination_grace_seconds must be in (0, 60], got {value}")]
    GraceOutOfBounds { value: u64 },
}

/// Wall-clock deadline for a single tool invocation.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    limit: Duration,
}

impl Deadline {
    /// Start a deadline that expires `limit` from now.
    pub fn after(limit: Duration) -> Self {
        Self {
            start: Instant::now(),
            limit,
        }
    }

    /// True once the limit has elapsed.
    pub fn expired(&self) -> bool {
        self.start.elapsed() >= self.limit
    }

    /// Time since the deadline was started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time left before expiry (zero once expired).
    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.elapsed())
    }

    /// The configured limit.
    pub fn limit(&self) -> Duration {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_timeout_config_default() {
        let config = TimeoutConfig::default();
        assert_eq!(config.compile_seconds, 120);
        assert_eq!(config.flash_seconds, 120);
        assert_eq!(config.compile(), Duration::from_secs(120));
        assert_eq!(config.check(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_compile() {
        let config = TimeoutConfig {
            compile_seconds: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TimeoutValidationError::LimitOutOfBounds {
                field: "compile_seconds",
                ..
            })
        ));
    }

    #[test]
    fn test_validation_install_too_large() {
        let config = TimeoutConfig {
            platform_install_seconds: 86_401,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TimeoutValidationError::LimitOutOfBounds {
                field: "platform_install_seconds",
                ..
            })
        ));
    }

    #[test]
    fn test_validation_zero_check() {
        let config = TimeoutConfig {
            check_seconds: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TimeoutValidationError::LimitOutOfBounds {
                field: "check_seconds",
                ..
            })
        ));
    }

    #[test]
    fn test_validation_grace_bounds() {
        let config = TimeoutConfig {
            termination_grace_seconds: 61,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TimeoutValidationError::GraceOutOfBounds { value: 61 })
        ));
    }

    #[test]
    fn test_deserialize_partial_uses_defaults() {
        let config: TimeoutConfig = toml::from_str("compile_seconds = 30").unwrap();
        assert_eq!(config.compile_seconds, 30);
        assert_eq!(config.flash_seconds, 120);
    }

    #[test]
    fn test_deadline_expiry() {
        let deadline = Deadline::after(Duration::from_millis(50));
        assert!(!deadline.expired());
        sleep(Duration::from_millis(80));
        assert!(deadline.expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }
}
