//! Unit-of-work configuration.

use crate::error::ConfigError;

/// Environment variable overriding [`UnitOfWorkConfig::max_cascade_cycles`].
pub const MAX_CASCADE_CYCLES_ENV: &str = "UNITWORK_MAX_CASCADE_CYCLES";

/// Default bound on drain cycles per transaction.
pub const DEFAULT_MAX_CASCADE_CYCLES: usize = 128;

/// Settings shared by every unit of work a manager creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitOfWorkConfig {
    /// Maximum number of dispatch cycles one drain may run. Exceeding it
    /// fails the transaction with `CascadeLimitExceeded`.
    pub max_cascade_cycles: usize,
}

impl Default for UnitOfWorkConfig {
    fn default() -> Self {
        Self {
            max_cascade_cycles: DEFAULT_MAX_CASCADE_CYCLES,
        }
    }
}

impl UnitOfWorkConfig {
    /// Reads configuration from the process environment, falling back to
    /// defaults for unset variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a variable is set but unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading values through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a value is set but unusable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(raw) = lookup(MAX_CASCADE_CYCLES_ENV) {
            let cycles = raw
                .trim()
                .parse::<usize>()
                .map_err(|e| ConfigError::Invalid {
                    key: MAX_CASCADE_CYCLES_ENV,
                    value: raw.clone(),
                    reason: e.to_string(),
                })?;
            if cycles == 0 {
                return Err(ConfigError::Invalid {
                    key: MAX_CASCADE_CYCLES_ENV,
                    value: raw,
                    reason: "must allow at least one cycle".to_owned(),
                });
            }
            config.max_cascade_cycles = cycles;
        }
        Ok(config)
    }

    /// Returns a copy with a different cascade bound. Zero is raised to one.
    #[must_use]
    pub fn with_max_cascade_cycles(mut self, cycles: usize) -> Self {
        self.max_cascade_cycles = cycles.max(1);
        self
    }
}
