use serde::{Deserialize, Serialize};

use crate::{
    amount::{Amount, UNIT},
    clock::Timestamp,
    error::ConfigError,
};

pub const DEFAULT_WINDOW_SECS: u64 = 120;
pub const DEFAULT_THRESHOLD: Amount = UNIT;

/// Creation-time parameters. Neither value can change once a ledger exists.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EscrowConfig {
    /// Length of the deposit window, counted from creation.
    pub window_secs: u64,
    /// Minimum pooled amount, in base units, for finalize to succeed.
    pub threshold: Amount,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl EscrowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_secs == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.threshold == 0 {
            return Err(ConfigError::ZeroThreshold);
        }
        Ok(())
    }

    pub fn deadline_from(&self, created_at: Timestamp) -> Result<Timestamp, ConfigError> {
        self.validate()?;
        created_at
            .checked_add(self.window_secs)
            .ok_or(ConfigError::DeadlineOverflow)
    }
}
