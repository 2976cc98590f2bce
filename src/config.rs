//! Engine configuration with TOML file support.

use crate::domain::account::{Principal, Tokens};
use crate::domain::vector::RandomPolicy;
use crate::error::{NodeError, Result};
use crate::logging::LogFormat;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for a node engine.
///
/// Every field has a default, so an empty file (or no file) is valid.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Principal that owns every derived source account.
    #[serde(default = "default_engine_principal")]
    pub engine_principal: Principal,

    /// Ledgers nodes may be created on.
    #[serde(default = "default_ledgers")]
    pub ledgers: Vec<LedgerConfig>,

    #[serde(default)]
    pub retry: RetryConfig,

    /// When `random` number descriptors are drawn.
    #[serde(default)]
    pub random_policy: RandomPolicy,

    /// Seed for the descriptor RNG. Unset means seeded from entropy.
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub id: Principal,
    /// Transfer fee charged by the ledger, used by the simulated ledger.
    #[serde(default = "default_fee")]
    pub fee: u64,
    /// Minting account owner, used by the simulated ledger to fund accounts.
    #[serde(default = "default_minter")]
    pub minter: Principal,
}

impl LedgerConfig {
    pub fn fee(&self) -> Tokens {
        Tokens::from(self.fee)
    }
}

/// Retry policy for transient ledger call failures.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine_principal: default_engine_principal(),
            ledgers: default_ledgers(),
            retry: RetryConfig::default(),
            random_policy: RandomPolicy::default(),
            seed: None,
            log_format: LogFormat::default(),
            log_level: default_log_level(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| NodeError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ledgers.is_empty() {
            return Err(NodeError::ConfigError(
                "at least one ledger must be configured".to_string(),
            ));
        }
        for (i, ledger) in self.ledgers.iter().enumerate() {
            if self.ledgers[..i].iter().any(|l| l.id == ledger.id) {
                return Err(NodeError::ConfigError(format!(
                    "ledger {} configured twice",
                    ledger.id
                )));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(NodeError::ConfigError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ledger(&self, id: &Principal) -> Option<&LedgerConfig> {
        self.ledgers.iter().find(|l| &l.id == id)
    }
}

fn default_engine_principal() -> Principal {
    Principal::new("engine")
}

fn default_ledgers() -> Vec<LedgerConfig> {
    vec![LedgerConfig {
        id: Principal::new("ledger"),
        fee: default_fee(),
        minter: default_minter(),
    }]
}

fn default_fee() -> u64 {
    10_000
}

fn default_minter() -> Principal {
    Principal::new("minter")
}

fn default_log_level() -> String {
    "info".to_string()
}
