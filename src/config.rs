// =============================================================================
// Engine Configuration — hot-reloadable settings with atomic save
// =============================================================================
//
// Every tunable of the engine lives here so a deployment can be reconfigured
// without a rebuild. Persistence uses the tmp + rename pattern to prevent
// corruption on crash. All fields carry serde defaults so adding new fields
// never breaks loading an older config file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_symbols() -> Vec<String> {
    vec![
        "BTC_USDT".to_string(),
        "ETH_USDT".to_string(),
        "SOL_USDT".to_string(),
    ]
}

fn default_history_retention_secs() -> f64 {
    900.0
}

fn default_account_balance() -> f64 {
    10_000.0
}

fn default_broadcast_interval_secs() -> f64 {
    1.0
}

fn default_slippage_pct() -> f64 {
    0.0
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Symbols the engine tracks at startup.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Baseline history retention per symbol in seconds. Individual symbols
    /// grow past this when an indicator needs a longer lookback.
    #[serde(default = "default_history_retention_secs")]
    pub history_retention_secs: f64,

    /// Account balance used for position sizing in paper mode.
    #[serde(default = "default_account_balance")]
    pub account_balance: f64,

    /// Minimum seconds between backtest progress broadcasts.
    #[serde(default = "default_broadcast_interval_secs")]
    pub broadcast_interval_secs: f64,

    /// Slippage applied by the backtest order manager (percent).
    #[serde(default = "default_slippage_pct")]
    pub slippage_pct: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            history_retention_secs: default_history_retention_secs(),
            account_balance: default_account_balance(),
            broadcast_interval_secs: default_broadcast_interval_secs(),
            slippage_pct: default_slippage_pct(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist to `path` atomically (write `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self).context("failed to serialise engine config")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = EngineConfig::default();
        assert_eq!(config.symbols.len(), 3);
        assert_eq!(config.history_retention_secs, 900.0);
        assert_eq!(config.account_balance, 10_000.0);
        assert_eq!(config.slippage_pct, 0.0);
    }

    #[test]
    fn empty_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.symbols, default_symbols());
        assert_eq!(config.broadcast_interval_secs, 1.0);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "symbols": ["DOGE_USDT"], "slippage_pct": 0.1 }"#).unwrap();
        assert_eq!(config.symbols, vec!["DOGE_USDT"]);
        assert_eq!(config.slippage_pct, 0.1);
        assert_eq!(config.account_balance, 10_000.0);
    }

    #[test]
    fn roundtrip_serialisation() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.symbols, parsed.symbols);
        assert_eq!(config.history_retention_secs, parsed.history_retention_secs);
    }
}
