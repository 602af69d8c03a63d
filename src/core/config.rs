use anyhow::{Context, Result};
use chrono::NaiveDate;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{fs, path::PathBuf};
use tracing::debug;

use crate::core::error::SimError;

/// Tolerance when checking that target weights sum to 1.0.
const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Contribution and rebalancing rules for one backtest run.
///
/// The asset universe is the key set of `target_weights`; a `BTreeMap` keeps
/// iteration order deterministic across runs.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Plan {
    pub initial_cash: f64,
    pub monthly_investment: f64,
    pub additional_investment: f64,
    /// Month (1-12) in which the annual rebalance runs.
    pub rebalance_month: u32,
    pub target_weights: BTreeMap<String, f64>,
    /// Asset whose returns drive the dip and drawdown signals. Defaults to
    /// the first asset of the universe.
    pub primary_asset: Option<String>,
}

impl Plan {
    /// Symbols in the plan universe, in deterministic order.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.target_weights.keys().map(String::as_str)
    }

    pub fn primary(&self) -> &str {
        self.primary_asset
            .as_deref()
            .or_else(|| self.target_weights.keys().next().map(String::as_str))
            .unwrap_or("")
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if self.target_weights.is_empty() {
            return Err(SimError::InvalidPlan(
                "target_weights must name at least one asset".to_string(),
            ));
        }
        if !(self.initial_cash > 0.0) {
            return Err(SimError::InvalidPlan(format!(
                "initial_cash must be positive, got {}",
                self.initial_cash
            )));
        }
        if self.monthly_investment < 0.0 {
            return Err(SimError::InvalidPlan(format!(
                "monthly_investment must not be negative, got {}",
                self.monthly_investment
            )));
        }
        if self.additional_investment < 0.0 {
            return Err(SimError::InvalidPlan(format!(
                "additional_investment must not be negative, got {}",
                self.additional_investment
            )));
        }
        if !(1..=12).contains(&self.rebalance_month) {
            return Err(SimError::InvalidPlan(format!(
                "rebalance_month must be between 1 and 12, got {}",
                self.rebalance_month
            )));
        }
        for (symbol, weight) in &self.target_weights {
            if !(0.0..=1.0).contains(weight) {
                return Err(SimError::InvalidPlan(format!(
                    "weight for {symbol} must be within [0, 1], got {weight}"
                )));
            }
        }
        let sum: f64 = self.target_weights.values().sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(SimError::InvalidPlan(format!(
                "target weights sum to {sum}, expected 1.0"
            )));
        }
        if let Some(primary) = &self.primary_asset {
            if !self.target_weights.contains_key(primary) {
                return Err(SimError::InvalidPlan(format!(
                    "primary_asset {primary} is not in target_weights"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct YahooProviderConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub yahoo: Option<YahooProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            yahoo: Some(YahooProviderConfig {
                base_url: "https://query1.finance.yahoo.com".to_string(),
            }),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub plan: Plan,
    /// First calendar day of the backtest window (inclusive).
    pub start_date: NaiveDate,
    /// Last calendar day of the backtest window (inclusive).
    pub end_date: NaiveDate,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "foliosim", "foliosim")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }
}
