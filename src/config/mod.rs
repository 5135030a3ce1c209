//! Configuration management for the ETF auto-buyer.
//!
//! Loads settings from a config file in the config directory, `AUTOBUY__*`
//! environment overrides and the DEGIRO credential variables.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

pub const USERNAME_ENV: &str = "DEGIRO_USERNAME";
pub const PASSWORD_ENV: &str = "DEGIRO_PASSWORD";
pub const TOTP_SEED_ENV: &str = "DEGIRO_TOTP_SEED";
pub const SCHEDULE_ENV: &str = "SCHEDULE";
pub const BUY_ON_LAUNCH_ENV: &str = "BUY_ON_LAUNCH";
pub const CONFIG_DIRECTORY_ENV: &str = "CONFIG_DIRECTORY";

pub const CONFIG_DIRECTORY_DEFAULT: &str = "config/";
pub const CONFIG_FILE_STEM: &str = "config";
pub const SESSION_FILE: &str = "session";
pub const LOG_FILE: &str = "autobuy.log";

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Broker login credentials (normally supplied through the environment)
    #[serde(default)]
    pub credentials: Credentials,
    /// Desired portfolio, raw ratios (normalized before use)
    #[serde(default)]
    pub portfolio: Vec<TargetPosition>,
    /// Cash bounds and fee limits
    #[serde(default)]
    pub investment: InvestmentConfig,
    /// Order placement parameters
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// When runs are triggered
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    /// Base32 TOTP seed, only needed when two-factor login is enabled
    #[serde(default, skip_serializing)]
    pub totp_seed: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("totp_seed", &self.totp_seed.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// One instrument of the desired portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetPosition {
    pub symbol: String,
    pub isin: String,
    /// Broker exchange identifier the product must be listed on
    pub exchange: u32,
    /// Desired share of the portfolio, relative to the other ratios
    pub ratio: Decimal,
    /// Only buy when the broker offers this product without transaction fees
    #[serde(default)]
    pub core_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestmentConfig {
    /// Skip the run when the account holds less cash than this
    #[serde(default = "default_min_cash_invest")]
    pub min_cash_invest: Decimal,
    /// Never invest more than this in a single run
    #[serde(default = "default_max_cash_invest")]
    pub max_cash_invest: Decimal,
    /// Currency of the cash funds used for buying
    #[serde(default = "default_cash_currency")]
    pub cash_currency: String,
    /// Drop purchases whose fee exceeds this percentage of the order value
    #[serde(default)]
    pub max_fee_percentage: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Added to the quoted price to tolerate movement before execution
    #[serde(default = "default_price_buffer")]
    pub price_buffer: Decimal,
    /// Place limit orders at the buffered price instead of market orders
    #[serde(default = "default_true")]
    pub use_limit_order: bool,
    /// Allow buying while earlier orders are still open
    #[serde(default)]
    pub allow_open_orders: bool,
    /// Compute and check orders without executing them
    #[serde(default = "default_true")]
    pub dry_run: bool,
    /// Pause between consecutive orders of a batch
    #[serde(default = "default_order_interval_ms")]
    pub order_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Cron expression, 5 fields (minute precision) or 6-7 fields (with seconds)
    #[serde(default = "default_cron")]
    pub cron: String,
    /// Run once immediately at startup
    #[serde(default)]
    pub buy_on_launch: bool,
}

// Default value functions
fn default_min_cash_invest() -> Decimal {
    Decimal::new(100, 0)
}

fn default_max_cash_invest() -> Decimal {
    Decimal::new(1000, 0)
}

fn default_cash_currency() -> String {
    "EUR".to_string()
}

fn default_price_buffer() -> Decimal {
    Decimal::new(2, 2) // 0.02
}

fn default_true() -> bool {
    true
}

fn default_order_interval_ms() -> u64 {
    1000
}

fn default_cron() -> String {
    "0 12 1 * *".to_string() // noon on the first of every month
}

impl Config {
    /// Load configuration from `.env`, the config directory and environment variables.
    pub fn load(config_dir: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file_stem = config_dir.join(CONFIG_FILE_STEM);
        let config = config::Config::builder()
            .add_source(config::File::with_name(&file_stem.to_string_lossy()).required(false))
            .add_source(config::Environment::default().separator("__").prefix("AUTOBUY"))
            .set_override_option("credentials.username", std::env::var(USERNAME_ENV).ok())?
            .set_override_option("credentials.password", std::env::var(PASSWORD_ENV).ok())?
            .set_override_option("credentials.totp_seed", std::env::var(TOTP_SEED_ENV).ok())?
            .set_override_option("schedule.cron", std::env::var(SCHEDULE_ENV).ok())?
            .set_override_option(
                "schedule.buy_on_launch",
                std::env::var(BUY_ON_LAUNCH_ENV).ok(),
            )?
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.portfolio.is_empty(), "portfolio must not be empty");

        let mut seen = HashSet::new();
        for target in &self.portfolio {
            anyhow::ensure!(
                !target.symbol.is_empty() && !target.isin.is_empty(),
                "portfolio entries need a symbol and an ISIN"
            );
            anyhow::ensure!(
                target.ratio > Decimal::ZERO,
                "ratio for {} must be positive",
                target.symbol
            );
            anyhow::ensure!(
                seen.insert((target.isin.to_ascii_uppercase(), target.exchange)),
                "duplicate portfolio entry {} ({}) on exchange {}",
                target.symbol,
                target.isin,
                target.exchange
            );
        }

        anyhow::ensure!(
            self.investment.min_cash_invest >= Decimal::ZERO
                && self.investment.min_cash_invest <= self.investment.max_cash_invest,
            "min_cash_invest must be between 0 and max_cash_invest"
        );

        anyhow::ensure!(
            !self.investment.cash_currency.is_empty(),
            "cash_currency must not be empty"
        );

        if let Some(max_fee) = self.investment.max_fee_percentage {
            anyhow::ensure!(max_fee > Decimal::ZERO, "max_fee_percentage must be positive");
        }

        anyhow::ensure!(
            self.execution.price_buffer >= Decimal::ZERO,
            "price_buffer must not be negative"
        );

        crate::scheduler::parse_schedule(&self.schedule.cron)
            .with_context(|| format!("invalid cron schedule \"{}\"", self.schedule.cron))?;

        Ok(())
    }

    /// Portfolio with ratios divided by their sum, so they add up to one.
    pub fn normalized_portfolio(&self) -> Vec<TargetPosition> {
        let total: Decimal = self.portfolio.iter().map(|t| t.ratio).sum();
        self.portfolio
            .iter()
            .map(|t| TargetPosition {
                ratio: crate::utils::safe_div(t.ratio, total),
                ..t.clone()
            })
            .collect()
    }

    /// Whether any credentials were supplied at all.
    pub fn has_credentials(&self) -> bool {
        !self.credentials.username.is_empty() && !self.credentials.password.is_empty()
    }
}

/// Resolve the config directory from the CLI flag or `CONFIG_DIRECTORY`.
pub fn config_directory(cli_value: Option<PathBuf>) -> PathBuf {
    cli_value
        .or_else(|| std::env::var(CONFIG_DIRECTORY_ENV).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(CONFIG_DIRECTORY_DEFAULT))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            portfolio: Vec::new(),
            investment: InvestmentConfig::default(),
            execution: ExecutionConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl Default for InvestmentConfig {
    fn default() -> Self {
        Self {
            min_cash_invest: default_min_cash_invest(),
            max_cash_invest: default_max_cash_invest(),
            cash_currency: default_cash_currency(),
            max_fee_percentage: None,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            price_buffer: default_price_buffer(),
            use_limit_order: default_true(),
            allow_open_orders: false,
            dry_run: default_true(),
            order_interval_ms: default_order_interval_ms(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: default_cron(),
            buy_on_launch: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn target(symbol: &str, isin: &str, ratio: Decimal) -> TargetPosition {
        TargetPosition {
            symbol: symbol.to_string(),
            isin: isin.to_string(),
            exchange: 200,
            ratio,
            core_only: false,
        }
    }

    fn valid_config() -> Config {
        Config {
            portfolio: vec![
                target("IWDA", "IE00B4L5Y983", dec!(88)),
                target("EMIM", "IE00BKM4GZ66", dec!(12)),
            ],
            ..Config::default()
        }
    }

    #[test]
    fn test_default_portfolio_config_is_valid() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_empty_portfolio_rejected() {
        assert!(Config::default().validate().is_err());
    }

    #[test]
    fn test_ratios_normalized() {
        let normalized = valid_config().normalized_portfolio();
        assert_eq!(normalized[0].ratio, dec!(0.88));
        assert_eq!(normalized[1].ratio, dec!(0.12));
        let sum: Decimal = normalized.iter().map(|t| t.ratio).sum();
        assert_eq!(sum, Decimal::ONE);
    }

    #[test]
    fn test_normalization_leaves_config_untouched() {
        let config = valid_config();
        let _ = config.normalized_portfolio();
        assert_eq!(config.portfolio[0].ratio, dec!(88));
    }

    #[test]
    fn test_min_above_max_rejected() {
        let mut config = valid_config();
        config.investment.min_cash_invest = dec!(500);
        config.investment.max_cash_invest = dec!(400);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_isin_rejected() {
        let mut config = valid_config();
        config
            .portfolio
            .push(target("IWDA2", "ie00b4l5y983", dec!(10)));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_ratio_rejected() {
        let mut config = valid_config();
        config.portfolio[1].ratio = Decimal::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_positive_fee_threshold_rejected() {
        let mut config = valid_config();
        config.investment.max_fee_percentage = Some(Decimal::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_schedule_rejected() {
        let mut config = valid_config();
        config.schedule.cron = "every monday".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credentials_debug_redacted() {
        let credentials = Credentials {
            username: "alice".into(),
            password: "hunter2".into(),
            totp_seed: Some("JBSWY3DPEHPK3PXP".into()),
        };
        let printed = format!("{:?}", credentials);
        assert!(printed.contains("alice"));
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("JBSWY3DPEHPK3PXP"));
    }

    #[test]
    fn test_load_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{
                "portfolio": [
                    { "symbol": "VWRL", "isin": "IE00B3RBWM25", "exchange": 200, "ratio": 3 },
                    { "symbol": "AGGH", "isin": "IE00BDBRDM35", "exchange": 608, "ratio": 1, "core_only": true }
                ],
                "investment": { "min_cash_invest": 250, "max_cash_invest": 1500, "max_fee_percentage": 1.5 },
                "execution": { "dry_run": false }
            }"#,
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.portfolio.len(), 2);
        assert_eq!(config.portfolio[1].exchange, 608);
        assert!(config.portfolio[1].core_only);
        assert_eq!(config.investment.min_cash_invest, dec!(250));
        assert_eq!(config.investment.max_fee_percentage, Some(dec!(1.5)));
        assert!(!config.execution.dry_run);
        // untouched sections fall back to defaults
        assert_eq!(config.execution.price_buffer, dec!(0.02));
        assert_eq!(config.investment.cash_currency, "EUR");
    }
}
