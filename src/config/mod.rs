use crate::Result;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradingMode {
    Paper,
    Live,
}

impl TradingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paper => "PAPER",
            Self::Live => "LIVE",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingSettings {
    #[serde(default = "default_mode")]
    pub mode: TradingMode,
    #[serde(default = "default_initial_balance")]
    pub initial_balance: f64,
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    /// Simulated fee applied to paper fills
    #[serde(default = "default_fee_rate")]
    pub paper_fee_rate: f64,
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskSettings {
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: f64,
    #[serde(default = "default_max_order_fraction")]
    pub max_order_fraction: f64,
    #[serde(default = "default_min_notional")]
    pub min_notional: f64,
    #[serde(default = "default_daily_trade_limit")]
    pub daily_trade_limit: u32,
    /// Minimum seconds between price-driven wakes per symbol
    #[serde(default = "default_wake_cooldown_secs")]
    pub wake_cooldown_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_url")]
    pub api_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_url")]
    pub url: String,
}

/// Full application settings, layered: defaults < config file < environment
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub trading: TradingSettings,
    #[serde(default)]
    pub risk: RiskSettings,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            initial_balance: default_initial_balance(),
            symbols: default_symbols(),
            paper_fee_rate: default_fee_rate(),
            quote_asset: default_quote_asset(),
        }
    }
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            max_daily_loss: default_max_daily_loss(),
            max_order_fraction: default_max_order_fraction(),
            min_notional: default_min_notional(),
            daily_trade_limit: default_daily_trade_limit(),
            wake_cooldown_secs: default_wake_cooldown_secs(),
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            api_url: default_llm_url(),
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            trading: TradingSettings::default(),
            risk: RiskSettings::default(),
            llm: LlmSettings::default(),
            database: DatabaseSettings::default(),
        }
    }
}

fn default_mode() -> TradingMode {
    TradingMode::Paper
}
fn default_initial_balance() -> f64 {
    10_000.0
}
fn default_symbols() -> Vec<String> {
    ["BTCUSDT", "ETHUSDT", "SOLUSDT", "DOGEUSDT"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_fee_rate() -> f64 {
    0.001
}
fn default_quote_asset() -> String {
    "USDT".to_string()
}
fn default_max_daily_loss() -> f64 {
    0.05
}
fn default_max_order_fraction() -> f64 {
    0.20
}
fn default_min_notional() -> f64 {
    10.0
}
fn default_daily_trade_limit() -> u32 {
    20
}
fn default_wake_cooldown_secs() -> u64 {
    60
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_temperature() -> f32 {
    0.1
}
fn default_llm_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_database_url() -> String {
    "postgres://localhost/tradewake".to_string()
}

/// Load settings from an optional TOML file plus `TRADEWAKE_`-prefixed
/// environment variables (`TRADEWAKE_TRADING__MODE=LIVE` etc.)
pub fn load_settings(config_path: Option<&str>) -> Result<Settings> {
    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path).required(false));
        } else {
            tracing::warn!("Config file {} not found, using defaults", path);
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("TRADEWAKE")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;
    Ok(settings)
}
