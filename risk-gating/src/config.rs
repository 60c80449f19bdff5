//! Risk gating configuration

use serde::{Deserialize, Serialize};

/// Overall risk gating configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Per-trade and exposure limits
    #[serde(default)]
    pub limits: PositionLimits,

    /// Drawdown and daily-loss circuit breaker
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Volatility-based sizing
    #[serde(default)]
    pub volatility: VolatilityConfig,

    /// Correlation analysis
    #[serde(default)]
    pub correlation: CorrelationConfig,

    /// Market condition gate
    #[serde(default)]
    pub market_gate: MarketGateConfig,

    /// Upper bound on blocking market-data lookups during evaluation (ms)
    #[serde(default = "default_stats_timeout_ms")]
    pub stats_timeout_ms: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            limits: PositionLimits::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            volatility: VolatilityConfig::default(),
            correlation: CorrelationConfig::default(),
            market_gate: MarketGateConfig::default(),
            stats_timeout_ms: default_stats_timeout_ms(),
        }
    }
}

fn default_stats_timeout_ms() -> u64 {
    200
}

/// Position and exposure limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLimits {
    /// Maximum notional for a single trade (account currency)
    #[serde(default = "default_max_trade_notional")]
    pub max_trade_notional: f64,

    /// Maximum per-symbol exposure as a fraction of portfolio value
    #[serde(default = "default_max_symbol_exposure_pct")]
    pub max_symbol_exposure_pct: f64,

    /// Maximum per-strategy exposure as a fraction of portfolio value
    #[serde(default = "default_max_strategy_exposure_pct")]
    pub max_strategy_exposure_pct: f64,
}

impl Default for PositionLimits {
    fn default() -> Self {
        Self {
            max_trade_notional: default_max_trade_notional(),
            max_symbol_exposure_pct: default_max_symbol_exposure_pct(),
            max_strategy_exposure_pct: default_max_strategy_exposure_pct(),
        }
    }
}

fn default_max_trade_notional() -> f64 {
    10_000.0
}

fn default_max_symbol_exposure_pct() -> f64 {
    0.15
}

fn default_max_strategy_exposure_pct() -> f64 {
    0.25
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Drawdown fraction that halts all new trades
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: f64,

    /// Drawdown fraction below which a tripped breaker re-arms
    #[serde(default = "default_drawdown_reset")]
    pub drawdown_reset: f64,

    /// Daily loss that halts trading, as a fraction of portfolio value
    #[serde(default = "default_daily_loss_pct")]
    pub daily_loss_pct: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_drawdown: default_max_drawdown(),
            drawdown_reset: default_drawdown_reset(),
            daily_loss_pct: default_daily_loss_pct(),
        }
    }
}

fn default_max_drawdown() -> f64 {
    0.10
}

fn default_drawdown_reset() -> f64 {
    0.08
}

fn default_daily_loss_pct() -> f64 {
    0.05
}

/// Volatility sizing thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityConfig {
    /// Rolling close window used for the volatility estimate
    #[serde(default = "default_volatility_window")]
    pub window: usize,

    /// Per-period volatility above which size reduction is recommended
    #[serde(default = "default_high_volatility")]
    pub high_threshold: f64,

    /// Conservative volatility assumed when history is unavailable
    #[serde(default = "default_fallback_volatility")]
    pub fallback: f64,
}

impl Default for VolatilityConfig {
    fn default() -> Self {
        Self {
            window: default_volatility_window(),
            high_threshold: default_high_volatility(),
            fallback: default_fallback_volatility(),
        }
    }
}

fn default_volatility_window() -> usize {
    30
}

fn default_high_volatility() -> f64 {
    0.05
}

fn default_fallback_volatility() -> f64 {
    0.02
}

/// Correlation analysis thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// |correlation| at or above which two symbols count as correlated
    #[serde(default = "default_correlation_threshold")]
    pub threshold: f64,

    /// Minimum overlapping return periods required to trust an estimate
    #[serde(default = "default_min_overlap")]
    pub min_overlap: usize,

    /// Maximum correlated exposure as a fraction of portfolio value
    #[serde(default = "default_max_correlated_exposure_pct")]
    pub max_correlated_exposure_pct: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            threshold: default_correlation_threshold(),
            min_overlap: default_min_overlap(),
            max_correlated_exposure_pct: default_max_correlated_exposure_pct(),
        }
    }
}

fn default_correlation_threshold() -> f64 {
    0.7
}

fn default_min_overlap() -> usize {
    30
}

fn default_max_correlated_exposure_pct() -> f64 {
    0.20
}

/// Market condition gate thresholds (warnings only, never blockers)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketGateConfig {
    /// 24h volume below this is flagged as illiquid
    #[serde(default = "default_min_volume_24h")]
    pub min_volume_24h: f64,

    /// Spread above this fraction of mid is flagged as wide
    #[serde(default = "default_max_spread")]
    pub max_spread: f64,

    /// |24h price change| above this fraction is flagged as volatile
    #[serde(default = "default_max_price_change_24h")]
    pub max_price_change_24h: f64,

    /// Model confidence below this floor is flagged
    #[serde(default = "default_min_model_confidence")]
    pub min_model_confidence: f64,
}

impl Default for MarketGateConfig {
    fn default() -> Self {
        Self {
            min_volume_24h: default_min_volume_24h(),
            max_spread: default_max_spread(),
            max_price_change_24h: default_max_price_change_24h(),
            min_model_confidence: default_min_model_confidence(),
        }
    }
}

fn default_min_volume_24h() -> f64 {
    1_000_000.0
}

fn default_max_spread() -> f64 {
    0.002
}

fn default_max_price_change_24h() -> f64 {
    0.10
}

fn default_min_model_confidence() -> f64 {
    0.6
}

/// Partial update applied through `UpdateRiskConfiguration`.
///
/// Every field is optional; only present fields overwrite the running
/// config. Structural settings (windows, overlap) are intentionally not
/// patchable at runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskConfigPatch {
    pub max_trade_notional: Option<f64>,
    pub max_symbol_exposure_pct: Option<f64>,
    pub max_strategy_exposure_pct: Option<f64>,
    pub max_drawdown: Option<f64>,
    pub drawdown_reset: Option<f64>,
    pub daily_loss_pct: Option<f64>,
    pub high_volatility_threshold: Option<f64>,
    pub correlation_threshold: Option<f64>,
    pub max_correlated_exposure_pct: Option<f64>,
    pub min_volume_24h: Option<f64>,
    pub max_spread: Option<f64>,
    pub max_price_change_24h: Option<f64>,
    pub min_model_confidence: Option<f64>,
    pub stats_timeout_ms: Option<u64>,
}

impl RiskConfig {
    /// Apply a partial update in place
    pub fn apply(&mut self, patch: &RiskConfigPatch) {
        if let Some(v) = patch.max_trade_notional {
            self.limits.max_trade_notional = v;
        }
        if let Some(v) = patch.max_symbol_exposure_pct {
            self.limits.max_symbol_exposure_pct = v;
        }
        if let Some(v) = patch.max_strategy_exposure_pct {
            self.limits.max_strategy_exposure_pct = v;
        }
        if let Some(v) = patch.max_drawdown {
            self.circuit_breaker.max_drawdown = v;
        }
        if let Some(v) = patch.drawdown_reset {
            self.circuit_breaker.drawdown_reset = v;
        }
        if let Some(v) = patch.daily_loss_pct {
            self.circuit_breaker.daily_loss_pct = v;
        }
        if let Some(v) = patch.high_volatility_threshold {
            self.volatility.high_threshold = v;
        }
        if let Some(v) = patch.correlation_threshold {
            self.correlation.threshold = v;
        }
        if let Some(v) = patch.max_correlated_exposure_pct {
            self.correlation.max_correlated_exposure_pct = v;
        }
        if let Some(v) = patch.min_volume_24h {
            self.market_gate.min_volume_24h = v;
        }
        if let Some(v) = patch.max_spread {
            self.market_gate.max_spread = v;
        }
        if let Some(v) = patch.max_price_change_24h {
            self.market_gate.max_price_change_24h = v;
        }
        if let Some(v) = patch.min_model_confidence {
            self.market_gate.min_model_confidence = v;
        }
        if let Some(v) = patch.stats_timeout_ms {
            self.stats_timeout_ms = v;
        }
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &str) -> anyhow::Result<RiskConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: RiskConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a TOML file
pub fn save_config(config: &RiskConfig, path: &str) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
