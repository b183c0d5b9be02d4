use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

use crate::risk::RiskParams;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub risk: RiskParams,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dry_run: DryRunConfig,
    /// Fixed agent roster. The set is defined at startup and never grows.
    #[serde(default = "default_roster")]
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// API server port (default: 8080)
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

fn default_api_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between full decision passes across the roster
    #[serde(default = "default_decision_interval")]
    pub decision_interval_secs: u64,
    /// Seconds between balance/PnL sync ticks
    #[serde(default = "default_balance_sync")]
    pub balance_sync_secs: u64,
    /// Seconds between market refreshes (venue-dependent)
    #[serde(default = "default_market_refresh")]
    pub market_refresh_secs: u64,
    /// Seconds between trade-log prune passes
    #[serde(default = "default_prune_interval")]
    pub prune_interval_secs: u64,
    /// Hours of trade log retained by the prune pass
    #[serde(default = "default_trade_retention")]
    pub trade_retention_hours: u64,
    /// Base pause between agents inside one decision pass (milliseconds)
    #[serde(default = "default_inter_agent_pause")]
    pub inter_agent_pause_ms: u64,
    /// How many top-volume instruments are shown to the provider
    #[serde(default = "default_market_depth")]
    pub market_depth: usize,
}

fn default_decision_interval() -> u64 {
    120
}
fn default_balance_sync() -> u64 {
    20
}
fn default_market_refresh() -> u64 {
    3600
}
fn default_prune_interval() -> u64 {
    21600
}
fn default_trade_retention() -> u64 {
    72
}
fn default_inter_agent_pause() -> u64 {
    2000
}
fn default_market_depth() -> usize {
    20
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            decision_interval_secs: default_decision_interval(),
            balance_sync_secs: default_balance_sync(),
            market_refresh_secs: default_market_refresh(),
            prune_interval_secs: default_prune_interval(),
            trade_retention_hours: default_trade_retention(),
            inter_agent_pause_ms: default_inter_agent_pause(),
            market_depth: default_market_depth(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// OpenAI-compatible endpoint base URL
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,
    /// Model identifier sent with each completion request
    #[serde(default = "default_provider_model")]
    pub model: String,
    /// Hard timeout per decision request
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
    /// Bounded retry attempts for the decision request
    #[serde(default = "default_provider_retries")]
    pub max_retries: u8,
    /// Minimum spacing between provider admissions (shared credentials)
    #[serde(default = "default_provider_spacing")]
    pub min_spacing_ms: u64,
}

fn default_provider_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_provider_model() -> String {
    "gpt-4o".to_string()
}
fn default_provider_timeout() -> u64 {
    60
}
fn default_provider_retries() -> u8 {
    2
}
fn default_provider_spacing() -> u64 {
    500
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_base_url(),
            model: default_provider_model(),
            timeout_secs: default_provider_timeout(),
            max_retries: default_provider_retries(),
            min_spacing_ms: default_provider_spacing(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// Timeout for each exchange call
    #[serde(default = "default_exchange_timeout")]
    pub timeout_secs: u64,
    /// Bounded attempts for idempotent reads (quotes, account state).
    /// Order placement is never retried.
    #[serde(default = "default_read_retries")]
    pub max_read_retries: u8,
    /// Quote cache TTL before a direct exchange read is preferred
    #[serde(default = "default_quote_ttl")]
    pub quote_ttl_secs: u64,
}

fn default_exchange_timeout() -> u64 {
    15
}
fn default_read_retries() -> u8 {
    3
}
fn default_quote_ttl() -> u64 {
    90
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_exchange_timeout(),
            max_read_retries: default_read_retries(),
            quote_ttl_secs: default_quote_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    /// Largest plausible |account-value change| per sync tick, in percent
    #[serde(default = "default_anomaly_threshold")]
    pub anomaly_threshold_pct: Decimal,
    /// Slots in the rolling account-value history ring
    #[serde(default = "default_history_len")]
    pub history_len: usize,
}

fn default_anomaly_threshold() -> Decimal {
    Decimal::from(20)
}
fn default_history_len() -> usize {
    24
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            anomaly_threshold_pct: default_anomaly_threshold(),
            history_len: default_history_len(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; empty selects the in-memory store
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DryRunConfig {
    /// Paper venue instead of a live exchange
    pub enabled: bool,
}

impl Default for DryRunConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// One roster entry. Risk bounds may be overridden per agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    /// System-prompt persona handed to the decision provider
    pub persona: String,
    #[serde(default = "default_initial_balance")]
    pub initial_balance: Decimal,
    /// Positions held longer than this are force-closed
    #[serde(default = "default_max_holding")]
    pub max_holding_mins: i64,
    /// Per-agent risk override; falls back to the global `risk` table
    #[serde(default)]
    pub risk: Option<RiskParams>,
}

fn default_initial_balance() -> Decimal {
    Decimal::from(500)
}
fn default_max_holding() -> i64 {
    45
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("dry_run.enabled", true)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g. config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("ARENA_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (ARENA_DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("ARENA")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Minimal in-process configuration for CLI and test usage
    pub fn default_config(dry_run: bool) -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            risk: RiskParams::default(),
            provider: ProviderConfig::default(),
            exchange: ExchangeConfig::default(),
            reconcile: ReconcileConfig::default(),
            database: DatabaseConfig::default(),
            dry_run: DryRunConfig { enabled: dry_run },
            agents: default_roster(),
            logging: LoggingConfig::default(),
            api_port: default_api_port(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.agents.is_empty() {
            errors.push("agent roster must not be empty".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.id.as_str()) {
                errors.push(format!("duplicate agent id: {}", agent.id));
            }
            if agent.initial_balance <= Decimal::ZERO {
                errors.push(format!(
                    "agent {} initial_balance must be positive",
                    agent.id
                ));
            }
        }

        for (label, params) in std::iter::once(("risk", &self.risk)).chain(
            self.agents
                .iter()
                .filter_map(|a| a.risk.as_ref().map(|r| (a.id.as_str(), r))),
        ) {
            if params.max_balance_fraction <= Decimal::ZERO
                || params.max_balance_fraction > Decimal::ONE
            {
                errors.push(format!(
                    "{label}: max_balance_fraction must be within (0, 1]"
                ));
            }
            if params.max_leverage == 0 {
                errors.push(format!("{label}: max_leverage must be at least 1"));
            }
            if params.default_leverage > params.max_leverage {
                errors.push(format!(
                    "{label}: default_leverage exceeds max_leverage"
                ));
            }
            if params.min_notional <= Decimal::ZERO {
                errors.push(format!("{label}: min_notional must be positive"));
            }
            if params.max_open_positions == 0 {
                errors.push(format!("{label}: max_open_positions must be at least 1"));
            }
        }

        if self.reconcile.anomaly_threshold_pct <= Decimal::ZERO {
            errors.push("reconcile.anomaly_threshold_pct must be positive".to_string());
        }
        if self.reconcile.history_len == 0 {
            errors.push("reconcile.history_len must be at least 1".to_string());
        }
        if self.scheduler.decision_interval_secs == 0
            || self.scheduler.balance_sync_secs == 0
            || self.scheduler.market_refresh_secs == 0
        {
            errors.push("scheduler intervals must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Built-in four-trader roster used when no config file is present.
fn default_roster() -> Vec<AgentConfig> {
    let persona = |style: &str| {
        format!(
            "You are an autonomous futures trader. Style: {style}. \
             Respond only with the JSON decision object you are asked for."
        )
    };

    [
        ("gpt", "GPT", "ultra-conservative, capital preservation first"),
        ("claude", "Claude", "balanced, seeks favorable risk/reward"),
        ("deepseek", "DeepSeek", "aggressive momentum hunter"),
        ("grok", "Grok", "contrarian, fades crowded moves"),
    ]
    .into_iter()
    .map(|(id, name, style)| AgentConfig {
        id: id.to_string(),
        name: name.to_string(),
        persona: persona(style),
        initial_balance: default_initial_balance(),
        max_holding_mins: default_max_holding(),
        risk: None,
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default_config(true);
        assert!(config.validate().is_ok());
        assert_eq!(config.agents.len(), 4);
    }

    #[test]
    fn test_validate_rejects_duplicate_agents() {
        let mut config = AppConfig::default_config(true);
        let dup = config.agents[0].clone();
        config.agents.push(dup);

        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("duplicate agent id")));
    }

    #[test]
    fn test_validate_rejects_bad_risk_bounds() {
        let mut config = AppConfig::default_config(true);
        config.risk.max_balance_fraction = dec!(1.5);
        config.risk.default_leverage = 20;

        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("max_balance_fraction")));
        assert!(errors.iter().any(|e| e.contains("default_leverage")));
    }

    #[test]
    fn test_validate_rejects_empty_roster() {
        let mut config = AppConfig::default_config(true);
        config.agents.clear();
        assert!(config.validate().is_err());
    }
}
