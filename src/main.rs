use clap::Parser;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use arena::config::AppConfig;
use arena::executor::{DecisionExecutor, ExecutionConfig};
use arena::ledger::{LedgerConfig, PositionLedger};
use arena::market::{InstrumentKind, MarketDataCache, MarketQuote};
use arena::providers::{
    DecisionProvider, ExchangeClient, OpenAiProvider, OpenAiProviderConfig, PaperExchange,
    ScriptedProvider,
};
use arena::ratelimit::ProviderGate;
use arena::reconcile::BalanceReconciler;
use arena::registry::{AgentHandle, AgentRegistry};
use arena::scheduler::CycleScheduler;
use arena::server::{self, ApiState};
use arena::store::{MemoryStore, PostgresStore, Store};

#[derive(Debug, Parser)]
#[command(name = "arena", about = "Multi-agent AI trading arena orchestrator")]
struct Cli {
    /// Configuration directory
    #[arg(long, default_value = "config")]
    config_dir: String,

    /// Force the paper venue regardless of configuration
    #[arg(long)]
    dry_run: bool,

    /// Override the API port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> arena::Result<()> {
    let cli = Cli::parse();
    init_logging();

    let mut config = match AppConfig::load_from(&cli.config_dir) {
        Ok(config) => config,
        Err(e) => {
            warn!("Could not load configuration ({e}); using built-in defaults");
            AppConfig::default_config(true)
        }
    };
    if cli.dry_run {
        config.dry_run.enabled = true;
    }
    if let Some(port) = cli.port {
        config.api_port = port;
    }

    if let Err(errors) = config.validate() {
        for error in &errors {
            error!("config: {error}");
        }
        return Err(arena::ArenaError::Validation(format!(
            "{} configuration error(s)",
            errors.len()
        )));
    }

    info!("Starting arena | {} agents | dry_run={}", config.agents.len(), config.dry_run.enabled);

    // ==================== Store ====================

    let store: Arc<dyn Store> = if config.database.url.is_empty() {
        info!("No database configured; using in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        let pg = PostgresStore::new(&config.database.url, config.database.max_connections).await?;
        pg.migrate().await?;
        Arc::new(pg)
    };

    // ==================== Core components ====================

    let ledger = Arc::new(PositionLedger::new(LedgerConfig {
        max_open_positions: config.risk.max_open_positions,
        min_notional: config.risk.min_notional,
    }));
    ledger.restore(store.list_positions().await?).await;

    let market = Arc::new(MarketDataCache::new(Duration::from_secs(
        config.exchange.quote_ttl_secs,
    )));
    let provider_gate = Arc::new(ProviderGate::new(Duration::from_millis(
        config.provider.min_spacing_ms,
    )));
    let executor = Arc::new(DecisionExecutor::new(
        ledger.clone(),
        store.clone(),
        market.clone(),
        BalanceReconciler::new(config.reconcile.anomaly_threshold_pct),
        provider_gate,
        ExecutionConfig {
            provider_timeout: Duration::from_secs(config.provider.timeout_secs),
            exchange_timeout: Duration::from_secs(config.exchange.timeout_secs),
            max_read_retries: config.exchange.max_read_retries,
            market_depth: config.scheduler.market_depth,
        },
    ));

    // ==================== Agent roster ====================

    if !config.dry_run.enabled {
        return Err(arena::ArenaError::Validation(
            "no live venue adapter is configured; run with dry_run enabled".to_string(),
        ));
    }

    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
    if api_key.is_none() {
        warn!("OPENAI_API_KEY not set; agents will hold every cycle");
    }

    let mut handles = Vec::with_capacity(config.agents.len());
    for spec in &config.agents {
        let exchange: Arc<dyn ExchangeClient> = Arc::new(seed_paper_venue(spec.initial_balance));

        let provider: Arc<dyn DecisionProvider> = match &api_key {
            Some(key) => Arc::new(OpenAiProvider::new(OpenAiProviderConfig {
                base_url: config.provider.base_url.clone(),
                api_key: key.clone(),
                model: config.provider.model.clone(),
                timeout: Duration::from_secs(config.provider.timeout_secs),
                max_retries: config.provider.max_retries,
                ..OpenAiProviderConfig::default()
            })?),
            None => Arc::new(ScriptedProvider::idle(&spec.id)),
        };

        let handle = Arc::new(AgentHandle::new(
            spec.clone(),
            &config.risk,
            config.reconcile.history_len,
            exchange,
            provider,
        ));

        // Resume persisted accounting; first run persists the fresh state.
        match store.get_agent(&spec.id).await? {
            Some(state) => {
                info!("{}: resuming with account value ${}", spec.name, state.account_value);
                handle.restore_state(state).await;
            }
            None => {
                let state = handle.state.lock().await.clone();
                store.upsert_agent(&state).await?;
                info!("{}: initialized with ${}", spec.name, spec.initial_balance);
            }
        }

        handles.push(handle);
    }
    let registry = Arc::new(AgentRegistry::new(handles));

    // ==================== Scheduler + API ====================

    let scheduler = Arc::new(CycleScheduler::new(
        registry.clone(),
        executor,
        market,
        store.clone(),
        config.scheduler.clone(),
    ));
    if let Err(e) = scheduler.refresh_market().await {
        warn!("Initial market refresh failed: {e}");
    }
    let (scheduler_handle, tasks) = scheduler.spawn();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    {
        let scheduler_handle = scheduler_handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                scheduler_handle.shutdown();
                let _ = shutdown_tx.send(true);
            }
        });
    }

    server::serve(
        ApiState {
            registry,
            ledger,
            store,
            scheduler: scheduler_handle,
        },
        config.api_port,
        shutdown_rx,
    )
    .await?;

    for task in tasks {
        let _ = task.await;
    }
    info!("Shutdown complete");
    Ok(())
}

/// Paper venue pre-seeded with a small perpetual universe so dry runs have
/// something to trade against.
fn seed_paper_venue(starting_cash: rust_decimal::Decimal) -> PaperExchange {
    let exchange = PaperExchange::new("paper", starting_cash);
    let seed = [
        ("BTCUSDT", dec!(50000), dec!(1200000)),
        ("ETHUSDT", dec!(3000), dec!(800000)),
        ("SOLUSDT", dec!(150), dec!(400000)),
        ("BNBUSDT", dec!(600), dec!(250000)),
        ("XRPUSDT", dec!(0.60), dec!(200000)),
        ("DOGEUSDT", dec!(0.15), dec!(150000)),
    ];
    for (instrument, price, volume) in seed {
        exchange.post_quote(
            MarketQuote::new(instrument, InstrumentKind::Perpetual, price).with_volume(volume),
        );
    }
    exchange
}

fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,arena=debug,sqlx=warn"));

    // Optional daily-rolling file layer; console logging always works even
    // when the log directory is not writable.
    let log_dir = std::env::var("ARENA_LOG_DIR").ok();
    let file_layer = log_dir.and_then(|dir| {
        if std::fs::create_dir_all(&dir).is_err() {
            eprintln!("Warning: could not create log directory {dir}, file logging disabled");
            return None;
        }
        let file_appender = tracing_appender::rolling::daily(&dir, "arena.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // Keep the guard alive for the life of the process.
        Box::leak(Box::new(guard));

        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
    });

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();
}
