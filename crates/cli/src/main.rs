use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use funding_arb_connector::{Venue, VenueMap};
use funding_arb_core::{AppConfig, ConfigLoader};
use funding_arb_data::{Database, PositionStore};
use funding_arb_exchange_aster::{AsterClient, AsterStream};
use funding_arb_exchange_lighter::{LighterClient, LighterStream};
use funding_arb_execution::{AtomicExecutor, ClosingSet, ExecutorConfig, PriceProvider};
use funding_arb_monitor::{MonitorSettings, RealTimeProfitMonitor};
use funding_arb_orchestrator::{
    EngineEvents, OpenSettings, OrchestratorDeps, PositionCloser, PositionOpener,
    StrategyOrchestrator, StrategySettings,
};
use funding_arb_risk::build_risk_manager;
use funding_arb_scanner::{
    CooldownManager, FeeCalculator, HttpOpportunityStore, OpportunityScanner, ScannerSettings,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "funding-arb")]
#[command(about = "Delta-neutral funding-rate arbitrage engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine with the control API
    Run {
        /// Config profile overlay (config/Config.<profile>.toml)
        #[arg(short, long)]
        profile: Option<String>,
    },
    /// Validate the configuration and exit
    CheckConfig {
        /// Config profile overlay
        #[arg(short, long)]
        profile: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { profile } => {
            let config = load_config(profile.as_deref())?;
            run_engine(config).await?;
        }
        Commands::CheckConfig { profile } => {
            let config = load_config(profile.as_deref())?;
            println!(
                "configuration valid: {} exchanges, max {} positions",
                config.strategy.exchanges.len(),
                config.strategy.max_positions
            );
        }
    }
    Ok(())
}

fn load_config(profile: Option<&str>) -> Result<AppConfig> {
    match profile {
        Some(profile) => ConfigLoader::load_with_profile(profile),
        None => ConfigLoader::load(),
    }
}

fn build_venues(config: &AppConfig) -> Result<VenueMap> {
    let mut venues: VenueMap = HashMap::new();

    for name in &config.strategy.exchanges {
        let name = name.to_ascii_lowercase();
        let venue_config = config
            .venues
            .get(&name)
            .with_context(|| format!("missing [venues.{name}] section"))?;

        let venue = match name.as_str() {
            "aster" => {
                let client = Arc::new(AsterClient::new(
                    venue_config.api_url.clone(),
                    venue_config.api_key.clone().unwrap_or_default(),
                    venue_config.secret_key.clone().unwrap_or_default(),
                ));
                let stream =
                    Arc::new(AsterStream::new(venue_config.ws_url.clone(), Arc::clone(&client)));
                Venue::new(client, stream)
            }
            "lighter" => {
                let client = Arc::new(LighterClient::new(
                    venue_config.api_url.clone(),
                    venue_config.api_key.clone().unwrap_or_default(),
                ));
                let stream =
                    Arc::new(LighterStream::new(venue_config.ws_url.clone(), Arc::clone(&client)));
                Venue::new(client, stream)
            }
            other => {
                anyhow::bail!("no trading client wired for exchange '{other}'");
            }
        };
        venues.insert(name, Arc::new(venue));
    }
    Ok(venues)
}

async fn run_engine(config: AppConfig) -> Result<()> {
    tracing::info!(
        exchanges = ?config.strategy.exchanges,
        max_positions = config.strategy.max_positions,
        "starting funding arbitrage engine"
    );

    // Persistence first: fatal when unreachable at startup.
    let database = Database::connect(&config.database.url, config.database.max_connections)
        .await
        .context("database connection failed")?;
    database.ensure_schema().await.context("schema bootstrap failed")?;
    let store = Arc::new(PositionStore::new(database.clone()));

    // Venue clients and streams.
    let venues = Arc::new(build_venues(&config)?);

    let mut fee_calculator = FeeCalculator::default();
    for venue in venues.values() {
        fee_calculator.set_venue(&venue.name, venue.client.fee_structure());
    }
    let fee_calculator = Arc::new(fee_calculator);

    // Shared execution plumbing.
    let price_provider = Arc::new(PriceProvider::default());
    let closing = ClosingSet::new();
    let strategy = &config.strategy;
    let executor = Arc::new(AtomicExecutor::new(
        Arc::clone(&price_provider),
        Arc::clone(&closing),
        ExecutorConfig {
            max_entry_price_divergence_pct: strategy.max_entry_price_divergence_pct,
            enable_liquidation_prevention: strategy.enable_liquidation_prevention,
            min_liquidation_distance_pct: strategy.min_liquidation_distance_pct,
            limit_order_offset_pct: strategy.limit_order_offset_pct,
            default_timeout: Duration::from_secs(30),
            history_poll_interval: Duration::from_secs(5),
        },
    ));

    // Scanner over the external funding-rate store.
    let cooldowns = Arc::new(CooldownManager::default());
    let opportunity_store = Arc::new(HttpOpportunityStore::new(config.opportunity_store.url.clone()));
    let scanner = Arc::new(OpportunityScanner::new(
        opportunity_store,
        ScannerSettings {
            min_profit: strategy.min_profit,
            max_positions: strategy.max_positions,
            max_new_positions_per_cycle: strategy.max_new_positions_per_cycle,
            max_total_exposure_usd: strategy.max_total_exposure_usd,
            max_position_size_usd: strategy.max_position_size_usd,
            max_oi_usd: strategy.max_oi_usd,
            required_exchange: strategy.required_exchange(),
            target_margin: strategy.target_margin,
            fetch_limit: 10,
        },
        Arc::clone(&cooldowns),
    ));

    // Profit monitor feeding the close queue.
    let (close_tx, monitor_close_rx) = tokio::sync::mpsc::unbounded_channel();
    let monitor = RealTimeProfitMonitor::new(
        Arc::clone(&venues),
        Arc::clone(&store),
        Arc::clone(&closing),
        MonitorSettings {
            enabled: strategy.enable_immediate_profit_taking,
            check_interval: Duration::from_secs_f64(
                strategy.realtime_profit_check_interval.max(0.1),
            ),
            min_profit_pct: strategy.min_immediate_profit_taking_pct,
        },
        close_tx,
    );

    let opener = PositionOpener::new(
        Arc::clone(&venues),
        Arc::clone(&store),
        Arc::clone(&executor),
        Arc::clone(&price_provider),
        Arc::clone(&fee_calculator),
        Arc::clone(&cooldowns),
        OpenSettings {
            enable_break_even_alignment: strategy.enable_break_even_alignment,
            max_spread_threshold_pct: strategy.max_spread_threshold_pct,
            limit_order_offset_pct: strategy.limit_order_offset_pct,
            order_timeout: Duration::from_secs(30),
        },
    );
    let closer = PositionCloser::new(
        Arc::clone(&venues),
        Arc::clone(&store),
        Arc::clone(&executor),
        Arc::clone(&closing),
        Duration::from_secs(30),
    );

    let events = Arc::new(EngineEvents::new());
    let (orchestrator, control) = StrategyOrchestrator::new(
        OrchestratorDeps {
            venues: Arc::clone(&venues),
            store: Arc::clone(&store),
            scanner,
            risk: build_risk_manager(&config.risk),
            opener,
            closer,
            monitor,
            price_provider,
            events: Arc::clone(&events),
            database,
            monitor_close_rx,
        },
        StrategySettings {
            strategy_name: "funding_arbitrage".to_string(),
            cycle_interval: Duration::from_secs(strategy.cycle_interval_seconds.max(1)),
            min_profit: strategy.min_profit,
            single_position_per_session: strategy.single_position_per_session,
            persist_snapshots: config.dashboard.persist_snapshots && config.dashboard.enabled,
            snapshot_retention: config.dashboard.snapshot_retention,
            event_retention: config.dashboard.event_retention,
        },
    );

    // Control API.
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tokio::spawn({
        let control = control.clone();
        let events = Arc::clone(&events);
        async move {
            if let Err(e) = funding_arb_web_api::run_server(&addr, control, events).await {
                tracing::error!(error = %e, "control api server exited");
            }
        }
    });

    // Graceful shutdown on ctrl-c.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    orchestrator.run(shutdown_rx).await
}
