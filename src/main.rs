// =============================================================================
// perp-pulse — Main Entry Point
// =============================================================================
//
// Starts the market data controller (backfill, then the push stream when it
// can be opened), logs a JSON snapshot for each report symbol on a fixed
// interval, and tears the stream down on Ctrl-C.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use perp_pulse::binance::{BinanceClient, CombinedStreamClient, ReqwestTransport};
use perp_pulse::runtime_config::RuntimeConfig;
use perp_pulse::{assemble_snapshot, MarketDataController};

const ENV_CONFIG_PATH: &str = "PULSE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "pulse_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "perp-pulse starting up");

    let config_path =
        std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();

    // ── 2. Exchange collaborators ────────────────────────────────────────
    let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(
        config.request_timeout_secs.max(1),
    ))?);
    let client = Arc::new(BinanceClient::new(config.rest_base_url.clone(), transport));
    let stream = Arc::new(CombinedStreamClient::new(
        config.stream_url.clone(),
        config.subscribe_batch_size,
    ));

    // ── 3. Acquisition ───────────────────────────────────────────────────
    let report_symbols = config.report_symbols.clone();
    let snapshot_every = Duration::from_secs(config.snapshot_interval_secs.max(1));
    let controller = Arc::new(MarketDataController::new(config, client, stream));

    let mode = controller.start().await;
    info!(
        mode = %mode,
        symbols = controller.symbols().len(),
        "market data controller started"
    );

    // ── 4. Snapshot reporting loop ───────────────────────────────────────
    let report_controller = controller.clone();
    let reporter = tokio::spawn(async move {
        let mut interval = tokio::time::interval(snapshot_every);
        loop {
            interval.tick().await;
            for symbol in &report_symbols {
                match assemble_snapshot(&report_controller, symbol).await {
                    Ok(snapshot) => match serde_json::to_string(&snapshot) {
                        Ok(json) => info!(symbol = %snapshot.symbol, snapshot = %json, "snapshot"),
                        Err(e) => error!(symbol = %symbol, error = %e, "snapshot serialisation failed"),
                    },
                    Err(e) => warn!(symbol = %symbol, error = %e, "snapshot unavailable"),
                }
            }
            info!(
                mode = %report_controller.mode(),
                cached_series = report_controller.buffer().len(),
                used_weight_1m = report_controller.client().weights().used_weight(),
                "acquisition status"
            );
        }
    });

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, stopping");
    reporter.abort();
    controller.shutdown().await;
    info!("perp-pulse stopped");

    Ok(())
}
