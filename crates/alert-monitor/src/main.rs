use std::sync::Arc;
use std::time::Duration;

use alert_monitor::{AlertMonitor, CompanyNavService, MonitorConfig};
use anyhow::Result;
use polygon_client::PolygonClient;
use tokio::signal::unix::SignalKind;
use tokio::time;
use treasury_core::{CachedPriceGateway, Clock, SystemClock};
use treasury_store::{AlertManager, MetricRepository, TreasuryDb};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting treasury mNAV alert monitor");

    // 2. Load configuration
    let config = MonitorConfig::from_env()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Interval: {} seconds", config.interval_seconds);
    tracing::info!("  Cooldown: {} hours", config.cooldown_hours);
    tracing::info!("  Max concurrent companies: {}", config.max_concurrent_companies);
    tracing::info!("  Gateway timeout: {}s", config.gateway_timeout_seconds);
    tracing::info!("  Price cache TTL: {}s", config.price_cache_ttl_seconds);
    tracing::info!("  Series lookback: {} days", config.lookback_days);

    // 3. Database
    let db = TreasuryDb::new(&config.database_url).await?;
    db.health_check()
        .await
        .map_err(|e| anyhow::anyhow!("Database connectivity check failed: {}", e))?;
    tracing::info!("Startup check: database OK ({})", config.database_url);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let metrics = Arc::new(MetricRepository::new(db.clone()));
    let alerts = Arc::new(AlertManager::new(db).with_clock(Arc::clone(&clock)));
    match metrics.list_companies().await {
        Ok(companies) => tracing::info!("{} companies tracked", companies.len()),
        Err(e) => tracing::warn!("Could not list companies: {}", e),
    }

    // 4. Market data behind a quote cache
    let polygon =
        PolygonClient::with_rate_limit(config.polygon_api_key.clone(), config.polygon_rate_limit);
    let gateway = Arc::new(CachedPriceGateway::new(
        polygon,
        Arc::clone(&clock),
        config.price_cache_ttl(),
    ));
    tracing::info!(
        "Polygon gateway ready ({} req/min)",
        config.polygon_rate_limit
    );

    // 5. NAV pipeline and monitor
    let nav_service = CompanyNavService::new(
        metrics.clone(),
        metrics,
        gateway.clone(),
        Arc::clone(&clock),
    )
    .with_lookback_days(config.lookback_days)
    .with_gateway_timeout(Duration::from_secs(config.gateway_timeout_seconds));

    let monitor = AlertMonitor::new(alerts, Arc::new(nav_service), clock)
        .with_cooldown(config.cooldown())
        .with_max_concurrent(config.max_concurrent_companies);

    if config.run_once {
        run_monitor_cycle(&monitor, &gateway).await;
        tracing::info!("Single cycle complete, exiting.");
        return Ok(());
    }

    tracing::info!(
        "Monitor is now running. Checking every {}s. Press Ctrl+C to stop.",
        config.interval_seconds
    );

    // Main loop with graceful shutdown (SIGINT + SIGTERM)
    let mut interval = time::interval(Duration::from_secs(config.interval_seconds));
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
        }
    };
    tokio::pin!(shutdown);

    let mut cycles: u64 = 0;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                cycles += 1;
                tracing::debug!("Starting monitor cycle #{}", cycles);
                run_monitor_cycle(&monitor, &gateway).await;
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received, exiting gracefully...");
                break;
            }
        }
    }

    tracing::info!("Alert monitor shut down after {} cycles.", cycles);
    Ok(())
}

/// A failed cycle is logged and the next tick tries again.
async fn run_monitor_cycle(
    monitor: &AlertMonitor,
    gateway: &CachedPriceGateway<PolygonClient>,
) {
    let start = std::time::Instant::now();
    match monitor.run_cycle().await {
        Ok(report) => {
            report.log_summary();
            tracing::info!("Cycle finished in {:.1}s", start.elapsed().as_secs_f64());
        }
        Err(e) => tracing::error!("Error in monitor cycle: {}", e),
    }

    let evicted = gateway.evict_expired();
    if evicted > 0 {
        tracing::debug!("Evicted {} stale quotes", evicted);
    }
}
