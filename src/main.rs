use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use marquee::config::Config;
use marquee::engine::Engine;
use marquee::http::{self, AppState};
use marquee::notify::NotifyHub;
use marquee::observability;
use marquee::reaper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    observability::init_tracing();

    let config = Config::from_env();
    observability::init_metrics(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Arc::new(Engine::new(config.wal_path(), Arc::new(NotifyHub::new()))?);

    tokio::spawn(reaper::run_reaper(engine.clone(), config.sweep_interval));
    tokio::spawn(reaper::run_compactor(engine.clone(), config.compact_threshold));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("marquee listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  hold_ttl: {}s (max {}s)", config.hold_ttl.as_secs(), config.max_hold_ttl.as_secs());
    info!("  sweep_interval: {}ms", config.sweep_interval.as_millis());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Stop accepting on SIGTERM/ctrl-c; axum drains in-flight requests.
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    error!("failed to register SIGTERM handler: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
        info!("shutdown signal received, draining requests");
    };

    let state = AppState {
        engine,
        config: Arc::new(config),
    };
    http::serve(listener, state, shutdown).await?;

    info!("marquee stopped");
    Ok(())
}
