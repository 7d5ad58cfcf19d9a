//! beadhubd: the BeadHub coordination server.

use anyhow::{Context, Result};
use tracing::info;

mod daemon;
mod shutdown;

use bh_core::config::Config;
use daemon::Daemon;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Boot retries before giving up on the database.
const BOOT_RETRIES: u32 = 5;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return 1;
        }
    };

    if config.log_format == "json" {
        bh_telemetry::logging::init_logging_json("beadhubd", &config.log_level);
    } else {
        bh_telemetry::logging::init_logging("beadhubd", &config.log_level);
    }

    if config.redis_url.is_some() {
        tracing::warn!(
            "REDIS_URL is set but this build uses the in-process ephemeral store; ignoring"
        );
    }
    if config.proxy_secret().is_none() {
        info!("proxy auth disabled (INTERNAL_AUTH_SECRET not set); bearer mode only");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return 1;
        }
    };

    match runtime.block_on(serve(config)) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "fatal");
            eprintln!("fatal: {e:#}");
            1
        }
    }
}

async fn serve(config: Config) -> Result<i32> {
    info!(version = env!("CARGO_PKG_VERSION"), "beadhub starting");

    // The database must come up before we accept traffic; retry briefly so
    // container orchestration ordering does not matter.
    let mut daemon = None;
    for attempt in 1..=BOOT_RETRIES {
        match Daemon::new(config.clone()).await {
            Ok(d) => {
                daemon = Some(d);
                break;
            }
            Err(e) if attempt < BOOT_RETRIES => {
                tracing::warn!(attempt, error = %e, "dependency not ready, retrying");
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "dependency unreachable after boot retries");
                return Ok(2);
            }
        }
    }
    let daemon = daemon.context("daemon initialisation failed")?;

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    // SIGINT triggers graceful shutdown; exit code 130 per convention.
    let shutdown = daemon.shutdown_handle();
    let interrupted = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let interrupted_flag = interrupted.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, draining");
            interrupted_flag.store(true, std::sync::atomic::Ordering::SeqCst);
            shutdown.trigger();
        }
    });

    daemon.run(listener).await?;

    if interrupted.load(std::sync::atomic::Ordering::SeqCst) {
        Ok(130)
    } else {
        Ok(0)
    }
}
