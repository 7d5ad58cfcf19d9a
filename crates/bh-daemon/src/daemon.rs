use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use bh_bridge::{api_router, ApiState};
use bh_core::config::Config;
use bh_messaging::{DispatcherConfig, NotificationDispatcher};
use bh_store::Db;

use crate::shutdown::ShutdownSignal;

/// How often the sweeper purges expired presence and reservations.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// The assembled server: state, background workers, HTTP listener.
pub struct Daemon {
    state: Arc<ApiState>,
    shutdown: ShutdownSignal,
    config: Config,
}

impl Daemon {
    pub async fn new(config: Config) -> Result<Self> {
        let db = Db::open(config.database_path())
            .await
            .context("failed to open database")?;
        let state = Arc::new(
            ApiState::new(config.clone(), db).context("failed to build application state")?,
        );

        // The ephemeral store starts empty; reseed presence from the durable
        // last-seen timestamps.
        for project_id in state.db.project_ids().await? {
            state
                .registry
                .rebuild_presence(project_id)
                .await
                .map_err(|e| anyhow::anyhow!("presence rebuild failed: {e}"))?;
        }

        Ok(Self {
            state,
            shutdown: ShutdownSignal::new(),
            config,
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn state(&self) -> Arc<ApiState> {
        self.state.clone()
    }

    /// Spawn workers and serve until shutdown; then drain.
    pub async fn run(self, listener: tokio::net::TcpListener) -> Result<()> {
        let dispatcher = NotificationDispatcher::new(
            self.state.db.clone(),
            self.state.mail.clone(),
            DispatcherConfig {
                batch_size: self.config.outbox_batch_size,
                max_attempts: self.config.outbox_max_attempts,
                base_backoff: self.config.outbox_base_backoff,
                backoff_cap: self.config.outbox_backoff_cap,
                poll_interval: Duration::from_secs(1),
            },
        );
        let dispatcher_shutdown = self.shutdown.subscribe();
        let dispatcher_done = self.shutdown.clone();
        tokio::spawn(async move {
            dispatcher.run(dispatcher_shutdown).await;
            dispatcher_done.confirm_drained();
        });

        // Presence + reservation sweeper.
        let sweeper_state = self.state.clone();
        let mut sweeper_shutdown = self.shutdown.subscribe();
        let sweeper_done = self.shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = sweeper_shutdown.recv() => break,
                    _ = interval.tick() => {
                        let now = chrono::Utc::now();
                        let presence = sweeper_state.eph.presence.sweep(now);
                        let reservations = sweeper_state.eph.reservations.sweep(now);
                        if presence + reservations > 0 {
                            tracing::debug!(presence, reservations, "sweep cycle completed");
                        }
                    }
                }
            }
            sweeper_done.confirm_drained();
        });

        let app = api_router(self.state.clone());
        let drain_state = self.state.clone();
        let mut serve_shutdown = self.shutdown.subscribe();
        info!(addr = %listener.local_addr()?, "beadhub listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = serve_shutdown.recv().await;
                drain_state.begin_drain();
            })
            .await
            .context("server error")?;

        // Workers finish their current batch and exit.
        let mut shutdown = self.shutdown.clone();
        shutdown
            .wait_for_drain(2, self.config.drain_timeout)
            .await;
        info!("beadhub stopped");
        Ok(())
    }
}
