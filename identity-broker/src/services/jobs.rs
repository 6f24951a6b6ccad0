//! Periodic maintenance: provider refresh and flow-store sweeping.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::services::broker::OAuthBroker;
use crate::services::directory::ProviderDirectory;

pub struct BackgroundJobs {
    shutdown_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundJobs {
    pub fn start(directory: ProviderDirectory, broker: Arc<OAuthBroker>, every: Duration) -> Self {
        let shutdown_token = CancellationToken::new();

        tracing::info!(interval_secs = every.as_secs(), "Starting background jobs");

        let refresher = {
            let shutdown = shutdown_token.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            tracing::info!("Provider refresher shutting down");
                            break;
                        }
                        _ = ticker.tick() => {
                            match directory.refresh_all().await {
                                Ok(count) => tracing::debug!(providers = count, "Provider cache refreshed"),
                                Err(e) => tracing::error!(error = %e, "Provider refresh failed"),
                            }
                        }
                    }
                }
            })
        };

        let sweeper = {
            let shutdown = shutdown_token.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            tracing::info!("Flow sweeper shutting down");
                            break;
                        }
                        _ = ticker.tick() => {
                            let (logins, codes) = broker.purge_expired();
                            if logins + codes > 0 {
                                tracing::debug!(logins, codes, "Purged expired broker flows");
                            }
                        }
                    }
                }
            })
        };

        Self {
            shutdown_token,
            handles: vec![refresher, sweeper],
        }
    }

    pub async fn shutdown(self) {
        tracing::info!("Stopping background jobs");
        self.shutdown_token.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Background job ended abnormally");
            }
        }
    }
}
