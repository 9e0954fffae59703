//! The reload coordinator (C10): rebuilds the blocklist cache via the
//! builder and atomically swaps it into the live [`Handler`]. Triggered by
//! the management API's `/blocklist/update` and by SIGHUP.

use std::sync::Arc;

use tracing::{error, info};

use crate::blocklist::builder::{self, BuildConfig};
use crate::config::Config;
use crate::handler::Handler;

#[derive(Clone)]
pub struct Reloader {
    handler: Arc<Handler>,
    build_config: BuildConfig,
}

impl Reloader {
    pub fn new(handler: Arc<Handler>, config: &Config) -> Self {
        let build_config = BuildConfig {
            sources_dir: config.sources_dir(),
            sources: config.sources.clone(),
            source_dirs: config.source_dirs(),
            whitelist: config.whitelist.clone(),
            blocklist: config.blocklist.clone(),
        };
        Self {
            handler,
            build_config,
        }
    }

    /// Rebuilds the blocklist cache and, on success, swaps it into the
    /// handler. A failed build leaves the live cache untouched.
    pub async fn reload(&self) {
        info!("blocklist reload starting");
        match builder::build(&self.build_config).await {
            Ok(fresh) => {
                let entries = fresh.len();
                self.handler.swap_blockcache(Arc::new(fresh));
                info!(entries, "blocklist reload complete");
            }
            Err(err) => {
                error!(%err, "blocklist reload failed, keeping previous cache");
            }
        }
    }

    /// Spawns the reload on its own task, matching the API's fire-and-forget
    /// `/blocklist/update` semantics: the caller does not wait for the
    /// rebuild to finish.
    pub fn spawn_reload(&self) {
        let this = self.clone();
        tokio::spawn(async move { this.reload().await });
    }

    /// Installs a SIGHUP handler (unix only) that triggers a reload.
    #[cfg(unix)]
    pub fn watch_sighup(&self) {
        use tokio::signal::unix::{SignalKind, signal};

        let this = self.clone();
        tokio::spawn(async move {
            let mut sighup = match signal(SignalKind::hangup()) {
                Ok(s) => s,
                Err(err) => {
                    error!(%err, "failed to install SIGHUP handler");
                    return;
                }
            };
            loop {
                sighup.recv().await;
                info!("SIGHUP received, reloading blocklist");
                this.reload().await;
            }
        });
    }

    #[cfg(not(unix))]
    pub fn watch_sighup(&self) {}
}
