//! Debounced hot reload for the user configuration file
//!
//! Watches the config file for modification and, after changes settle for
//! the debounce window, reloads and publishes the new configuration so the
//! bridge can emit a `configuration-reloaded` event.

use crate::config::Config;
use crate::logging::get_logger;
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration, Instant};

/// Debounce window for file changes
const DEBOUNCE_MS: u64 = 500;

/// Poll cadence; two polls fit inside one debounce window
const POLL_MS: u64 = 250;

/// Watches one configuration file and publishes reloaded configs
pub struct ConfigWatcher {
    path: PathBuf,
    logger: crate::logging::StructuredLogger,
}

impl ConfigWatcher {
    /// Create a watcher for the given config file path
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            logger: get_logger("config_watcher"),
        }
    }

    fn mtime(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
    }

    /// Run the watch loop until the shutdown signal flips.
    ///
    /// Each settled change is reloaded from disk and sent on `reloaded_tx`;
    /// files that fail to parse are logged and skipped, keeping the last
    /// good configuration in effect.
    pub async fn run(self, reloaded_tx: mpsc::Sender<Config>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_millis(POLL_MS));
        let mut last_seen = self.mtime();
        let mut pending_since: Option<Instant> = None;

        self.logger
            .info(&format!("Watching {} for changes", self.path.display()));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let current = self.mtime();
                    if current != last_seen {
                        last_seen = current;
                        pending_since = Some(Instant::now());
                        continue;
                    }
                    if let Some(started) = pending_since {
                        if started.elapsed() >= Duration::from_millis(DEBOUNCE_MS) {
                            pending_since = None;
                            match Config::from_file(&self.path) {
                                Ok(config) => {
                                    if let Err(e) = config.validate() {
                                        self.logger.warn(&format!(
                                            "Reloaded configuration is invalid, keeping previous: {}",
                                            e
                                        ));
                                        continue;
                                    }
                                    self.logger.info("Configuration reloaded");
                                    if reloaded_tx.send(config).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    self.logger.warn(&format!(
                                        "Failed to reload configuration, keeping previous: {}",
                                        e
                                    ));
                                }
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.logger.debug("Config watcher stopped");
    }
}
