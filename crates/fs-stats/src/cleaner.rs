//! StoreCleaner - periodic aggregate store reset
//!
//! Coarse, interval-based eviction: a flow that never reaches its
//! completion predicate stays resident until the store is reset here.
//! Ticks never overlap and failures never propagate past a log line.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use fs_common::CleanerConfig;

use crate::aggregate::AggregateStore;

/// Periodically resets the aggregate store when enabled
pub struct StoreCleaner {
    shutdown_tx: broadcast::Sender<()>,
}

impl StoreCleaner {
    /// Start the cleaner task; a disabled config starts nothing
    pub fn start(store: Arc<AggregateStore>, config: CleanerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        if !config.enabled {
            info!("Statistics cleaner disabled");
            return Self { shutdown_tx };
        }

        let interval = config.interval();
        let mut shutdown_rx = shutdown_tx.subscribe();
        let in_progress = Arc::new(AtomicBool::new(false));

        tokio::spawn(async move {
            info!(interval = ?interval, "Statistics cleaner started");
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so the store keeps
            // its initial interval of data
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::run_once(&store, &in_progress);
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Statistics cleaner shutting down");
                        break;
                    }
                }
            }
        });

        Self { shutdown_tx }
    }

    fn run_once(store: &AggregateStore, in_progress: &AtomicBool) {
        if in_progress.swap(true, Ordering::SeqCst) {
            warn!("Previous cleaner run still in progress, skipping tick");
            return;
        }

        let result = catch_unwind(AssertUnwindSafe(|| store.reset()));
        if result.is_err() {
            warn!("Statistics store reset panicked; next tick proceeds normally");
        } else {
            debug!("Statistics store reset by cleaner");
        }

        in_progress.store(false, Ordering::SeqCst);
    }

    /// Signal the cleaner task to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
