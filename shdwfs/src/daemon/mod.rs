//! Background workers and process lifecycle
//!
//! Responsibilities:
//! - Keep the bucket listing warm by re-listing on a fixed interval.
//! - Wait for Ctrl-C / SIGTERM so the mount can be torn down cleanly.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::cadapter::client::ObjectBackend;
use crate::meta::DirectoryCache;

/// Expire and refetch the listing every `every`. Abort the handle to stop.
pub fn spawn_cache_refresher<B: ObjectBackend>(
    cache: Arc<DirectoryCache<B>>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            cache.invalidate();
            match cache.list().await {
                Ok(entries) => debug!(count = entries.len(), "listing refreshed"),
                Err(e) => warn!(error = %e, "background listing refresh failed"),
            }
        }
    })
}

/// Resolve on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::memory::{CallStats, MemoryBackend};

    #[tokio::test(start_paused = true)]
    async fn refresher_relists_every_interval() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = Arc::new(DirectoryCache::new(
            backend.clone(),
            Duration::from_secs(60),
        ));
        let handle = spawn_cache_refresher(cache, Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(CallStats::get(&backend.stats.list), 0);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(CallStats::get(&backend.stats.list), 1);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(CallStats::get(&backend.stats.list), 2);

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}
