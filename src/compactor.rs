use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::store::WalStore;

pub const COMPACT_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that compacts the booking log once enough records
/// have accumulated. Exits when the store is closed.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        interval.tick().await;
        if store.is_closed() {
            debug!("store closed, compactor exiting");
            return;
        }
        let appends = store.appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match store.compact().await {
            Ok(()) => info!("compacted booking log after {appends} appends"),
            Err(e) => tracing::warn!("log compaction failed: {e}"),
        }
    }
}
