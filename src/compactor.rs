use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites a tenant's WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}

/// Returns whether a compaction ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!(appends, "WAL compacted");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Directory;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("chairtime_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let directory = Arc::new(Directory::in_memory());
        let engine = Engine::new(path.clone(), directory.clone(), directory, 30).unwrap();

        let id = Ulid::new();
        engine.create_stylist(id, Some("Ann".into())).await.unwrap();
        for active in [false, true, false, true] {
            engine
                .update_stylist(id, crate::model::StylistPatch { name: None, active: Some(active) })
                .await
                .unwrap();
        }
        assert_eq!(engine.wal_appends_since_compact().await, 5);

        assert!(!compact_if_needed(&engine, 10).await);
        assert!(compact_if_needed(&engine, 5).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        // The rewritten log still rebuilds the stylist.
        let events = crate::wal::Wal::replay(&path).unwrap();
        assert_eq!(events.len(), 1);
    }
}
