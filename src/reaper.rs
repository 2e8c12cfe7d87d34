use std::sync::Arc;
use std::time::Duration;

use tracing::{info, Instrument};
use ulid::Ulid;

use crate::engine::{now_ms, CleanupReport, Engine, EngineError};

/// One cleanup pass at the current time, traced under its own run id.
pub async fn cleanup_once(engine: &Engine) -> Result<CleanupReport, EngineError> {
    let run_id = Ulid::new();
    async {
        let report = engine.run_cleanup(now_ms()).await?;
        if report != CleanupReport::default() {
            info!(
                requests = report.requests_deleted,
                allocations_purged = report.allocations_purged,
                reservations = report.reservations_deleted,
                executables_clamped = report.executables_clamped,
                allocations_removed = report.allocations_removed,
                "cleanup pass removed entities"
            );
        }
        Ok(report)
    }
    .instrument(tracing::info_span!("cleanup", %run_id))
    .await
}

/// Background task that periodically deletes what no live allocation holds any more.
pub async fn run_cleanup(engine: Arc<Engine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        if let Err(e) = cleanup_once(&engine).await {
            tracing::error!("cleanup failed: {e}");
        }
    }
}

/// Background task that compacts the journal once enough records accumulated.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        let run_id = Ulid::new();
        async {
            match engine.compact().await {
                Ok(()) => info!(appends, "journal compacted"),
                Err(e) => tracing::error!("journal compaction failed: {e}"),
            }
        }
        .instrument(tracing::info_span!("compaction", %run_id))
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::InMemoryAclManager;
    use crate::engine::ResourceReservationTask;
    use crate::engine::ResourceDescriptor;
    use crate::identifier::LocalDomain;
    use crate::model::*;
    use crate::specification::Specification;

    #[tokio::test]
    async fn cleanup_once_purges_deleted_request() {
        let dir = tempfile::tempdir().unwrap();
        let acl = Arc::new(InMemoryAclManager::new());
        let engine = Engine::open(&dir.path().join("reaper.wal"), LocalDomain::new("cz.cesnet"), acl.clone())
            .unwrap();

        let start = now_ms() + 3_600_000;
        let slot = Span::new(start, start + 3_600_000);
        let request = engine
            .create_reservation_request(ReservationRequestDraft::single(
                slot,
                "user-1",
                Specification::resource(ResourceId(1)),
            ))
            .await
            .unwrap();
        let mut task = ResourceReservationTask::new(ResourceDescriptor {
            id: ResourceId(1),
            technologies: Default::default(),
            is_endpoint: false,
        });
        engine.allocate(request, &mut task).await.unwrap();
        assert_eq!(acl.len(), 1);

        // nothing to do while the request is live
        assert_eq!(cleanup_once(&engine).await.unwrap(), CleanupReport::default());

        engine.delete_reservation_request(request).await.unwrap();
        let report = cleanup_once(&engine).await.unwrap();
        assert_eq!(report.reservations_deleted, 1);
        assert_eq!(report.allocations_purged, 1);
        assert!(acl.is_empty());
        assert!(engine.read(|s| s.reservation_count()).await == 0);
    }

    #[tokio::test]
    async fn compactor_leaves_small_journal_alone() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(
            Engine::open(
                &dir.path().join("compactor.wal"),
                LocalDomain::new("cz.cesnet"),
                Arc::new(InMemoryAclManager::new()),
            )
            .unwrap(),
        );
        engine
            .create_reservation_request(ReservationRequestDraft::single(
                Span::new(1_000, 2_000),
                "user-1",
                Specification::resource(ResourceId(1)),
            ))
            .await
            .unwrap();
        let appends = engine.appends_since_compact().await;
        assert!(appends > 0);

        let handle = tokio::spawn(run_compactor(engine.clone(), u64::MAX));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();
        assert_eq!(engine.appends_since_compact().await, appends);
    }
}
