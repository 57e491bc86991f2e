//! Periodic GC worker driving the scanner and collector.

use crate::collector::GarbageCollector;
use crate::error::GcResult;
use crate::retention::RetentionPolicy;
use crate::uploads::UploadReap;
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use wharf_core::config::GcConfig;

/// Totals of one worker pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub uploads: UploadReap,
    pub repositories_visited: usize,
    pub repositories_collected: usize,
    pub repository_errors: usize,
}

/// Runs collection passes across the fleet.
pub struct GcWorker {
    collector: Arc<GarbageCollector>,
    retention: RetentionPolicy,
    config: GcConfig,
}

impl GcWorker {
    pub fn new(collector: Arc<GarbageCollector>, config: GcConfig) -> Self {
        let retention = RetentionPolicy::new(collector.metadata().clone());
        Self {
            collector,
            retention,
            config,
        }
    }

    /// One pass: reap expired uploads, then collect repositories the scanner
    /// finds, cycling through retention policies, until none is left or the
    /// per-pass budget is spent.
    ///
    /// Each repository is visited at most once per pass, so a failing one is
    /// logged and never picked again before the next pass.
    pub async fn run_pass(&self) -> GcResult<PassSummary> {
        self.run_pass_at(OffsetDateTime::now_utc()).await
    }

    pub async fn run_pass_at(&self, now: OffsetDateTime) -> GcResult<PassSummary> {
        let mut summary = PassSummary {
            uploads: self
                .collector
                .reap_expired_uploaded_blobs(now, self.config.uploaded_blob_batch_size)
                .await?,
            ..Default::default()
        };

        let policies = self.retention.gc_policies().await?;
        let threshold = self.config.min_garbage_age();
        let mut budget = self.config.max_repositories_per_pass;
        let mut visited = Vec::new();

        while budget > 0 {
            let mut progressed = false;

            for policy in &policies {
                if budget == 0 {
                    break;
                }
                let Some(repository) = self
                    .collector
                    .find_repository_with_garbage_at(threshold, Some(*policy), &visited, now)
                    .await?
                else {
                    continue;
                };
                visited.push(repository.repository_id);

                progressed = true;
                budget -= 1;
                summary.repositories_visited += 1;

                match self
                    .collector
                    .collect_with_report(repository.repository_id, now)
                    .await
                {
                    Ok(report) => {
                        if report.removed_anything() {
                            summary.repositories_collected += 1;
                        }
                    }
                    Err(e) => {
                        summary.repository_errors += 1;
                        tracing::error!(
                            repository_id = repository.repository_id,
                            transient = e.is_transient(),
                            error = %e,
                            "Repository collection failed"
                        );
                    }
                }
            }

            if !progressed {
                break;
            }
        }

        tracing::info!(
            uploads_unlinked = summary.uploads.storages_unlinked,
            uploads_reclaimed = summary.uploads.storages_reclaimed,
            repositories_visited = summary.repositories_visited,
            repositories_collected = summary.repositories_collected,
            repository_errors = summary.repository_errors,
            "GC pass complete"
        );
        Ok(summary)
    }

    /// Run passes every `worker_interval` until `shutdown` flips to `true`.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let interval = self.config.worker_interval();
        tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs(), "GC worker started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_pass().await {
                            tracing::error!(error = %e, "GC pass failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("GC worker stopped");
        })
    }
}
