use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info};

use crate::store::CorrelationStore;

/// Wrapper around tokio-cron-scheduler for background maintenance
pub struct Scheduler {
    inner: JobScheduler,
}

impl Scheduler {
    pub async fn new() -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;
        Ok(Self { inner })
    }

    /// Periodically drop correlations older than `retention`.
    /// A pruned key only turns later replies to it into misses.
    pub async fn add_prune_job(
        &self,
        cron_expr: &str,
        store: Arc<dyn CorrelationStore>,
        retention: Duration,
    ) -> Result<()> {
        let job = Job::new_async(cron_expr, move |_uuid, _lock| {
            let store = store.clone();
            Box::pin(async move {
                debug!("Running scheduled task: prune correlations");
                if let Err(e) = prune_once(store.as_ref(), retention).await {
                    error!("Failed to prune correlations: {:#}", e);
                }
            })
        })
        .with_context(|| format!("Failed to create prune job with cron: {}", cron_expr))?;

        self.inner
            .add(job)
            .await
            .context("Failed to add prune job")?;

        info!(
            "Scheduled correlation pruning '{}' (retention {}h)",
            cron_expr,
            retention.num_hours()
        );
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.inner
            .start()
            .await
            .context("Failed to start scheduler")?;
        info!("Scheduler started");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .context("Failed to shutdown scheduler")?;
        info!("Scheduler stopped");
        Ok(())
    }
}

/// Oldest instant a record may have been stored at to survive pruning.
pub fn retention_cutoff(retention: Duration) -> Result<DateTime<Utc>> {
    Utc::now()
        .checked_sub_signed(retention)
        .with_context(|| format!("Retention of {}h is out of range", retention.num_hours()))
}

/// One pruning pass. Returns the number of records removed.
pub async fn prune_once(store: &dyn CorrelationStore, retention: Duration) -> Result<usize> {
    let cutoff = retention_cutoff(retention)?;
    let removed = store.prune(cutoff).await?;
    if removed > 0 {
        info!(
            "Pruned {} correlation(s) stored before {} ({} left)",
            removed,
            cutoff.to_rfc3339(),
            store.len().await?
        );
    }
    Ok(removed)
}
