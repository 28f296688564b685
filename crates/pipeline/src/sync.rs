use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{ConcurrencyConfig, RetryConfig};
use crate::retry::RetryPolicy;

/// The work performed for one project during a sync pass. Supplied by
/// the caller; typically a re-run of guide extraction or an index
/// refresh.
pub type SyncFn =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// Persisted snapshot of the service's per-project state, so sync
/// resumes where it left off after a restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    pub last_synced: HashMap<String, DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSummary {
    pub synced: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

/// Background service that syncs projects concurrently, bounded by a
/// counting semaphore, skipping projects synced within the cooldown
/// interval.
pub struct BackgroundSyncService {
    state_path: PathBuf,
    last_synced: DashMap<String, DateTime<Utc>>,
    semaphore: Arc<Semaphore>,
    retry: Arc<RetryPolicy>,
    min_interval: Duration,
}

impl BackgroundSyncService {
    pub fn new(
        state_path: PathBuf,
        concurrency: &ConcurrencyConfig,
        retry: &RetryConfig,
    ) -> Self {
        Self {
            state_path,
            last_synced: DashMap::new(),
            semaphore: Arc::new(Semaphore::new(concurrency.max_concurrent_syncs.max(1))),
            retry: Arc::new(RetryPolicy::new(retry)),
            min_interval: Duration::seconds(concurrency.min_sync_interval_secs as i64),
        }
    }

    /// Load persisted state. Missing file means a fresh start, not an
    /// error.
    pub async fn load_state(&self) -> Result<()> {
        let raw = match tokio::fs::read_to_string(&self.state_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.state_path.display(), "No previous sync state");
                return Ok(());
            }
            Err(e) => return Err(e).context("Failed to read sync state"),
        };

        let state: SyncState =
            serde_json::from_str(&raw).context("Failed to parse sync state")?;
        for (project, timestamp) in state.last_synced {
            self.last_synced.insert(project, timestamp);
        }

        info!(projects = self.last_synced.len(), "Restored sync state");
        Ok(())
    }

    async fn save_state(&self) -> Result<()> {
        let state = SyncState {
            last_synced: self
                .last_synced
                .iter()
                .map(|r| (r.key().clone(), *r.value()))
                .collect(),
        };

        let json = serde_json::to_string_pretty(&state)?;
        let tmp_path = self.state_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json)
            .await
            .context("Failed to write sync state")?;
        tokio::fs::rename(&tmp_path, &self.state_path)
            .await
            .context("Failed to replace sync state file")?;

        Ok(())
    }

    /// Sync every project that is due. Each project's work runs as its
    /// own task; the semaphore bounds how many run at once.
    pub async fn run_sync(&self, project_ids: &[String], sync_fn: SyncFn) -> Result<SyncSummary> {
        let now = Utc::now();
        let mut summary = SyncSummary::default();
        let mut tasks: JoinSet<(String, Result<()>)> = JoinSet::new();

        for project in project_ids {
            let last = self.last_synced.get(project).map(|r| *r.value());
            if !needs_sync(last, now, self.min_interval) {
                debug!(project, "Skipping recently synced project");
                summary.skipped.push(project.clone());
                continue;
            }

            let project = project.clone();
            let semaphore = self.semaphore.clone();
            let retry = self.retry.clone();
            let sync_fn = sync_fn.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                let result = retry
                    .retry("project_sync", || (sync_fn)(project.clone()))
                    .await;
                (project, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (project, result) = joined.context("Sync task panicked")?;
            match result {
                Ok(()) => {
                    self.last_synced.insert(project.clone(), Utc::now());
                    summary.synced.push(project);
                }
                Err(e) => {
                    warn!(project, error = %e, "Project sync failed");
                    summary.failed.push(project);
                }
            }
        }

        self.save_state().await?;

        info!(
            synced = summary.synced.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            "Sync pass finished"
        );

        Ok(summary)
    }

    pub fn last_synced(&self, project_id: &str) -> Option<DateTime<Utc>> {
        self.last_synced.get(project_id).map(|r| *r.value())
    }
}

/// A project is due when it has never synced or its last sync is older
/// than the cooldown interval.
pub fn needs_sync(
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    min_interval: Duration,
) -> bool {
    match last {
        None => true,
        Some(last) => now - last >= min_interval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn service(max_concurrent: usize, min_interval_secs: u64) -> BackgroundSyncService {
        let path = std::env::temp_dir().join(format!("sync_state_{}.json", uuid::Uuid::new_v4()));
        BackgroundSyncService::new(
            path,
            &ConcurrencyConfig {
                max_concurrent_syncs: max_concurrent,
                min_sync_interval_secs: min_interval_secs,
            },
            &RetryConfig {
                max_retries: 0,
                initial_backoff_ms: 1,
                max_backoff_ms: 1,
            },
        )
    }

    #[test]
    fn test_needs_sync_rules() {
        let now = Utc::now();
        let interval = Duration::seconds(300);

        assert!(needs_sync(None, now, interval));
        assert!(needs_sync(Some(now - Duration::seconds(600)), now, interval));
        assert!(!needs_sync(Some(now - Duration::seconds(10)), now, interval));
    }

    #[tokio::test]
    async fn test_concurrency_stays_within_semaphore_bound() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let service = service(2, 0);
        let projects: Vec<String> = (0..6).map(|i| format!("proj_{i}")).collect();

        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let sync_fn: SyncFn = {
            let current = current.clone();
            let peak = peak.clone();
            Arc::new(move |_project| {
                let current = current.clone();
                let peak = peak.clone();
                Box::pin(async move {
                    let running = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(running, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
        };

        let summary = service.run_sync(&projects, sync_fn).await.unwrap();

        assert_eq!(summary.synced.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_recently_synced_projects_are_skipped() {
        let service = service(2, 3600);
        let projects = vec!["p1".to_string(), "p2".to_string()];

        let calls = Arc::new(AtomicUsize::new(0));
        let sync_fn: SyncFn = {
            let calls = calls.clone();
            Arc::new(move |_project| {
                let calls = calls.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
        };

        let first = service.run_sync(&projects, sync_fn.clone()).await.unwrap();
        assert_eq!(first.synced.len(), 2);

        let second = service.run_sync(&projects, sync_fn).await.unwrap();
        assert_eq!(second.skipped.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_reported_not_raised() {
        let service = service(2, 0);
        let projects = vec!["good".to_string(), "bad".to_string()];

        let sync_fn: SyncFn = Arc::new(|project| {
            Box::pin(async move {
                if project == "bad" {
                    anyhow::bail!("store unavailable");
                }
                Ok(())
            })
        });

        let summary = service.run_sync(&projects, sync_fn).await.unwrap();

        assert_eq!(summary.synced, vec!["good".to_string()]);
        assert_eq!(summary.failed, vec!["bad".to_string()]);
        assert!(service.last_synced("bad").is_none());
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let path = std::env::temp_dir().join(format!("sync_state_{}.json", uuid::Uuid::new_v4()));
        let concurrency = ConcurrencyConfig {
            max_concurrent_syncs: 1,
            min_sync_interval_secs: 3600,
        };
        let retry = RetryConfig {
            max_retries: 0,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
        };

        let sync_fn: SyncFn = Arc::new(|_| Box::pin(async { Ok(()) }));

        let service = BackgroundSyncService::new(path.clone(), &concurrency, &retry);
        service
            .run_sync(&["p1".to_string()], sync_fn.clone())
            .await
            .unwrap();

        // Fresh instance reading the same state file.
        let restarted = BackgroundSyncService::new(path.clone(), &concurrency, &retry);
        restarted.load_state().await.unwrap();
        assert!(restarted.last_synced("p1").is_some());

        let summary = restarted.run_sync(&["p1".to_string()], sync_fn).await.unwrap();
        assert_eq!(summary.skipped, vec!["p1".to_string()]);

        let _ = tokio::fs::remove_file(&path).await;
    }
}
