// ABOUTME: Background maintenance of the sandbox tables: startup recovery and retention purge
// ABOUTME: Terminal sandboxes older than the retention window are deleted with their commands

use crate::store::{PurgeStats, RecoveryStats, Result, SandboxStore};
use crate::types::now_micros;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Mark interrupted provisioning as `error` and interrupted commands as `failed`.
///
/// Run once before serving requests; no task of this process can own those rows yet.
pub async fn recover_interrupted(store: &dyn SandboxStore) -> Result<RecoveryStats> {
    let stats = store.recover_interrupted(now_micros()).await?;
    if stats.sandboxes > 0 || stats.commands > 0 {
        info!(
            sandboxes = stats.sandboxes,
            commands = stats.commands,
            "recovery: finalised rows interrupted by restart"
        );
    }
    Ok(stats)
}

/// Single purge pass over sandboxes that have been terminal for longer than `retention`
pub async fn purge_once(store: &dyn SandboxStore, retention: Duration) -> Result<PurgeStats> {
    let retention = ChronoDuration::from_std(retention).unwrap_or(ChronoDuration::MAX);
    let cutoff = now_micros()
        .checked_sub_signed(retention)
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);

    let stats = store.purge_terminal(cutoff).await?;
    if stats.sandboxes > 0 {
        info!(
            sandboxes = stats.sandboxes,
            commands = stats.commands,
            "reaper: purged expired sandboxes"
        );
    } else {
        debug!("reaper: nothing to purge");
    }
    Ok(stats)
}

/// Spawn the reaper as a tokio background task.
///
/// The task runs until the runtime shuts down or the handle is aborted.
pub fn spawn(store: Arc<dyn SandboxStore>, retention: Duration, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = purge_once(store.as_ref(), retention).await {
                warn!(error = %e, "reaper: purge failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{Runtime, Sandbox, SandboxCommand, SandboxStatus, SandboxTransition};
    use pretty_assertions::assert_eq;

    async fn stopped_sandbox(store: &MemoryStore, session: &str, age: ChronoDuration) -> Sandbox {
        let sandbox =
            Sandbox::new_creating(session, "https://github.com/acme/app", Runtime::Nodejs, 1);
        store.insert_sandbox(&sandbox).await.unwrap();
        store
            .transition_sandbox(
                &sandbox.id,
                SandboxTransition::Activate {
                    handle: "h".to_string(),
                    public_url: None,
                },
                now_micros(),
            )
            .await
            .unwrap();
        let command = SandboxCommand::new_pending(&sandbox.id, "ls");
        assert!(store.insert_command(&command).await.unwrap());
        store
            .transition_sandbox(&sandbox.id, SandboxTransition::Stop, now_micros() - age)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_purge_respects_retention() {
        let store = MemoryStore::new();
        let old = stopped_sandbox(&store, "s1", ChronoDuration::hours(48)).await;
        let recent = stopped_sandbox(&store, "s2", ChronoDuration::minutes(5)).await;

        let stats = purge_once(&store, Duration::from_secs(24 * 3600))
            .await
            .unwrap();

        assert_eq!(
            stats,
            PurgeStats {
                sandboxes: 1,
                commands: 1
            }
        );
        assert!(store.get_sandbox(&old.id).await.unwrap().is_none());
        assert!(store.list_commands(&old.id).await.unwrap().is_empty());
        assert!(store.get_sandbox(&recent.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_huge_retention_purges_nothing() {
        let store = MemoryStore::new();
        stopped_sandbox(&store, "s1", ChronoDuration::days(365)).await;

        let stats = purge_once(&store, Duration::from_secs(u64::MAX)).await.unwrap();
        assert_eq!(stats, PurgeStats::default());
    }

    #[tokio::test]
    async fn test_recovery_reports_counts() {
        let store = MemoryStore::new();
        let sandbox =
            Sandbox::new_creating("s1", "https://github.com/acme/app", Runtime::Python, 1);
        store.insert_sandbox(&sandbox).await.unwrap();

        let stats = recover_interrupted(&store).await.unwrap();
        assert_eq!(stats.sandboxes, 1);
        assert_eq!(
            store.get_sandbox(&sandbox.id).await.unwrap().unwrap().status,
            SandboxStatus::Error
        );

        // Nothing left to recover on a second run
        assert_eq!(
            recover_interrupted(&store).await.unwrap(),
            RecoveryStats::default()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_reaper_purges_on_interval() {
        let store = Arc::new(MemoryStore::new());
        let old = stopped_sandbox(&store, "s1", ChronoDuration::hours(2)).await;

        let handle = spawn(store.clone(), Duration::from_secs(3600), Duration::from_secs(60));

        // Paused time auto-advances once every task is idle
        for _ in 0..10 {
            if store.get_sandbox(&old.id).await.unwrap().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        handle.abort();

        assert!(store.get_sandbox(&old.id).await.unwrap().is_none());
    }
}
