use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ladder_types::events::Notification;
use ladder_types::{CommunityId, ThreadId};

use crate::engine::Engine;
use crate::notify::Notifier;

/// Deletes the external resources the engine schedules for cleanup.
pub trait ResourceJanitor: Send + Sync {
    fn delete_thread(&self, community: CommunityId, thread: ThreadId) -> BoxFuture<'_, anyhow::Result<()>>;
}

/// Hands cleanups to whoever renders the ladder by publishing
/// `ThreadCleanupDue`. Never fails.
pub struct NotifyingJanitor {
    notifier: Notifier,
}

impl NotifyingJanitor {
    pub fn new(notifier: Notifier) -> Self {
        Self { notifier }
    }
}

impl ResourceJanitor for NotifyingJanitor {
    fn delete_thread(&self, community: CommunityId, thread: ThreadId) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.notifier
                .publish(Notification::ThreadCleanupDue { community, thread });
            Ok(())
        })
    }
}

/// What one sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub threads_deleted: usize,
    pub failures: usize,
}

/// Periodic lifecycle maintenance: expires unanswered challenges and runs
/// due thread cleanups.
pub struct Sweeper {
    engine: Arc<Engine>,
    janitor: Arc<dyn ResourceJanitor>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(engine: Arc<Engine>, janitor: Arc<dyn ResourceJanitor>) -> Self {
        let interval = engine.config().sweep_interval;
        Self {
            engine,
            janitor,
            interval,
        }
    }

    /// Sweep on an interval until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let report = self.tick(Utc::now()).await;
            if report.expired > 0 || report.threads_deleted > 0 {
                info!(
                    "Sweep: {} challenges expired, {} threads cleaned up",
                    report.expired, report.threads_deleted
                );
            }
        }
        info!("Sweeper stopped");
    }

    /// One sweep as of `now`. A cleanup that fails is logged and dropped;
    /// it is never retried.
    pub async fn tick(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport {
            expired: self.engine.expire_pending(now).await.len(),
            ..SweepReport::default()
        };

        for (community, thread) in self.engine.take_due_deletions(now).await {
            match self.janitor.delete_thread(community, thread).await {
                Ok(()) => report.threads_deleted += 1,
                Err(e) => {
                    warn!(
                        "Community {}: failed to clean up thread {}: {}",
                        community, thread, e
                    );
                    report.failures += 1;
                }
            }
        }
        report
    }
}
