//! Background job queue and runner.
//!
//! Jobs are submitted explicitly through [`JobQueue`] and executed by
//! [`JobRunner`] worker tasks under bounded concurrency: a global cap, a
//! per-tenant cap, and a per-calendar mutex so syncs for one calendar run
//! serially while different calendars proceed in parallel. A periodic poll
//! also revives due sync rows (scheduled or backed off) that have no queued
//! message, so retries survive process restarts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::JobRunnerConfig;
use crate::error::{CalendarError, CalendarResult};
use crate::models::calendar_sync::{Column as SyncColumn, Entity as CalendarSync};
use crate::models::enums::{CalendarProvider, CalendarSyncStatus};
use crate::repositories::{
    CalendarSyncRepository, TenantContext, TenantRepository, WebhookRepository,
};
use crate::service::CalendarService;
use crate::sync::{SyncEngine, SyncRun};

/// A unit of background work. Each job is idempotent by its keyed entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    SyncCalendar { tenant_id: Uuid, sync_id: Uuid },
    ImportAccountCalendars {
        tenant_id: Uuid,
        provider: CalendarProvider,
    },
    ImportOrgResources {
        tenant_id: Uuid,
        provider: CalendarProvider,
    },
    RenewSubscription {
        tenant_id: Uuid,
        subscription_id: Uuid,
    },
}

impl Job {
    pub fn tenant_id(&self) -> Uuid {
        match self {
            Job::SyncCalendar { tenant_id, .. }
            | Job::ImportAccountCalendars { tenant_id, .. }
            | Job::ImportOrgResources { tenant_id, .. }
            | Job::RenewSubscription { tenant_id, .. } => *tenant_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Job::SyncCalendar { .. } => "sync_calendar",
            Job::ImportAccountCalendars { .. } => "import_account_calendars",
            Job::ImportOrgResources { .. } => "import_org_resources",
            Job::RenewSubscription { .. } => "renew_subscription",
        }
    }
}

/// Handle for submitting jobs; clone freely.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::UnboundedSender<Job>,
}

impl JobQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn enqueue(&self, job: Job) -> CalendarResult<()> {
        let metric_labels = vec![("kind", job.kind().to_string())];
        metrics::counter!("jobs_enqueued_total", &metric_labels).increment(1);
        self.sender
            .send(job)
            .map_err(|_| CalendarError::Cancelled)
    }
}

pub struct JobRunner {
    db: DatabaseConnection,
    engine: Arc<SyncEngine>,
    service: Arc<CalendarService>,
    config: JobRunnerConfig,
    total_permits: Arc<Semaphore>,
    tenant_permits: Mutex<HashMap<Uuid, Arc<Semaphore>>>,
    calendar_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl JobRunner {
    pub fn new(
        db: DatabaseConnection,
        engine: Arc<SyncEngine>,
        service: Arc<CalendarService>,
        config: JobRunnerConfig,
    ) -> Self {
        let total = config.total_concurrency.max(1);
        Self {
            db,
            engine,
            service,
            config,
            total_permits: Arc::new(Semaphore::new(total)),
            tenant_permits: Mutex::new(HashMap::new()),
            calendar_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Runs the worker loop until the shutdown token fires: drains the queue,
    /// and once per poll interval revives due sync rows.
    pub async fn run(
        self: Arc<Self>,
        mut receiver: mpsc::UnboundedReceiver<Job>,
        queue: JobQueue,
        shutdown: CancellationToken,
    ) {
        info!("starting job runner");
        let poll_interval = Duration::from_secs(5);
        // Subscription renewal scans run two orders of magnitude slower than
        // the sync poll.
        let renewal_every: u64 = 120;
        let mut ticks: u64 = 0;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("job runner shutdown requested");
                    break;
                }
                maybe_job = receiver.recv() => {
                    let Some(job) = maybe_job else { break };
                    let runner = Arc::clone(&self);
                    let job_shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        runner.dispatch(job, job_shutdown).await;
                    });
                }
                _ = sleep(poll_interval) => {
                    ticks += 1;
                    if let Err(err) = self.enqueue_due_syncs(&queue).await {
                        error!(error = %err, "failed to poll due syncs");
                    }
                    if ticks % renewal_every == 0 {
                        if let Err(err) = self
                            .enqueue_expiring_subscriptions(
                                &queue,
                                self.config.subscription_renewal_horizon_secs,
                            )
                            .await
                        {
                            error!(error = %err, "failed to poll expiring subscriptions");
                        }
                    }
                }
            }
        }

        info!("job runner stopped");
    }

    /// Finds not_started syncs whose schedule (or backoff) has elapsed and
    /// puts them back on the queue.
    pub async fn enqueue_due_syncs(&self, queue: &JobQueue) -> CalendarResult<usize> {
        let now = Utc::now();
        let due = CalendarSync::find()
            .filter(SyncColumn::Status.eq(CalendarSyncStatus::NotStarted))
            .filter(SyncColumn::ScheduledAt.lte(now))
            .filter(
                SyncColumn::RetryAfter
                    .is_null()
                    .or(SyncColumn::RetryAfter.lte(now)),
            )
            .order_by_asc(SyncColumn::ScheduledAt)
            .limit(64)
            .all(&self.db)
            .await?;

        let count = due.len();
        for sync in due {
            queue.enqueue(Job::SyncCalendar {
                tenant_id: sync.tenant_id,
                sync_id: sync.id,
            })?;
        }
        if count > 0 {
            debug!(count, "enqueued due sync jobs");
        }
        Ok(count)
    }

    /// Finds active subscriptions expiring within the horizon and enqueues
    /// renewals, sweeping tenant by tenant.
    pub async fn enqueue_expiring_subscriptions(
        &self,
        queue: &JobQueue,
        horizon_secs: i64,
    ) -> CalendarResult<usize> {
        let tenants = TenantRepository::new(&self.db);
        let horizon = chrono::Duration::seconds(horizon_secs);

        let mut count = 0;
        for tenant in tenants.list().await? {
            let ctx = TenantContext::new(tenant.id);
            let webhooks = WebhookRepository::new(&self.db, ctx);
            for subscription in webhooks.find_expiring(horizon).await? {
                queue.enqueue(Job::RenewSubscription {
                    tenant_id: subscription.tenant_id,
                    subscription_id: subscription.id,
                })?;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn tenant_permit(&self, tenant_id: Uuid) -> Arc<Semaphore> {
        let mut permits = self.tenant_permits.lock().await;
        permits
            .entry(tenant_id)
            .or_insert_with(|| {
                Arc::new(Semaphore::new(self.config.per_tenant_concurrency.max(1)))
            })
            .clone()
    }

    async fn calendar_lock(&self, calendar_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.calendar_locks.lock().await;
        locks
            .entry(calendar_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    #[instrument(skip(self, shutdown), fields(kind = job.kind(), tenant_id = %job.tenant_id()))]
    async fn dispatch(&self, job: Job, shutdown: CancellationToken) {
        let Ok(_total) = self.total_permits.acquire().await else {
            return;
        };
        let tenant_semaphore = self.tenant_permit(job.tenant_id()).await;
        let Ok(_tenant) = tenant_semaphore.acquire().await else {
            return;
        };

        let started = std::time::Instant::now();
        let result = tokio::select! {
            result = self.execute(&job) => result,
            _ = shutdown.cancelled() => Err(CalendarError::Cancelled),
        };
        let metric_labels = vec![("kind", job.kind().to_string())];
        metrics::histogram!("job_duration_seconds", &metric_labels)
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(()) => debug!("job completed"),
            Err(err) => {
                warn!(error = %err, "job failed");
                if let Job::SyncCalendar { tenant_id, sync_id } = &job {
                    self.handle_sync_failure(*tenant_id, *sync_id, &err).await;
                }
            }
        }
    }

    async fn execute(&self, job: &Job) -> CalendarResult<()> {
        let ctx = TenantContext::new(job.tenant_id());
        match job {
            Job::SyncCalendar { sync_id, .. } => {
                let syncs = CalendarSyncRepository::new(&self.db, ctx);
                let sync = syncs.require(*sync_id).await?;

                // Serialize syncs per calendar; across calendars they run in
                // parallel.
                let lock = self.calendar_lock(sync.calendar_id).await;
                let _guard = lock.lock().await;

                let incremental = syncs.latest_success_token(sync.calendar_id).await?.is_some();
                let budget = if incremental {
                    self.config.incremental_sync_timeout_secs
                } else {
                    self.config.full_sync_timeout_secs
                };

                let run = tokio::time::timeout(
                    Duration::from_secs(budget),
                    self.engine.run(ctx, *sync_id),
                )
                .await
                .map_err(|_| CalendarError::Timeout(budget))??;

                if matches!(run, SyncRun::Skipped) {
                    debug!("sync skipped; already claimed");
                }
                Ok(())
            }
            Job::ImportAccountCalendars { provider, .. } => {
                self.service.import_account_calendars(ctx, *provider).await?;
                Ok(())
            }
            Job::ImportOrgResources { provider, .. } => {
                self.service
                    .import_organization_resources(ctx, *provider)
                    .await?;
                Ok(())
            }
            Job::RenewSubscription {
                subscription_id, ..
            } => {
                self.service.renew_subscription(ctx, *subscription_id).await?;
                Ok(())
            }
        }
    }

    /// Revives a failed sync with exponential backoff while attempts remain
    /// and the error is retryable; otherwise it stays failed.
    async fn handle_sync_failure(&self, tenant_id: Uuid, sync_id: Uuid, err: &CalendarError) {
        let ctx = TenantContext::new(tenant_id);
        let syncs = CalendarSyncRepository::new(&self.db, ctx);

        let sync = match syncs.get(sync_id).await {
            Ok(Some(sync)) => sync,
            _ => return,
        };

        let retryable =
            err.is_retryable() || matches!(err, CalendarError::SyncInProgress(_));
        if !retryable || sync.attempts >= self.config.max_attempts {
            if sync.status != CalendarSyncStatus::Failed {
                let _ = syncs.mark_failed(sync, &err.to_string()).await;
            }
            return;
        }

        let backoff = self.backoff_seconds(sync.attempts.max(1), err);
        let retry_after = Utc::now() + chrono::Duration::seconds(backoff as i64);
        if let Err(mark_err) = syncs.mark_retry(sync, &err.to_string(), retry_after).await {
            error!(error = %mark_err, "failed to schedule sync retry");
            return;
        }
        warn!(backoff_seconds = backoff, "sync scheduled for retry");
        metrics::counter!("sync_retries_scheduled_total").increment(1);
    }

    /// Exponential backoff with jitter; a provider retry-after hint wins when
    /// it is larger.
    fn backoff_seconds(&self, attempts_completed: i32, err: &CalendarError) -> f64 {
        let base = self.config.backoff_base_secs as f64;
        let max = self.config.backoff_max_secs as f64;
        let prior_failures = attempts_completed.saturating_sub(1).max(0);

        let mut backoff = (base * 2_f64.powi(prior_failures)).min(max);
        if let CalendarError::RateLimited {
            retry_after_secs: Some(hint),
        } = err
        {
            backoff = backoff.max(*hint as f64);
        }

        let jitter_factor = self.config.backoff_jitter_factor.max(0.0);
        let jitter = if jitter_factor > 0.0 {
            rand::thread_rng().gen_range(0.0..(jitter_factor * backoff))
        } else {
            0.0
        };
        backoff + jitter
    }
}
