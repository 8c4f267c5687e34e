//! Service entry point.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use tokio_util::sync::CancellationToken;

use calsync::adapters::{
    AdapterRegistry, GoogleCalendarAdapter, InternalCalendarAdapter, MicrosoftCalendarAdapter,
};
use calsync::clock::SystemClock;
use calsync::config::{AppConfig, ConfigLoader};
use calsync::jobs::{JobQueue, JobRunner};
use calsync::rate_limit::RateLimiter;
use calsync::server::{AppState, run_server};
use calsync::service::CalendarService;
use calsync::sync::SyncEngine;
use calsync::webhooks::WebhookPipeline;
use calsync::{db, telemetry};

#[derive(Parser)]
#[command(name = "calsync")]
#[command(about = "Calendar synchronization and availability core")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Run the background job runner
    JobRunner,
    /// Report webhook subscriptions that look unhealthy
    WebhookHealth {
        /// Flag subscriptions silent for more than this many hours
        #[arg(long, default_value_t = 48)]
        silent_hours: i64,
    },
    /// Run the webhook server (default)
    Serve,
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply all pending migrations
    Up,
    /// Rollback the last migration
    Down,
    /// Show migration status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load()?;
    telemetry::init_tracing(&config)?;
    let db = db::init_pool(&config).await?;

    if let Some(Commands::Migrate { action }) = &cli.command {
        match action {
            MigrateAction::Up => {
                Migrator::up(&db, None).await?;
                println!("migrations applied");
            }
            MigrateAction::Down => {
                Migrator::down(&db, Some(1)).await?;
                println!("last migration rolled back");
            }
            MigrateAction::Status => {
                let applied = Migrator::get_applied_migrations(&db).await?;
                let pending = Migrator::get_pending_migrations(&db).await?;
                println!("applied: {}, pending: {}", applied.len(), pending.len());
            }
        }
        return Ok(());
    }

    if let Some(Commands::WebhookHealth { silent_hours }) = &cli.command {
        report_webhook_health(&db, *silent_hours).await?;
        return Ok(());
    }

    // Local/test profiles migrate automatically on boot.
    if config.profile == "local" || config.profile == "test" {
        Migrator::up(&db, None).await?;
    }

    let clock = Arc::new(SystemClock);
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limits.clone()));
    let adapters = Arc::new(build_adapters(&config, Arc::clone(&rate_limiter)));

    let (queue, receiver) = JobQueue::new();
    let engine = Arc::new(SyncEngine::new(
        db.clone(),
        Arc::clone(&adapters),
        clock.clone(),
    ));
    let service = Arc::new(
        CalendarService::new(db.clone(), clock.clone(), queue.clone(), Arc::clone(&adapters))
            .with_webhook_callback_base(&config.webhook_callback_base),
    );
    let pipeline = Arc::new(WebhookPipeline::new(
        db.clone(),
        clock.clone(),
        queue.clone(),
        config.webhooks.clone(),
    ));

    let shutdown = CancellationToken::new();
    let runner = Arc::new(JobRunner::new(
        db.clone(),
        engine,
        service,
        config.jobs.clone(),
    ));

    match cli.command {
        Some(Commands::JobRunner) => {
            install_shutdown_handler(shutdown.clone());
            runner.run(receiver, queue, shutdown).await;
            Ok(())
        }
        _ => {
            install_shutdown_handler(shutdown.clone());
            let runner_shutdown = shutdown.clone();
            let runner_queue = queue.clone();
            tokio::spawn(async move {
                runner.run(receiver, runner_queue, runner_shutdown).await;
            });

            let state = AppState { db, pipeline };
            run_server(config, state).await
        }
    }
}

fn build_adapters(config: &AppConfig, rate_limiter: Arc<RateLimiter>) -> AdapterRegistry {
    // Access tokens are issued by the accounts service and arrive through the
    // environment in this deployment shape.
    let google_token = std::env::var("CALSYNC_GOOGLE_ACCESS_TOKEN").unwrap_or_default();
    let microsoft_token = std::env::var("CALSYNC_MICROSOFT_ACCESS_TOKEN").unwrap_or_default();
    let account_id = std::env::var("CALSYNC_PROVIDER_ACCOUNT_ID")
        .unwrap_or_else(|_| "default-account".to_string());

    let mut registry = AdapterRegistry::new(InternalCalendarAdapter::new());
    if !google_token.is_empty() {
        registry = registry.with_google(GoogleCalendarAdapter::new(
            config.google_api_base.clone(),
            account_id.clone(),
            google_token,
            Arc::clone(&rate_limiter),
        ));
    }
    if !microsoft_token.is_empty() {
        registry = registry.with_microsoft(MicrosoftCalendarAdapter::new(
            config.microsoft_api_base.clone(),
            account_id,
            microsoft_token,
            rate_limiter,
        ));
    }
    registry
}

/// Prints subscriptions that are expired or silent for too long, so
/// operators can re-arm channels before syncs go stale.
async fn report_webhook_health(
    db: &sea_orm::DatabaseConnection,
    silent_hours: i64,
) -> anyhow::Result<()> {
    use std::collections::HashSet;

    use calsync::repositories::{TenantContext, TenantRepository, WebhookRepository};
    use uuid::Uuid;

    let tenants = TenantRepository::new(db);
    let mut expired_total = 0usize;
    let mut silent_total = 0usize;

    for tenant in tenants.list().await? {
        let ctx = TenantContext::new(tenant.id);
        let webhooks = WebhookRepository::new(db, ctx);

        let expired = webhooks.find_expiring(chrono::Duration::zero()).await?;
        let expired_ids: HashSet<Uuid> = expired.iter().map(|s| s.id).collect();
        for subscription in &expired {
            expired_total += 1;
            println!(
                "EXPIRED  tenant={} calendar={} provider={} expired_at={}",
                subscription.tenant_id,
                subscription.calendar_id,
                subscription.provider.as_str(),
                subscription.expires_at
            );
        }

        for subscription in webhooks
            .find_stale(chrono::Duration::hours(silent_hours))
            .await?
        {
            if expired_ids.contains(&subscription.id) {
                continue;
            }
            silent_total += 1;
            println!(
                "SILENT   tenant={} calendar={} provider={} last_notification={:?}",
                subscription.tenant_id,
                subscription.calendar_id,
                subscription.provider.as_str(),
                subscription.last_notification_at
            );
        }
    }

    println!("{expired_total} expired, {silent_total} silent subscriptions");
    Ok(())
}

fn install_shutdown_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }
    });
}
