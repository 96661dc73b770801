//! fleetgovd - fleet governance console
//!
//! External trigger surface for the governance core:
//! - Promote one surge schedule, or every schedule that is due
//! - Expire ended schedules and apply deferred proposals
//! - Run those sweeps periodically
//! - Inspect and operate the emergency brake
//! - Query the audit log

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use fleetgov_policy::actions;
use fleetgov_store::{GovernanceStore, InMemoryGovernanceStore, PostgresGovernanceStore};
use fleetgov_types::{AuditAction, AuditQuery, ScheduleId, User, UserId};
use fleetgov_workflow::GovernanceService;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::{CliConfig, StorageConfig};

/// Fleet governance console
#[derive(Parser)]
#[command(name = "fleetgovd")]
#[command(about = "Fleet governance console - scheduled activation and operator controls", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "FLEETGOV_CONFIG")]
    config: Option<String>,

    /// Identity recorded in the audit log for actions taken by this process
    #[arg(long, env = "FLEETGOV_ACTOR", default_value = "scheduler")]
    actor: String,

    /// Log level (overrides the configuration file)
    #[arg(long, env = "FLEETGOV_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "FLEETGOV_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Promote one approved surge schedule
    Promote {
        /// Schedule id
        schedule: String,
    },

    /// Promote every approved schedule whose start time has passed
    PromoteDue,

    /// Expire active schedules whose window has ended
    ExpireDue,

    /// Apply approved proposals whose effective time has come
    ActivateDue,

    /// Run every sweep once
    Sweep,

    /// Run every sweep periodically until interrupted
    Watch {
        /// Seconds between sweeps
        #[arg(long, default_value_t = 60)]
        interval_secs: u64,
    },

    /// Emergency brake controls
    Brake {
        #[command(subcommand)]
        action: BrakeCommand,
    },

    /// Query the audit log, newest first
    Audit {
        #[arg(long)]
        region: Option<String>,

        #[arg(long)]
        service: Option<String>,

        /// Action name, e.g. `schedule.activated`
        #[arg(long)]
        action: Option<String>,

        #[arg(long)]
        actor: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum BrakeCommand {
    /// Show the brake position
    Status,

    /// Engage the brake
    Engage {
        #[arg(long)]
        reason: String,
    },

    /// Release the brake and re-check blocked proposals
    Release,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = CliConfig::load(cli.config.as_deref()).context("loading configuration")?;

    // Initialize tracing
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let store = open_store(&config.storage).await?;
    let service = GovernanceService::builder(store)
        .with_config(config.governance.clone())
        .build();
    let trigger = UserId::new(cli.actor.as_str());

    match cli.command {
        Command::Promote { schedule } => {
            let id = ScheduleId::parse(&schedule)
                .with_context(|| format!("invalid schedule id {schedule}"))?;
            print_json(&service.trigger_promotion(&id, &trigger).await?)?;
        }
        Command::PromoteDue => print_json(&service.promote_due(&trigger).await?)?,
        Command::ExpireDue => print_json(&service.expire_due(&trigger).await?)?,
        Command::ActivateDue => print_json(&service.activate_due_proposals(&trigger).await?)?,
        Command::Sweep => sweep(&service, &trigger).await?,
        Command::Watch { interval_secs } => {
            if interval_secs == 0 {
                bail!("--interval-secs must be positive");
            }
            watch(&service, &trigger, Duration::from_secs(interval_secs)).await;
        }
        Command::Brake { action } => {
            let operator = operator(&trigger).with_permission(actions::EMERGENCY_BRAKE);
            match action {
                BrakeCommand::Status => print_json(&service.brake_status().await?)?,
                BrakeCommand::Engage { reason } => {
                    print_json(&service.engage_brake(&operator, &reason).await?)?
                }
                BrakeCommand::Release => {
                    let (state, reevaluated) = service.release_brake(&operator).await?;
                    info!(reevaluated = reevaluated.len(), "Blocked proposals re-checked");
                    print_json(&state)?;
                }
            }
        }
        Command::Audit {
            region,
            service: service_key,
            action,
            actor,
            limit,
        } => {
            let mut reader = operator(&trigger).with_permission(actions::AUDIT_READ);
            let mut query = AuditQuery::new().with_limit(limit);
            if let Some(region) = region {
                reader = reader.with_region(region.as_str());
                query = query.with_region(region);
            }
            if let Some(service_key) = service_key {
                query = query.with_service(service_key);
            }
            if let Some(action) = action {
                let parsed = AuditAction::parse(&action)
                    .with_context(|| format!("unknown audit action {action}"))?;
                query = query.with_action(parsed);
            }
            if let Some(actor) = actor {
                query = query.with_actor(actor);
            }
            print_json(&service.query_audit(&reader, &query).await?)?;
        }
    }

    Ok(())
}

async fn open_store(storage: &StorageConfig) -> anyhow::Result<Arc<dyn GovernanceStore>> {
    match storage {
        StorageConfig::Memory => {
            warn!("Using in-memory storage; nothing survives this process");
            Ok(Arc::new(InMemoryGovernanceStore::new()))
        }
        StorageConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
        } => {
            let store =
                PostgresGovernanceStore::connect(url, *max_connections, *connect_timeout_secs)
                    .await
                    .context("connecting to PostgreSQL")?;
            info!(max_connections, "Connected to PostgreSQL");
            Ok(Arc::new(store))
        }
    }
}

/// The console acts as a trusted operator holding only the permission of
/// the command it runs.
fn operator(trigger: &UserId) -> User {
    User::new(trigger.clone(), "operator", 100)
}

async fn sweep(service: &GovernanceService, trigger: &UserId) -> anyhow::Result<()> {
    let promoted = service.promote_due(trigger).await?;
    let expired = service.expire_due(trigger).await?;
    let activated = service.activate_due_proposals(trigger).await?;

    info!(
        promoted = promoted.succeeded.len(),
        expired = expired.succeeded.len(),
        activated = activated.succeeded.len(),
        failed = promoted.failed.len() + expired.failed.len() + activated.failed.len(),
        "Sweep finished"
    );
    Ok(())
}

async fn watch(service: &GovernanceService, trigger: &UserId, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    info!(interval_secs = every.as_secs(), "Watching for due activations");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = sweep(service, trigger).await {
                    warn!(error = %e, "Sweep failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
