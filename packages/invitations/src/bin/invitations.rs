//! Operator CLI for the invitation store
//!
//! Inspects and withdraws invitations directly in Postgres. Every command
//! prints one JSON document on stdout; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use invitations_core::common::{AssocId, ContextId, InvitationId, UserId};
use invitations_core::config::Config;
use invitations_core::domains::invitations::{
    FamilyKey, InvitationError, InvitationRecord, InvitationRepository, InvitationType, TokenService,
};
use invitations_core::kernel::{BaseInvitationStore, PostgresInvitationStore};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "invitations")]
#[command(about = "Inspect and cancel invitations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,

    /// Show one invitation
    Show { id: InvitationId },

    /// List every member of a family, newest first
    Family(FamilyArgs),

    /// Cancel one pending invitation
    Cancel { id: InvitationId },

    /// Cancel every pending member of a family
    CancelFamily(FamilyArgs),
}

#[derive(Args)]
struct FamilyArgs {
    #[arg(long = "type")]
    invitation_type: InvitationType,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    context: ContextId,
    #[arg(long)]
    user: Option<UserId>,
    #[arg(long)]
    assoc: Option<AssocId>,
}

impl FamilyArgs {
    fn family(self) -> FamilyKey {
        FamilyKey::new(self.invitation_type, self.email, self.user, self.context, self.assoc)
    }
}

// ============================================================================
// JSON Response Types
// ============================================================================

#[derive(Serialize)]
struct Response {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    invitations: Option<Vec<InvitationRecord>>,
}

impl Response {
    fn ok() -> Self {
        Self {
            success: true,
            message: None,
            count: None,
            invitations: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Self::ok()
        }
    }
}

fn output(resp: &Response) -> Result<()> {
    println!("{}", serde_json::to_string(resp)?);
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,invitations_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let pool = get_pool(&config).await?;

    let response = match cli.command {
        Commands::Migrate => cmd_migrate(&pool).await?,
        Commands::Show { id } => cmd_show(&pool, id).await?,
        Commands::Family(args) => cmd_family(&pool, args.family()).await?,
        Commands::Cancel { id } => cmd_cancel(&pool, &config, id).await?,
        Commands::CancelFamily(args) => cmd_cancel_family(&pool, &config, args.family()).await?,
    };
    output(&response)
}

async fn get_pool(config: &Config) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_migrate(pool: &PgPool) -> Result<Response> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");
    Ok(Response::ok())
}

async fn cmd_show(pool: &PgPool, id: InvitationId) -> Result<Response> {
    let store = PostgresInvitationStore::new(pool.clone());
    Ok(match store.find_by_id(id).await? {
        Some(record) => Response {
            invitations: Some(vec![record]),
            ..Response::ok()
        },
        None => Response::failed(format!("Invitation {} not found", id)),
    })
}

async fn cmd_family(pool: &PgPool, family: FamilyKey) -> Result<Response> {
    let store = PostgresInvitationStore::new(pool.clone());
    let members = store.list_family(&family).await?;
    Ok(Response {
        count: Some(members.len() as u64),
        invitations: Some(members),
        ..Response::ok()
    })
}

async fn cmd_cancel(pool: &PgPool, config: &Config, id: InvitationId) -> Result<Response> {
    let store = PostgresInvitationStore::new(pool.clone());
    let tokens = TokenService::new(config.token_hash_params())?;
    let repository = InvitationRepository::new(&store, &tokens);

    let invitation = match repository.get_by_id(id).await {
        Ok(invitation) => invitation,
        Err(InvitationError::NotFound) => return Ok(Response::failed(format!("Invitation {} not found", id))),
        Err(e) => return Err(e.into()),
    };

    match invitation.cancel(&store).await {
        Ok(_) => {
            let record = store.find_by_id(id).await?;
            Ok(Response {
                count: Some(1),
                invitations: record.map(|r| vec![r]),
                ..Response::ok()
            })
        }
        Err(e @ (InvitationError::TransitionConflict | InvitationError::Expired)) => Ok(Response::failed(e.to_string())),
        Err(e) => Err(e.into()),
    }
}

async fn cmd_cancel_family(pool: &PgPool, config: &Config, family: FamilyKey) -> Result<Response> {
    let store = PostgresInvitationStore::new(pool.clone());
    let tokens = TokenService::new(config.token_hash_params())?;
    let cancelled = InvitationRepository::new(&store, &tokens)
        .cancel_family(&family)
        .await?;
    Ok(Response {
        count: Some(cancelled),
        ..Response::ok()
    })
}
