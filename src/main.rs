//! teams-session - Teams browser session token manager
//!
//! Keeps the bearer tokens of a captured Teams web session usable from the
//! command line: encrypted at rest, refreshed over HTTP, and re-established
//! through a browser when the refresh token is gone.

mod auth;
mod commands;
mod config;
mod error;
mod http;
mod session;
mod storage;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auth::Resource;

#[derive(Parser)]
#[command(name = "teams-session")]
#[command(about = "Manage Microsoft Teams session tokens", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in interactively through the configured browser program
    Login,

    /// Delete the saved session and token cache
    Logout,

    /// Show session age, token validity, identity and region
    Status,

    /// Refresh all tracked tokens
    Refresh {
        /// Refresh even if the tokens are not near expiry
        #[arg(short, long)]
        force: bool,
    },

    /// Print a valid bearer token for a resource (substrate, spaces, chatsvcagg, graph, skype)
    Token {
        resource: String,
    },

    /// Show the signed-in user
    Whoami,

    /// Show the serving region and service URLs
    Region,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so `token` output stays pipeable
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let ctx = commands::Context::open()?;

    let result = match cli.command {
        Commands::Login => {
            tracing::info!("Starting login flow...");
            commands::login(&ctx).await
        }
        Commands::Logout => {
            commands::logout(&ctx);
            Ok(())
        }
        Commands::Status => commands::status(&ctx),
        Commands::Refresh { force } => commands::refresh(&ctx, force).await,
        Commands::Token { resource } => {
            if resource.eq_ignore_ascii_case("skype") {
                commands::skype_token(&ctx).await
            } else {
                let resource: Resource = resource.parse().map_err(anyhow::Error::msg)?;
                commands::token(&ctx, resource).await
            }
        }
        Commands::Whoami => commands::whoami(&ctx),
        Commands::Region => commands::region(&ctx),
    };

    if let Err(e) = result {
        eprintln!("Error [{}]: {}", e.kind(), e);
        if e.is_retryable() && !matches!(e, error::AuthError::RefreshInProgress) {
            eprintln!("This looks temporary; the saved session was kept. Retry shortly.");
        }
        std::process::exit(e.exit_code());
    }
    Ok(())
}
