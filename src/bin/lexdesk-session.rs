//! Command-line session tool for a Lexdesk API.
//!
//! ```text
//! LEXDESK_API_URL=https://api.lexdesk.example lexdesk-session status
//! LEXDESK_PASSWORD=... lexdesk-session login counsel@firm.test [mfa-code]
//! lexdesk-session refresh
//! lexdesk-session logout
//! ```
//!
//! The session is kept in the OS keychain between invocations.

use anyhow::{Context, Result};
use bridge_traits::time::LogLevel;
use clap::{Parser, Subcommand};
use lexdesk_client::auth::{AuthContext, LoginOutcome};
use lexdesk_client::runtime::config::ClientConfig;
use lexdesk_client::runtime::logging::{init_logging, LogFormat, LoggingConfig};
use tracing::info;

/// Sign in to a Lexdesk API and manage the stored session
#[derive(Parser, Debug)]
#[command(name = "lexdesk-session")]
#[command(version, about, long_about = None)]
struct Cli {
    /// API base URL; overrides the value read from the environment
    #[arg(long, global = true, env = "LEXDESK_API_URL")]
    api_url: Option<String>,

    /// Log internal diagnostics to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show who is signed in and until when (default)
    Status,

    /// Sign in with email and password
    Login {
        email: String,

        /// Verification code, when the account asks for one
        code: Option<String>,

        #[arg(long, env = "LEXDESK_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Trade the refresh token for a new token pair
    Refresh,

    /// End the session and forget the stored tokens
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(
        LoggingConfig::default()
            .with_format(LogFormat::Compact)
            .with_level(if cli.verbose { LogLevel::Debug } else { LogLevel::Warn }),
    )?;

    let mut builder = ClientConfig::from_env()?;
    if let Some(api_url) = cli.api_url {
        builder = builder.api_base_url(api_url);
    }
    let config = builder
        .build()
        .context("pass --api-url or set LEXDESK_API_URL to the API base URL")?;
    let auth = AuthContext::initialize(config).await?;
    let session = auth.session();

    match cli.command.unwrap_or(Command::Status) {
        Command::Status => match (session.current_user(), session.token_expires_at()) {
            (Some(user), Some(expires_at)) if session.is_authenticated() => {
                println!("signed in as {} until {}", user.display_name(), expires_at);
            }
            (Some(user), _) => println!("session for {} has expired", user.email),
            _ => println!("signed out"),
        },
        Command::Login {
            email,
            code,
            password,
        } => {
            let user = match session.login(&email, &password).await? {
                LoginOutcome::Authenticated(user) => user,
                LoginOutcome::MfaRequired { email } => {
                    let code = code.context(
                        "a verification code was sent; pass it after the email address",
                    )?;
                    session.verify_mfa_code(&email, &code).await?
                }
            };
            info!(user_id = %user.id, "Signed in");
            println!("signed in as {}", user.display_name());
        }
        Command::Refresh => {
            auth.coordinator().refresh().await?;
            match session.token_expires_at() {
                Some(expires_at) => println!("token refreshed, valid until {}", expires_at),
                None => println!("token refreshed"),
            }
        }
        Command::Logout => {
            session.logout().await?;
            println!("signed out");
        }
    }

    Ok(())
}
