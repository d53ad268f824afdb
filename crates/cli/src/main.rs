//! Deskline CLI - helpdesk tickets from the terminal.
//!
//! # Usage
//!
//! ```bash
//! # Sign in (password is read from stdin)
//! dl login -e agent@example.com
//!
//! # List tickets and aggregate counts
//! dl tickets
//! dl stats
//!
//! # Open a ticket with attachments
//! dl create -t "VPN drops" -d "Every 10 minutes" --attach trace.pdf --attach screen.png
//!
//! # Work a ticket
//! dl assign 42
//! dl comment 42 "Looking into it"
//! dl resolve 42
//! ```
//!
//! # Commands
//!
//! - `login`, `signup`, `logout`, `whoami` - session management
//! - `tickets`, `ticket`, `stats` - read-models
//! - `create`, `assign`, `comment`, `resolve`, `close`, `export` - mutations
//!
//! Every run is one context of the profile stored in `DESKLINE_STATE_DIR`;
//! a cached session is revalidated against the API before any command runs.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use deskline_client::{ClientConfig, HelpdeskClient};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::CliError;

#[derive(Parser)]
#[command(name = "dl")]
#[command(author, version, about = "Deskline helpdesk CLI")]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        #[arg(short, long)]
        email: String,
    },
    /// Create an account and sign in
    Signup {
        #[arg(short, long)]
        email: String,

        #[arg(long)]
        first_name: String,

        #[arg(long)]
        last_name: String,
    },
    /// Sign out in every context of this profile
    Logout,
    /// Show the signed-in user
    Whoami,
    /// List tickets
    Tickets,
    /// Show one ticket with its comments
    Ticket { id: String },
    /// Show aggregate ticket counts
    Stats,
    /// Open a new ticket
    Create {
        #[arg(short, long)]
        title: String,

        #[arg(short, long)]
        description: String,

        /// Category (`technical_issues`, `billing`, `account`, `feature_request`, `feedback`, `other`)
        #[arg(short, long, default_value = "technical_issues")]
        category: String,

        /// Priority (`low`, `normal`, `high`, `urgent`)
        #[arg(short, long, default_value = "normal")]
        priority: String,

        /// File to attach (JPG, PNG or PDF, up to 3)
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,
    },
    /// Assign a ticket to yourself
    Assign { id: String },
    /// Comment on a ticket
    Comment { id: String, body: String },
    /// Mark a ticket resolved
    Resolve { id: String },
    /// Close a resolved ticket
    Close { id: String },
    /// Export closed tickets as CSV
    Export {
        /// First day, `YYYY-MM-DD`
        #[arg(long)]
        from: String,

        /// Last day, `YYYY-MM-DD`
        #[arg(long)]
        to: String,
    },
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &ClientConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR => sentry_tracing::EventFilter::Event,
        tracing::Level::WARN | tracing::Level::INFO => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln_error(&e);
            std::process::exit(2);
        }
    };

    // Sentry must be initialized before the tracing subscriber
    let _sentry_guard = init_sentry(&config);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "deskline_client=warn,deskline_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli, config).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

#[allow(clippy::print_stderr)]
fn eprintln_error(error: &dyn std::error::Error) {
    eprintln!("error: {error}");
}

async fn run(cli: Cli, config: ClientConfig) -> Result<(), CliError> {
    let client = HelpdeskClient::open(config)?;
    let output = commands::Output::new(cli.json);

    // Let a cached session revalidate before acting on it
    client.settled().await;

    match cli.command {
        Commands::Login { email } => commands::auth::login(&client, &output, &email).await,
        Commands::Signup {
            email,
            first_name,
            last_name,
        } => commands::auth::signup(&client, &output, email, first_name, last_name).await,
        Commands::Logout => commands::auth::logout(&client).await,
        Commands::Whoami => commands::auth::whoami(&client, &output),
        Commands::Tickets => commands::tickets::list(&client, &output).await,
        Commands::Ticket { id } => commands::tickets::show(&client, &output, &id).await,
        Commands::Stats => commands::tickets::stats(&client, &output).await,
        Commands::Create {
            title,
            description,
            category,
            priority,
            attachments,
        } => {
            let draft = commands::tickets::Draft {
                title,
                description,
                category: category.as_str().into(),
                priority: priority.as_str().into(),
                attachments,
            };
            commands::tickets::create(&client, &output, draft).await
        }
        Commands::Assign { id } => commands::tickets::assign(&client, &output, &id).await,
        Commands::Comment { id, body } => {
            commands::tickets::comment(&client, &output, &id, &body).await
        }
        Commands::Resolve { id } => commands::tickets::resolve(&client, &id).await,
        Commands::Close { id } => commands::tickets::close(&client, &id).await,
        Commands::Export { from, to } => {
            commands::tickets::export(&client, &output, &from, &to).await
        }
    }
}
