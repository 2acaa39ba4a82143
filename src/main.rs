//! Catalog CLI - command-line access to the product catalog

use anyhow::Result;
use catalog_cli::{api, auth, config::Config};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "catalog-cli")]
#[command(about = "Command-line client for the product catalog API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate with the catalog (authorization-code flow)
    Login {
        /// Authorization code or full redirect URL (prompted for if omitted)
        #[arg(short, long)]
        code: Option<String>,

        /// Force a new login even if a credential is stored
        #[arg(short, long)]
        force: bool,
    },

    /// Log out and clear stored credentials
    Logout,

    /// Show current authentication status
    Status,

    /// Print a valid access token, refreshing it first if needed
    Token,

    /// Search the catalog
    Search {
        /// Search terms
        query: String,

        /// Listing status filter (e.g. active)
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum number of pages to fetch
        #[arg(short, long, default_value = "3")]
        pages: usize,
    },

    /// Show a single item
    Item {
        /// Item ID
        id: String,
    },

    /// Show the signed-in user (verify auth works)
    Whoami,

    /// Write a config file with default values
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::InitConfig => init_config(),
        command => run(command).await,
    }
}

fn init_config() -> Result<()> {
    let path = Config::config_path()?;
    if path.exists() {
        println!("Config already exists at {}", path.display());
    } else {
        Config::default().save()?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}

async fn run(command: Commands) -> Result<()> {
    let config = Config::load()?;
    let session = auth::Session::open(&config).await?;

    match command {
        Commands::Login { code, force } => {
            tracing::info!("Starting authentication flow...");
            auth::login(&session, code, force).await?;
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            auth::logout(&session).await?;
        }
        Commands::Status => {
            auth::status(&session).await?;
        }
        Commands::Token => match session.coordinator.valid_access_token().await? {
            Some(token) => println!("{}", token),
            None => anyhow::bail!("Not logged in. Run 'catalog-cli login'."),
        },
        Commands::Search {
            query,
            status,
            pages,
        } => {
            tracing::info!("Searching...");
            api::search(&config, &session, &query, status, pages).await?;
        }
        Commands::Item { id } => {
            api::show_item(&config, &session, &id).await?;
        }
        Commands::Whoami => {
            api::whoami(&config, &session).await?;
        }
        Commands::InitConfig => init_config()?,
    }

    Ok(())
}
