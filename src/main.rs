//! Google MCP Server
//!
//! A Model Context Protocol (MCP) server for Gmail, Drive and Calendar with
//! multiple Google accounts and sandboxed local file access.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use google_mcp_server::auth::AccountManager;
use google_mcp_server::config::Config;
use google_mcp_server::google::GoogleClient;
use google_mcp_server::local::{LocalDir, LocalFiles};
use google_mcp_server::mcp::server::McpServer;
use google_mcp_server::mcp::tools::ToolHandler;

/// Google MCP Server
#[derive(Parser)]
#[command(name = "google-mcp")]
#[command(author, version, about = "Google MCP Server - Gmail, Drive and Calendar tools for MCP clients")]
struct Cli {
    /// Allowed local directory, as PATH, PATH:ro or PATH:rw (repeatable)
    #[arg(long = "local-dir", global = true, value_name = "SPEC")]
    local_dirs: Vec<LocalDir>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server on stdio (default)
    Serve,

    /// Manage Google accounts
    #[command(subcommand)]
    Accounts(AccountsCommand),
}

#[derive(Subcommand)]
enum AccountsCommand {
    /// Authorize a new account (opens a browser)
    Add {
        /// Label for the account, e.g. "personal" or "work"
        name: String,
    },

    /// List configured accounts
    List,

    /// Remove an account and its stored token
    Remove {
        /// Account name
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::new().context("failed to load configuration")?;
    config.local_dirs.extend(cli.local_dirs);
    debug!(config_dir = %config.config_dir.display(), "using configuration directory");

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server(config).await,
        Commands::Accounts(command) => run_accounts(config, command).await,
    }
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    if !config.client_credentials_exist() {
        warn!(
            path = %config.client_credentials_path.display(),
            "OAuth client credentials not found; account tools will fail until they are added"
        );
    }

    let files = LocalFiles::new(&config.local_dirs).context("invalid local directory")?;
    if !files.is_enabled() {
        info!("local file access disabled");
    }
    let files = Arc::new(files);

    let accounts = AccountManager::new(config)
        .await
        .context("failed to load accounts")?;
    let accounts = Arc::new(accounts);
    if accounts.list_accounts().await.is_empty() {
        warn!("no accounts configured, run 'google-mcp accounts add <name>'");
    }

    let google = GoogleClient::new(reqwest::Client::new());
    let mut server = McpServer::new(ToolHandler::new(accounts, google, files.clone()));
    let result = server.run_stdio().await;

    files.close();
    result.context("MCP server failed")
}

async fn run_accounts(config: Config, command: AccountsCommand) -> anyhow::Result<()> {
    let config_dir = config.config_dir.clone();
    let accounts = AccountManager::new(config)
        .await
        .context("failed to load accounts")?;

    match command {
        AccountsCommand::Add { name } => {
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            accounts
                .authenticate(&name, &cancel)
                .await
                .with_context(|| format!("failed to authorize account '{}'", name))?;

            // The email is informational; failing to fetch it leaves it empty.
            let google = GoogleClient::new(reqwest::Client::new());
            match accounts.token_source(&name).await {
                Ok(source) => match google.profile(&source).await {
                    Ok(profile) => {
                        if let Err(e) = accounts
                            .store()
                            .set_email(&name, &profile.email_address)
                            .await
                        {
                            warn!(account = %name, error = %e, "could not record account email");
                        }
                        eprintln!("Account '{}' added ({}).", name, profile.email_address);
                    }
                    Err(e) => {
                        warn!(account = %name, error = %e, "could not look up account email");
                        eprintln!("Account '{}' added.", name);
                    }
                },
                Err(e) => {
                    warn!(account = %name, error = %e, "could not build token source");
                    eprintln!("Account '{}' added.", name);
                }
            }
        }
        AccountsCommand::List => {
            let list = accounts.list_accounts().await;
            if list.is_empty() {
                println!("No accounts configured in {}.", config_dir.display());
            }
            for (name, email) in list {
                if email.is_empty() {
                    println!("{}", name);
                } else {
                    println!("{}\t{}", name, email);
                }
            }
        }
        AccountsCommand::Remove { name } => {
            accounts.remove_account(&name).await?;
            eprintln!("Account '{}' removed.", name);
        }
    }

    Ok(())
}
