use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use contextkb::api::{self, middleware::SecurityConfig};
use contextkb::client::KbClient;
use contextkb::config::Config;
use contextkb::db::Database;
use contextkb::engine::Session;
use contextkb::mcp;

#[derive(Parser)]
#[command(name = "ckb")]
#[command(about = "Context-scoped knowledge base with persistent identifiers")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port for HTTP API (defaults to CONTEXTKB_PORT or 5050)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Create the root context and root concept
    Init {
        /// Site identifier (defaults to CONTEXTKB_SITE or "local")
        #[arg(short, long)]
        site: Option<String>,

        /// Wipe an already initialised store
        #[arg(long)]
        reset: bool,
    },
    /// Start MCP server via stdio
    Mcp {
        /// User the MCP session is opened for
        #[arg(short, long, default_value = "agent")]
        user: String,
    },
    /// Check a running server
    Status,
}

/// Initialize tracing with output to stderr (for MCP mode) or stdout
fn init_tracing(use_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "contextkb=debug,tower_http=debug".into()),
    );

    if use_stderr {
        // stdout carries the MCP protocol
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn open_database(config: &Config) -> anyhow::Result<Database> {
    let db = Database::open(config.db_path.clone())?;
    db.migrate()?;
    Ok(db)
}

async fn serve(config: &Config, port: u16) -> anyhow::Result<()> {
    let db = open_database(config)?;
    let session = Session::new(db)?;
    let app = api::create_router_with_security(session, SecurityConfig::from_env());

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(
        site = %config.site,
        "contextkb server listening on http://127.0.0.1:{}",
        port
    );

    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let use_stderr = matches!(cli.command, Some(Commands::Mcp { .. }));
    init_tracing(use_stderr);

    let config = Config::from_env()?;

    match cli.command {
        Some(Commands::Serve { port }) => {
            serve(&config, port.unwrap_or(config.port)).await?;
        }
        Some(Commands::Init { site, reset }) => {
            let site = site.unwrap_or_else(|| config.site.clone());
            let db = open_database(&config)?;
            db.initialise_site(&site, reset)?;
            println!(
                "Initialised site '{}' in {}",
                site,
                config.db_path.display()
            );
        }
        Some(Commands::Mcp { user }) => {
            let db = open_database(&config)?;
            mcp::run_stdio_server(db, &user).await?;
        }
        Some(Commands::Status) => {
            let client = KbClient::from_config(&config);
            match client.health().await {
                Ok(_) => println!("Server at {} is up (site '{}')", config.url, config.site),
                Err(e) => {
                    println!("Server at {} is not reachable: {}", config.url, e);
                    std::process::exit(1);
                }
            }
        }
        None => {
            serve(&config, config.port).await?;
        }
    }

    Ok(())
}
