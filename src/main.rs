use clap::{Parser, Subcommand};
use tracing::{error, info};

use polymarket_edge::api::{router, ApiState};
use polymarket_edge::client::PolymarketClient;
use polymarket_edge::config::Config;
use polymarket_edge::error::Result;
use polymarket_edge::{db, pipeline, telemetry};

#[derive(Parser, Debug)]
#[command(name = "edge-finder", version, about = "Polymarket market snapshot and ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Find open, tradable markets and write markets_snapshot.json
    Discover,
    /// Snapshot both order books of every discovered market
    Live {
        /// Only the first N markets of the snapshot
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Fetch YES/NO price history for every discovered market
    History {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Create the SQLite store and apply migrations
    SetupDb,
    /// Merge the JSON artifacts into the store
    Ingest,
    /// discover, live, history, setup-db and ingest in sequence
    Run {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Serve the read-only query API over the store
    Serve,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    telemetry::init(&cfg.log_level);

    if let Err(e) = run(cli.command, cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Command, cfg: Config) -> Result<()> {
    match command {
        Command::Discover => {
            let mut api = PolymarketClient::new(&cfg)?;
            pipeline::discover(&cfg, &mut api).await?;
        }
        Command::Live { limit } => {
            let mut api = PolymarketClient::new(&cfg)?;
            pipeline::live(&cfg, &mut api, limit).await?;
        }
        Command::History { limit } => {
            let mut api = PolymarketClient::new(&cfg)?;
            pipeline::history(&cfg, &mut api, limit).await?;
        }
        Command::SetupDb => pipeline::setup_db(&cfg).await?,
        Command::Ingest => {
            pipeline::ingest(&cfg).await?;
        }
        Command::Run { limit } => {
            let mut api = PolymarketClient::new(&cfg)?;
            pipeline::run_all(&cfg, &mut api, limit).await?;
        }
        Command::Serve => serve(&cfg).await?,
    }
    Ok(())
}

async fn serve(cfg: &Config) -> Result<()> {
    let pool = db::open(cfg.db_path(), false).await?;
    let app = router(ApiState { pool });

    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
