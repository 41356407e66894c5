use analytics_etl::cli::{
    clear_snapshots, init_destination, list_snapshots, load_settings, run_once, run_worker,
};
use clap::{Parser, Subcommand, builder::styling};
use eyre::Result;
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

// CLI Styling
const STYLES: styling::Styles = styling::Styles::styled()
    .header(styling::AnsiColor::BrightWhite.on_default())
    .usage(styling::AnsiColor::BrightWhite.on_default())
    .literal(styling::AnsiColor::Green.on_default())
    .placeholder(styling::AnsiColor::Cyan.on_default());

/// Analytics ETL: stage CSV, database and API records, then load them into the analytics store
#[derive(Parser)]
#[command(name = "aetl", version, styles = STYLES)]
struct Cli {
    /// The dotenv file to source settings from (skipped if missing)
    #[arg(short, long, global = true, default_value = ".env")]
    env: String,

    /// YAML settings file (defaults to etl.yml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More verbose logging
    #[arg(long, global = true)]
    debug: bool,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline once
    Run {
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the pipeline on startup and then on the configured interval
    Worker,

    /// Create the destination database tables if missing
    InitDb,

    /// Inspect or clear staging snapshots
    Staging {
        #[command(subcommand)]
        command: StagingCommands,
    },
}

#[derive(Subcommand)]
enum StagingCommands {
    /// List snapshots for a source name, oldest first
    List {
        /// Source name, e.g. Customers or Customers_Transformed
        name: String,
    },

    /// Delete every snapshot for a source name
    Clear {
        /// Source name, e.g. Customers or Customers_Transformed
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if Path::new(&cli.env).exists() {
        dotenvy::from_filename(&cli.env)?;
    }

    let log_level = match cli.debug {
        true => "debug",
        false => "info",
    };
    let env = env_logger::Env::default().filter_or("LOG_LEVEL", log_level);
    env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .init();

    let settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { json } => {
            let cancel = cancel_on_ctrl_c();
            log::info!(
                "Running ETL once from {} into {}",
                settings.data_sources.csv_path.display().bright_black(),
                settings.destination.display().bright_black()
            );
            let run = run_once(settings, &cancel).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&run)?);
            }
            if run.is_degraded() {
                log::warn!("Run {}: data remains in staging", "degraded".yellow());
            } else {
                log::info!("Run {}", "succeeded".green());
            }
        }
        Commands::Worker => {
            let cancel = cancel_on_ctrl_c();
            let runs = run_worker(settings, &cancel).await?;
            log::info!("Worker finished after {} runs", runs.cyan());
        }
        Commands::InitDb => {
            let path = init_destination(&settings)?;
            log::info!("Destination ready at {}", path.display().bright_black());
        }
        Commands::Staging { command } => match command {
            StagingCommands::List { name } => {
                let snapshots = list_snapshots(&settings, &name)?;
                if snapshots.is_empty() {
                    log::info!("No snapshots for {}", name.cyan());
                }
                for snapshot in snapshots {
                    println!(
                        "{}  {}",
                        snapshot.captured_at.format("%Y-%m-%d %H:%M:%S%.6f").cyan(),
                        snapshot.path.display()
                    );
                }
            }
            StagingCommands::Clear { name } => {
                let removed = clear_snapshots(&settings, &name)?;
                log::info!("Removed {} snapshots for {}", removed, name.cyan());
            }
        },
    }

    Ok(())
}

/// Cancel the returned token on Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, stopping after the current step");
            token.cancel();
        }
    });
    cancel
}
