use clap::{Parser, Subcommand};
use image_index::{Config, IndexService, IndexStore, ScanMode, SyncReport};
use std::error::Error;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "image-index")]
#[command(about = "Keep a SQLite index of a generated-image tree and page through it")]
#[command(version)]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Image directory (overrides the config file)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Index database file (overrides the config file)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database and rebuild date stats from existing records
    Init,
    /// Run one scan and wait for it to finish
    Scan {
        #[arg(long, value_enum, default_value_t = ScanMode::Full)]
        mode: ScanMode,
        /// Limit `--mode check` to paths under this prefix (e.g. 2026-02-14/)
        #[arg(long)]
        dir: Option<String>,
    },
    /// Recompute every date bucket from the image records
    RebuildDates,
    /// Print one page of images as JSON, newest first
    List {
        #[arg(long, default_value_t = 50)]
        limit: u64,
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
    /// Print the number of indexed images
    Count,
    /// Print the date buckets as JSON, newest first
    Dates,
    /// Print the offset of the first image on DATE (YYYY-MM-DD)
    Offset { date: String },
    /// Full scan, then rescan today and yesterday on an interval until Ctrl-C
    Watch {
        /// Seconds between recent scans (overrides the config file)
        #[arg(long)]
        interval: Option<u64>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_report(report: Option<SyncReport>) {
    match report {
        Some(report) => println!(
            "✅ {} scan: {} found, {} upserted, {} removed, {} fixed, {} date buckets ({:.2?})",
            report.mode,
            report.found,
            report.upserted,
            report.removed,
            report.fixed,
            report.buckets,
            report.elapsed,
        ),
        None => println!("⏳ Another scan is already running, skipped"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(root) = cli.root {
        config.root = root;
    }
    if let Some(database) = cli.database {
        config.database = Some(database);
    }
    let db_path = config.database_path()?;

    match cli.command {
        Command::Init => {
            let store = IndexStore::open(&db_path)?;
            let dates = store.rebuild_from_images()?;
            println!("📁 Index ready at {} ({} dates)", db_path.display(), dates);
            store.close()?;
        }
        Command::Scan { mode, dir } => {
            if !config.root.is_dir() {
                return Err(format!("image directory not found: {}", config.root.display()).into());
            }
            let service = IndexService::open(&db_path, &config.root)?;
            let report = match (mode, dir) {
                (ScanMode::Check, Some(dir)) => {
                    let engine = service.engine().clone();
                    tokio::task::spawn_blocking(move || engine.check_dir(&dir)).await??
                }
                (mode, _) => service.scan(mode).await?,
            };
            print_report(report);
            println!("📊 Images in index: {}", service.count()?);
            service.close()?;
        }
        Command::RebuildDates => {
            let store = IndexStore::open(&db_path)?;
            let dates = store.rebuild_from_images()?;
            println!("✅ Rebuilt {} date buckets", dates);
            store.close()?;
        }
        Command::List { limit, offset } => {
            let service = IndexService::open(&db_path, &config.root)?;
            println!("{}", serde_json::to_string_pretty(&service.page(limit, offset)?)?);
        }
        Command::Count => {
            let store = IndexStore::open(&db_path)?;
            println!("{}", store.get_count()?);
        }
        Command::Dates => {
            let service = IndexService::open(&db_path, &config.root)?;
            println!("{}", serde_json::to_string_pretty(&service.date_buckets()?)?);
        }
        Command::Offset { date } => {
            let service = IndexService::open(&db_path, &config.root)?;
            println!("{}", service.date_offset(&date)?);
        }
        Command::Watch { interval } => {
            if let Some(secs) = interval {
                config.scan_interval_secs = secs;
            }
            watch(config, db_path).await?;
        }
    }

    Ok(())
}

/// Startup full scan, then the periodic recent scan until Ctrl-C
async fn watch(config: Config, db_path: PathBuf) -> Result<(), Box<dyn Error>> {
    let service = IndexService::open(&db_path, &config.root)?;
    info!(
        root = %config.root.display(),
        database = %db_path.display(),
        interval_secs = config.scan_interval().as_secs(),
        "watching image directory"
    );

    // A failed startup scan is not fatal: the periodic scan keeps going
    if let Ok(report) = service.scan(ScanMode::Full).await {
        print_report(report);
    }

    let ticker = service.spawn_periodic(config.scan_interval());
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    ticker.abort();
    let _ = ticker.await;
    service.close()?;
    Ok(())
}
