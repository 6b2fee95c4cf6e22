use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

use songplay_etl::config::{connect, Config};
use songplay_etl::load::LoadMode;
use songplay_etl::pipeline;
use songplay_etl::progress::{format_duration, set_log_only};

#[derive(Parser)]
#[command(name = "songplay-etl")]
#[command(about = "Load song metadata and listening logs into the songplays star schema")]
struct Args {
    /// Insert rows one at a time instead of bulk copying each table
    #[arg(short, long)]
    insert: bool,

    /// Key-value file with DB_PATH and optional data directories
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Root of the song metadata files (overrides SONG_DATA_DIR)
    #[arg(long)]
    song_data: Option<PathBuf>,

    /// Root of the user activity logs (overrides LOG_DATA_DIR)
    #[arg(long)]
    log_data: Option<PathBuf>,

    /// Drop and recreate all tables before loading
    #[arg(long)]
    reset_schema: bool,

    /// Hide progress bars, only emit log lines
    #[arg(long)]
    log_only: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    set_log_only(args.log_only);

    let mut config = Config::from_env_file(&args.env_file)
        .with_context(|| format!("Failed to read config from {}", args.env_file.display()))?;
    if let Some(dir) = args.song_data {
        config.song_data = dir;
    }
    if let Some(dir) = args.log_data {
        config.log_data = dir;
    }
    config.mode = if args.insert {
        LoadMode::RowInsert
    } else {
        LoadMode::Bulk
    };
    config.reset_schema = args.reset_schema;

    let start = Instant::now();

    let mut conn = connect(&config).context("Failed to establish database connection")?;
    if let Some(path) = &config.db_path {
        info!("Connected to {}", path.display());
    }

    pipeline::run(&mut conn, &config).context("ETL run aborted")?;
    conn.close()
        .map_err(|(_, e)| e)
        .context("Failed to close database connection")?;

    println!("\n{:=<60}", "");
    println!("ETL complete!");
    println!("  Song data: {}", config.song_data.display());
    println!("  Log data:  {}", config.log_data.display());
    println!("  Mode:      {:?}", config.mode);
    println!("  Elapsed:   {}", format_duration(start.elapsed()));
    println!("{:=<60}", "");

    Ok(())
}
