//! Run orchestration: song data first, then logs, one transaction each.

use rusqlite::Connection;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Instant;
use tracing::info;

use crate::collect::collect_records;
use crate::config::Config;
use crate::error::Result;
use crate::load::LoadMode;
use crate::logs::process_logs;
use crate::progress::format_duration;
use crate::schema;
use crate::songs::process_songs;

/// A transform that turns collected records into loaded tables.
pub type TransformFn<T> = fn(&Connection, &[T], LoadMode) -> Result<()>;

/// Collect every record under `dir`, run `transform` inside a transaction
/// and commit. Collection or transform errors propagate and nothing from
/// this directory is committed; load failures are reported by the loader
/// and do not stop the commit.
pub fn process_data<T: DeserializeOwned>(
    conn: &mut Connection,
    dir: &Path,
    mode: LoadMode,
    transform: TransformFn<T>,
) -> Result<()> {
    let start = Instant::now();
    let records: Vec<T> = collect_records(dir)?;

    let tx = conn.transaction()?;
    transform(&tx, &records, mode)?;
    tx.commit()?;

    info!(
        "Processed {} records from {} in {}",
        records.len(),
        dir.display(),
        format_duration(start.elapsed())
    );
    Ok(())
}

/// Load the song dimensions, then derive and load everything from the logs.
pub fn run(conn: &mut Connection, config: &Config) -> Result<()> {
    info!("Load mode: {:?}", config.mode);

    if config.reset_schema {
        schema::reset(conn)?;
    }

    process_data(conn, &config.song_data, config.mode, process_songs)?;
    process_data(conn, &config.log_data, config.mode, process_logs)?;
    Ok(())
}
