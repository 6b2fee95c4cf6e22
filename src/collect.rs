//! File collection: find newline-delimited JSON files under a directory and
//! parse every line into a typed record.

use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::error::{EtlError, Result};
use crate::progress::progress_bar;

/// Recursively list `*.json` files under `root`. Entries are visited in
/// file-name order so the result is stable across runs. Hidden files and
/// directories (leading `.`) below the root are not descended into.
pub fn find_json_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            EtlError::Io {
                path,
                source: e.into(),
            }
        })?;
        let is_json = entry.path().extension().map_or(false, |ext| ext == "json");
        if entry.file_type().is_file() && is_json {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

/// Parse one JSON object per line. Blank lines are ignored.
pub fn read_json_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let io_err = |source| EtlError::Io {
        path: path.to_path_buf(),
        source,
    };
    let reader = BufReader::new(File::open(path).map_err(io_err)?);

    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(io_err)?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| EtlError::Parse {
            path: path.to_path_buf(),
            line: idx + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Every record from every JSON file under `root`, in discovery order.
pub fn collect_records<T: DeserializeOwned>(root: &Path) -> Result<Vec<T>> {
    let files = find_json_files(root)?;
    info!("Found {} JSON files under {}", files.len(), root.display());

    let pb = progress_bar(files.len(), "Reading files");
    let mut records = Vec::new();
    for file in &files {
        let mut batch = read_json_lines(file)?;
        debug!("{}: {} records", file.display(), batch.len());
        records.append(&mut batch);
        pb.inc(1);
    }
    pb.finish_with_message(format!("Read {} records from {} files", records.len(), files.len()));

    Ok(records)
}
