//! Writing tables into the database.
//!
//! Two strategies, chosen once per run:
//!
//! - **Bulk**: the table is serialized to a tab-separated copy buffer (no
//!   header, `NULL` as empty string, PostgreSQL text-format escapes) and the
//!   buffer is streamed into the table with [`copy_from`]. The whole table
//!   either lands or is rolled back.
//! - **Row insert**: one positional `INSERT ... VALUES (?, ...)` per row. The
//!   first failing row aborts the rest of the call.
//!
//! Failures are logged and reported as a [`LoadOutcome`]; they never abort
//! the run.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::io::{BufRead, Write};
use tracing::{error, info, warn};

use crate::error::{EtlError, Result};
use crate::models::IntoRow;
use crate::progress::{progress_bar, table_spinner};
use crate::schema;

/// Upper bound on bound parameters per batched statement.
const MAX_BATCH_PARAMS: usize = 999;

const COPY_SAVEPOINT: &str = "copy_from";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadMode {
    /// Buffered tab-separated copy (default)
    #[default]
    Bulk,
    /// Parameterized insert per row
    RowInsert,
}

/// A named, column-labelled set of rows ready to be written.
#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows,
        }
    }

    pub fn from_rows<T: IntoRow>(rows: Vec<T>) -> Self {
        Self {
            name: T::TABLE.to_string(),
            columns: T::COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: rows.into_iter().map(IntoRow::into_row).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Why this is not a well-formed table, if it isn't.
    fn shape_error(&self) -> Option<String> {
        if self.columns.is_empty() {
            return Some("no columns".to_string());
        }
        self.rows
            .iter()
            .position(|row| row.len() != self.columns.len())
            .map(|i| {
                format!(
                    "row {} has {} values for {} columns",
                    i,
                    self.rows[i].len(),
                    self.columns.len()
                )
            })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LoadOutcome {
    Loaded { rows: usize },
    Failed { reason: String },
    Skipped { reason: String },
}

impl LoadOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadOutcome::Loaded { .. })
    }
}

/// Write a table with the selected strategy and log the result.
pub fn upload_table(conn: &Connection, table: &Table, mode: LoadMode) -> LoadOutcome {
    if let Some(reason) = table.shape_error() {
        warn!("Error: {} is not a tabular structure ({}), skipping", table.name, reason);
        return LoadOutcome::Skipped { reason };
    }

    match mode {
        LoadMode::Bulk => bulk_load(conn, table),
        LoadMode::RowInsert => insert_rows(conn, table),
    }
}

// ============================================================================
// Bulk Copy
// ============================================================================

fn bulk_load(conn: &Connection, table: &Table) -> LoadOutcome {
    let spinner = table_spinner(&table.name);

    let mut buffer = Vec::new();
    let result = write_copy_buffer(table, &mut buffer)
        .map_err(|source| EtlError::Io {
            path: format!("<copy buffer for {}>", table.name).into(),
            source,
        })
        .and_then(|()| copy_from(conn, buffer.as_slice(), &table.name, &table.columns));

    match result {
        Ok(rows) => {
            spinner.finish_with_message(format!("Copied {} rows into {}", rows, table.name));
            info!("Success: inserted {} rows into {} table", rows, table.name);
            LoadOutcome::Loaded { rows }
        }
        Err(e) => {
            spinner.abandon_with_message(format!("Copy into {} failed", table.name));
            error!("Error: copying data to {} table: {}", table.name, e);
            LoadOutcome::Failed {
                reason: e.to_string(),
            }
        }
    }
}

/// Serialize rows as tab-separated text, one line per row.
pub fn write_copy_buffer<W: Write>(table: &Table, out: &mut W) -> std::io::Result<()> {
    for row in &table.rows {
        for (i, value) in row.iter().enumerate() {
            if i > 0 {
                out.write_all(b"\t")?;
            }
            match value {
                Value::Null => {}
                Value::Integer(n) => write!(out, "{}", n)?,
                Value::Real(f) => write!(out, "{}", f)?,
                Value::Text(s) => out.write_all(escape_copy_field(s).as_bytes())?,
                Value::Blob(b) => out.write_all(escape_copy_field(&String::from_utf8_lossy(b)).as_bytes())?,
            }
        }
        out.write_all(b"\n")?;
    }
    Ok(())
}

fn escape_copy_field(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\t' => escaped.push_str("\\t"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn unescape_copy_field(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Storage class a declared column type resolves to (SQLite affinity rules).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Affinity {
    Integer,
    Real,
    Numeric,
    Text,
}

impl Affinity {
    fn from_decl(decl: &str) -> Self {
        let upper = decl.to_ascii_uppercase();
        if upper.contains("INT") {
            Affinity::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            Affinity::Text
        } else if upper.contains("BLOB") || upper.is_empty() {
            // Untyped columns keep the field as given
            Affinity::Text
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            Affinity::Real
        } else {
            Affinity::Numeric
        }
    }

    /// Parse one non-null copy field into a typed value.
    fn parse(self, field: String) -> std::result::Result<Value, String> {
        match self {
            Affinity::Text => Ok(Value::Text(field)),
            Affinity::Integer => {
                field
                    .parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|_| format!("invalid input for integer column: {:?}", field))
            }
            Affinity::Real => field
                .parse::<f64>()
                .map(Value::Real)
                .map_err(|_| format!("invalid input for real column: {:?}", field)),
            Affinity::Numeric => {
                if let Ok(n) = field.parse::<i64>() {
                    Ok(Value::Integer(n))
                } else if let Ok(f) = field.parse::<f64>() {
                    Ok(Value::Real(f))
                } else {
                    Ok(Value::Text(field))
                }
            }
        }
    }
}

fn column_affinities(conn: &Connection, table: &str, columns: &[String]) -> Result<Vec<Affinity>> {
    let mut stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?1)")?;
    let declared: Vec<(String, String)> = stmt
        .query_map([table], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<_, _>>()?;

    if declared.is_empty() {
        return Err(EtlError::Copy {
            table: table.to_string(),
            line: 0,
            message: "relation does not exist".to_string(),
        });
    }

    columns
        .iter()
        .map(|column| {
            declared
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(column))
                .map(|(_, decl)| Affinity::from_decl(decl))
                .ok_or_else(|| EtlError::Copy {
                    table: table.to_string(),
                    line: 0,
                    message: format!("column {:?} does not exist", column),
                })
        })
        .collect()
}

fn build_batch_sql(table: &str, columns: &[String], num_rows: usize) -> String {
    let column_list = columns
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = format!("({})", vec!["?"; columns.len()].join(","));

    let mut sql = String::with_capacity(64 + column_list.len() + num_rows * (placeholders.len() + 1));
    sql.push_str(&format!("INSERT INTO \"{}\" ({}) VALUES ", table, column_list));
    for i in 0..num_rows {
        if i > 0 {
            sql.push(',');
        }
        sql.push_str(&placeholders);
    }
    sql
}

fn execute_batch_insert(conn: &Connection, sql: &str, batch: &[Vec<Value>]) -> Result<()> {
    let mut stmt = conn.prepare_cached(sql)?;
    stmt.execute(params_from_iter(batch.iter().flatten()))?;
    Ok(())
}

/// Stream a tab-separated copy buffer into `table`, naming `columns`
/// explicitly. Empty fields become `NULL`. Runs under a savepoint so a
/// failure leaves the table untouched. Returns the number of rows copied.
pub fn copy_from<R: BufRead>(conn: &Connection, reader: R, table: &str, columns: &[String]) -> Result<usize> {
    if columns.is_empty() {
        return Err(EtlError::Copy {
            table: table.to_string(),
            line: 0,
            message: "no columns".to_string(),
        });
    }
    let affinities = column_affinities(conn, table, columns)?;

    conn.execute_batch(&format!("SAVEPOINT {}", COPY_SAVEPOINT))?;
    match copy_rows(conn, reader, table, columns, &affinities) {
        Ok(rows) => {
            conn.execute_batch(&format!("RELEASE {}", COPY_SAVEPOINT))?;
            Ok(rows)
        }
        Err(e) => {
            conn.execute_batch(&format!(
                "ROLLBACK TO {sp}; RELEASE {sp}",
                sp = COPY_SAVEPOINT
            ))?;
            Err(e)
        }
    }
}

fn copy_rows<R: BufRead>(
    conn: &Connection,
    reader: R,
    table: &str,
    columns: &[String],
    affinities: &[Affinity],
) -> Result<usize> {
    let rows_per_batch = (MAX_BATCH_PARAMS / columns.len()).max(1);
    let full_batch_sql = build_batch_sql(table, columns, rows_per_batch);

    let mut batch: Vec<Vec<Value>> = Vec::with_capacity(rows_per_batch);
    let mut copied = 0;

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|source| EtlError::Io {
            path: format!("<copy buffer for {}>", table).into(),
            source,
        })?;

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != columns.len() {
            return Err(EtlError::Copy {
                table: table.to_string(),
                line: line_no,
                message: format!("expected {} fields, found {}", columns.len(), fields.len()),
            });
        }

        let mut row = Vec::with_capacity(fields.len());
        for (field, affinity) in fields.into_iter().zip(affinities) {
            if field.is_empty() {
                row.push(Value::Null);
                continue;
            }
            let value = affinity
                .parse(unescape_copy_field(field))
                .map_err(|message| EtlError::Copy {
                    table: table.to_string(),
                    line: line_no,
                    message,
                })?;
            row.push(value);
        }
        batch.push(row);

        if batch.len() == rows_per_batch {
            execute_batch_insert(conn, &full_batch_sql, &batch)?;
            copied += batch.len();
            batch.clear();
        }
    }

    if !batch.is_empty() {
        let sql = build_batch_sql(table, columns, batch.len());
        execute_batch_insert(conn, &sql, &batch)?;
        copied += batch.len();
    }

    Ok(copied)
}

// ============================================================================
// Row Insert
// ============================================================================

fn positional_insert_sql(table: &str, width: usize) -> String {
    format!("INSERT INTO \"{}\" VALUES ({})", table, vec!["?"; width].join(", "))
}

fn insert_rows(conn: &Connection, table: &Table) -> LoadOutcome {
    let sql = schema::insert_statement(&table.name)
        .map(str::to_string)
        .unwrap_or_else(|| positional_insert_sql(&table.name, table.columns.len()));

    let pb = progress_bar(table.len(), &format!("Inserting {}", table.name));

    let result = (|| -> Result<usize> {
        let mut stmt = conn.prepare_cached(&sql)?;
        for row in &table.rows {
            stmt.execute(params_from_iter(row.iter()))?;
            pb.inc(1);
        }
        Ok(table.len())
    })();

    match result {
        Ok(rows) => {
            pb.finish_with_message(format!("Inserted {} rows into {}", rows, table.name));
            info!("Success: inserted {} rows into {} table", rows, table.name);
            LoadOutcome::Loaded { rows }
        }
        Err(e) => {
            pb.abandon_with_message(format!("Insert into {} failed", table.name));
            error!("Error: inserting row into {} table: {}", table.name, e);
            LoadOutcome::Failed {
                reason: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Artist, Song};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        conn
    }

    fn song(id: &str, title: &str, year: i64) -> Song {
        Song {
            song_id: id.to_string(),
            title: title.to_string(),
            artist_id: "A1".to_string(),
            year,
            duration: 200.5,
        }
    }

    fn read_songs(conn: &Connection) -> Vec<(String, String, String, i64, f64)> {
        let mut stmt = conn
            .prepare("SELECT song_id, title, artist_id, year, duration FROM songs ORDER BY rowid")
            .unwrap();
        stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
        })
        .unwrap()
        .collect::<std::result::Result<_, _>>()
        .unwrap()
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_copy_buffer_format() {
        let table = Table::from_rows(vec![Artist {
            artist_id: "A1".to_string(),
            name: "Tab\tName\\".to_string(),
            location: None,
            latitude: Some(1.5),
            longitude: None,
        }]);
        let mut buffer = Vec::new();
        write_copy_buffer(&table, &mut buffer).unwrap();
        assert_eq!(String::from_utf8(buffer).unwrap(), "A1\tTab\\tName\\\\\t\t1.5\t\n");
    }

    #[test]
    fn test_unescape_inverts_escape() {
        let original = "line\nbreak\ttab\\slash\rcr";
        assert_eq!(unescape_copy_field(&escape_copy_field(original)), original);
    }

    #[test]
    fn test_bulk_songs_read_back_in_order() {
        let conn = setup();
        let songs = vec![song("S2", "Second", 1999), song("S1", "First", 0), song("S3", "00123", 2005)];
        let outcome = upload_table(&conn, &Table::from_rows(songs.clone()), LoadMode::Bulk);
        assert_eq!(outcome, LoadOutcome::Loaded { rows: 3 });

        let expected: Vec<_> = songs
            .into_iter()
            .map(|s| (s.song_id, s.title, s.artist_id, s.year, s.duration))
            .collect();
        assert_eq!(read_songs(&conn), expected);
    }

    #[test]
    fn test_bulk_null_round_trip() {
        let conn = setup();
        let table = Table::from_rows(vec![Artist {
            artist_id: "A1".to_string(),
            name: "Artist1".to_string(),
            location: None,
            latitude: None,
            longitude: Some(-2.25),
        }]);
        assert!(upload_table(&conn, &table, LoadMode::Bulk).is_loaded());

        let (location, latitude, longitude): (Option<String>, Option<f64>, Option<f64>) = conn
            .query_row("SELECT location, latitude, longitude FROM artists", [], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .unwrap();
        assert_eq!(location, None);
        assert_eq!(latitude, None);
        assert_eq!(longitude, Some(-2.25));
    }

    #[test]
    fn test_bulk_spans_multiple_batches() {
        let conn = setup();
        let songs: Vec<Song> = (0..500).map(|i| song(&format!("S{}", i), "T", 2000)).collect();
        let outcome = upload_table(&conn, &Table::from_rows(songs), LoadMode::Bulk);
        assert_eq!(outcome, LoadOutcome::Loaded { rows: 500 });
        assert_eq!(count(&conn, "songs"), 500);
    }

    #[test]
    fn test_bulk_failure_rolls_back_whole_table() {
        let conn = setup();
        let songs = vec![song("S1", "One", 2000), song("S1", "Duplicate", 2001)];
        let outcome = upload_table(&conn, &Table::from_rows(songs), LoadMode::Bulk);
        assert!(matches!(outcome, LoadOutcome::Failed { .. }));
        assert_eq!(count(&conn, "songs"), 0);
    }

    #[test]
    fn test_bulk_unknown_table_fails() {
        let conn = setup();
        let table = Table::new("tracks", vec!["id".to_string()], vec![vec![Value::Integer(1)]]);
        let outcome = upload_table(&conn, &table, LoadMode::Bulk);
        assert!(matches!(outcome, LoadOutcome::Failed { .. }));
    }

    #[test]
    fn test_copy_from_rejects_bad_integer() {
        let conn = setup();
        let columns: Vec<String> = ["song_id", "year"].iter().map(|c| c.to_string()).collect();
        let result = copy_from(&conn, "S1\tlast year\n".as_bytes(), "songs", &columns);
        assert!(matches!(result, Err(EtlError::Copy { line: 1, .. })));
    }

    #[test]
    fn test_row_insert_stops_at_first_failure() {
        let conn = setup();
        let songs = vec![song("S1", "One", 2000), song("S1", "Duplicate", 2001), song("S2", "Two", 2002)];
        let outcome = upload_table(&conn, &Table::from_rows(songs), LoadMode::RowInsert);
        assert!(matches!(outcome, LoadOutcome::Failed { .. }));
        // Rows before the failing one stay, rows after it are never attempted
        assert_eq!(count(&conn, "songs"), 1);
    }

    #[test]
    fn test_row_insert_success() {
        let conn = setup();
        let songs = vec![song("S1", "One", 2000), song("S2", "Two", 2002)];
        let outcome = upload_table(&conn, &Table::from_rows(songs.clone()), LoadMode::RowInsert);
        assert_eq!(outcome, LoadOutcome::Loaded { rows: 2 });
        assert_eq!(read_songs(&conn).len(), 2);
    }

    #[test]
    fn test_ragged_table_is_skipped() {
        let conn = setup();
        let table = Table::new(
            "songs",
            vec!["song_id".to_string(), "title".to_string()],
            vec![vec![Value::Text("S1".to_string())]],
        );
        for mode in [LoadMode::Bulk, LoadMode::RowInsert] {
            let outcome = upload_table(&conn, &table, mode);
            assert!(matches!(outcome, LoadOutcome::Skipped { .. }));
        }
        assert_eq!(count(&conn, "songs"), 0);
    }

    #[test]
    fn test_copy_from_without_columns() {
        let conn = setup();
        let result = copy_from(&conn, "".as_bytes(), "songs", &[]);
        assert!(matches!(result, Err(EtlError::Copy { line: 0, .. })));
        assert_eq!(count(&conn, "songs"), 0);
    }

    #[test]
    fn test_integer_column_rejects_non_integer_text() {
        assert_eq!(Affinity::Integer.parse("2000".to_string()), Ok(Value::Integer(2000)));
        assert!(Affinity::Integer.parse("2000.0".to_string()).is_err());
        assert!(Affinity::Integer.parse("1e30".to_string()).is_err());
        assert!(Affinity::Integer.parse("99999999999999999999".to_string()).is_err());
    }

    #[test]
    fn test_copy_from_rejects_float_for_integer() {
        let conn = setup();
        let columns: Vec<String> = ["song_id", "year"].iter().map(|c| c.to_string()).collect();
        let result = copy_from(&conn, "S1\t2000.0\n".as_bytes(), "songs", &columns);
        assert!(matches!(result, Err(EtlError::Copy { line: 1, .. })));
        assert_eq!(count(&conn, "songs"), 0);
    }

    #[test]
    fn test_affinity_from_decl() {
        assert_eq!(Affinity::from_decl("INTEGER"), Affinity::Integer);
        assert_eq!(Affinity::from_decl("VARCHAR"), Affinity::Text);
        assert_eq!(Affinity::from_decl("REAL"), Affinity::Real);
        assert_eq!(Affinity::from_decl("TIMESTAMP"), Affinity::Numeric);
    }
}
