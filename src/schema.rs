//! Table definitions and the fixed SQL used by the loader and transforms.
//!
//! ## Schema
//!
//! Dimensions `songs`, `artists`, `users`, `time` and the fact table
//! `songplays`. Positional inserts rely on the column order declared here.

use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

pub const SONGPLAY_TABLE_DROP: &str = "DROP TABLE IF EXISTS songplays";
pub const USER_TABLE_DROP: &str = "DROP TABLE IF EXISTS users";
pub const SONG_TABLE_DROP: &str = "DROP TABLE IF EXISTS songs";
pub const ARTIST_TABLE_DROP: &str = "DROP TABLE IF EXISTS artists";
pub const TIME_TABLE_DROP: &str = "DROP TABLE IF EXISTS time";

pub const SONGPLAY_TABLE_CREATE: &str = "
    CREATE TABLE IF NOT EXISTS songplays (
        songplay_id INTEGER PRIMARY KEY,
        start_time TIMESTAMP NOT NULL,
        user_id INTEGER NOT NULL,
        level VARCHAR NOT NULL,
        song_id VARCHAR,
        artist_id VARCHAR,
        session_id INTEGER NOT NULL,
        location VARCHAR,
        user_agent VARCHAR
    )";

pub const USER_TABLE_CREATE: &str = "
    CREATE TABLE IF NOT EXISTS users (
        user_id INTEGER PRIMARY KEY,
        first_name VARCHAR,
        last_name VARCHAR,
        gender CHAR,
        level VARCHAR NOT NULL
    )";

pub const SONG_TABLE_CREATE: &str = "
    CREATE TABLE IF NOT EXISTS songs (
        song_id VARCHAR PRIMARY KEY,
        title VARCHAR,
        artist_id VARCHAR,
        year INTEGER CHECK (year >= 0),
        duration REAL CHECK (duration >= 0)
    )";

pub const ARTIST_TABLE_CREATE: &str = "
    CREATE TABLE IF NOT EXISTS artists (
        artist_id VARCHAR PRIMARY KEY,
        name VARCHAR,
        location VARCHAR,
        latitude REAL,
        longitude REAL
    )";

pub const TIME_TABLE_CREATE: &str = "
    CREATE TABLE IF NOT EXISTS time (
        start_time TIMESTAMP PRIMARY KEY,
        hour INTEGER NOT NULL CHECK (hour BETWEEN 0 AND 24),
        day INTEGER NOT NULL CHECK (day BETWEEN 1 AND 31),
        week INTEGER NOT NULL CHECK (week BETWEEN 1 AND 53),
        month INTEGER NOT NULL CHECK (month BETWEEN 1 AND 12),
        year INTEGER NOT NULL CHECK (year >= 0)
    )";

// NULL lets SQLite assign the serial songplay_id
pub const SONGPLAY_TABLE_INSERT: &str = "INSERT INTO songplays VALUES (NULL, ?, ?, ?, ?, ?, ?, ?, ?)";
pub const USER_TABLE_INSERT: &str = "INSERT INTO users VALUES (?, ?, ?, ?, ?)";
pub const SONG_TABLE_INSERT: &str = "INSERT INTO songs VALUES (?, ?, ?, ?, ?)";
pub const ARTIST_TABLE_INSERT: &str = "INSERT INTO artists VALUES (?, ?, ?, ?, ?)";
pub const TIME_TABLE_INSERT: &str = "INSERT INTO time VALUES (?, ?, ?, ?, ?, ?)";

pub const ARTIST_LOOKUP_SELECT: &str = "SELECT artist_id, name FROM artists ORDER BY rowid";
pub const SONG_LOOKUP_SELECT: &str = "SELECT song_id, title FROM songs ORDER BY rowid";

pub const CREATE_TABLE_QUERIES: [&str; 5] = [
    TIME_TABLE_CREATE,
    ARTIST_TABLE_CREATE,
    SONG_TABLE_CREATE,
    USER_TABLE_CREATE,
    SONGPLAY_TABLE_CREATE,
];

pub const DROP_TABLE_QUERIES: [&str; 5] = [
    SONGPLAY_TABLE_DROP,
    USER_TABLE_DROP,
    SONG_TABLE_DROP,
    ARTIST_TABLE_DROP,
    TIME_TABLE_DROP,
];

/// Positional insert statement for a table, if it is one of ours.
pub fn insert_statement(table: &str) -> Option<&'static str> {
    match table {
        "songplays" => Some(SONGPLAY_TABLE_INSERT),
        "users" => Some(USER_TABLE_INSERT),
        "songs" => Some(SONG_TABLE_INSERT),
        "artists" => Some(ARTIST_TABLE_INSERT),
        "time" => Some(TIME_TABLE_INSERT),
        _ => None,
    }
}

pub fn create_tables(conn: &Connection) -> Result<()> {
    for query in CREATE_TABLE_QUERIES {
        conn.execute(query, [])?;
    }
    Ok(())
}

pub fn drop_tables(conn: &Connection) -> Result<()> {
    for query in DROP_TABLE_QUERIES {
        conn.execute(query, [])?;
    }
    Ok(())
}

/// Drop and recreate all five tables.
pub fn reset(conn: &Connection) -> Result<()> {
    drop_tables(conn)?;
    create_tables(conn)?;
    info!("Schema reset: {} tables recreated", CREATE_TABLE_QUERIES.len());
    Ok(())
}
