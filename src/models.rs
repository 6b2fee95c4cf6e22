//! Core data models for the songplay ETL.
//!
//! Raw input records are deserialized straight into typed structs so that a
//! malformed line fails at parse time instead of deep inside a transform.
//! Output rows map one-to-one onto the five database tables.

use chrono::NaiveDateTime;
use rusqlite::types::Value;
use serde::{Deserialize, Deserializer};

/// Text form of every timestamp written to the database.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

// ============================================================================
// Raw Input Records
// ============================================================================

/// One line of a song metadata file.
#[derive(Clone, Debug, Deserialize)]
pub struct SongRecord {
    pub song_id: String,
    pub title: String,
    pub artist_id: String,
    pub year: i64,
    pub duration: f64,
    pub artist_name: String,
    #[serde(default)]
    pub artist_location: Option<String>,
    #[serde(default)]
    pub artist_latitude: Option<f64>,
    #[serde(default)]
    pub artist_longitude: Option<f64>,
}

/// One line of a user activity log file.
///
/// Only `page`, `ts`, `level` and `sessionId` are mandatory; the remaining
/// fields are absent or null for logged-out and navigation events. Fields
/// that nothing loads (`auth`, `method`, `status`, ...) are ignored.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub page: String,
    pub ts: i64,
    #[serde(default, deserialize_with = "deserialize_user_id")]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    pub level: String,
    #[serde(default)]
    pub song: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    pub session_id: i64,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl LogEvent {
    /// Page value marking an actual song play.
    pub const NEXT_SONG: &'static str = "NextSong";

    pub fn is_song_play(&self) -> bool {
        self.page == Self::NEXT_SONG
    }
}

/// Log files carry `userId` as a string ("39") and use "" for logged-out
/// users; accept integers too.
fn deserialize_user_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Int(i64),
        Text(String),
    }

    match Option::<RawId>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawId::Int(id)) => Ok(Some(id)),
        Some(RawId::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(RawId::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid userId: {:?}", s))),
    }
}

// ============================================================================
// Output Rows
// ============================================================================

/// A typed row that knows which table it belongs to and how to flatten
/// itself into SQL values in declared column order.
pub trait IntoRow {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];

    fn into_row(self) -> Vec<Value>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct Song {
    pub song_id: String,
    pub title: String,
    pub artist_id: String,
    pub year: i64,
    pub duration: f64,
}

impl IntoRow for Song {
    const TABLE: &'static str = "songs";
    const COLUMNS: &'static [&'static str] = &["song_id", "title", "artist_id", "year", "duration"];

    fn into_row(self) -> Vec<Value> {
        vec![
            self.song_id.into(),
            self.title.into(),
            self.artist_id.into(),
            self.year.into(),
            self.duration.into(),
        ]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Artist {
    pub artist_id: String,
    pub name: String,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl IntoRow for Artist {
    const TABLE: &'static str = "artists";
    const COLUMNS: &'static [&'static str] = &["artist_id", "name", "location", "latitude", "longitude"];

    fn into_row(self) -> Vec<Value> {
        vec![
            self.artist_id.into(),
            self.name.into(),
            self.location.into(),
            self.latitude.into(),
            self.longitude.into(),
        ]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct User {
    pub user_id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub level: String,
}

impl IntoRow for User {
    const TABLE: &'static str = "users";
    const COLUMNS: &'static [&'static str] = &["user_id", "first_name", "last_name", "gender", "level"];

    fn into_row(self) -> Vec<Value> {
        vec![
            self.user_id.into(),
            self.first_name.into(),
            self.last_name.into(),
            self.gender.into(),
            self.level.into(),
        ]
    }
}

/// Calendar breakdown of one song-play timestamp. `week` is the ISO week.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeBucket {
    pub start_time: NaiveDateTime,
    pub hour: u32,
    pub day: u32,
    pub week: u32,
    pub month: u32,
    pub year: i32,
}

impl IntoRow for TimeBucket {
    const TABLE: &'static str = "time";
    const COLUMNS: &'static [&'static str] = &["start_time", "hour", "day", "week", "month", "year"];

    fn into_row(self) -> Vec<Value> {
        vec![
            format_timestamp(&self.start_time).into(),
            i64::from(self.hour).into(),
            i64::from(self.day).into(),
            i64::from(self.week).into(),
            i64::from(self.month).into(),
            i64::from(self.year).into(),
        ]
    }
}

/// Fact row. `songplay_id` is a serial column assigned by the database and
/// is not part of the loaded columns.
#[derive(Clone, Debug, PartialEq)]
pub struct Songplay {
    pub start_time: NaiveDateTime,
    pub user_id: Option<i64>,
    pub level: String,
    pub song_id: Option<String>,
    pub artist_id: Option<String>,
    pub session_id: i64,
    pub location: Option<String>,
    pub user_agent: Option<String>,
}

impl IntoRow for Songplay {
    const TABLE: &'static str = "songplays";
    const COLUMNS: &'static [&'static str] = &[
        "start_time",
        "user_id",
        "level",
        "song_id",
        "artist_id",
        "session_id",
        "location",
        "user_agent",
    ];

    fn into_row(self) -> Vec<Value> {
        vec![
            format_timestamp(&self.start_time).into(),
            self.user_id.into(),
            self.level.into(),
            self.song_id.into(),
            self.artist_id.into(),
            self.session_id.into(),
            self.location.into(),
            self.user_agent.into(),
        ]
    }
}

// ============================================================================
// Statistics (Instrumentation)
// ============================================================================

/// How many song plays could be linked to the artist and song dimensions.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct LinkStats {
    pub song_plays: usize,
    pub artist_matches: usize,
    pub song_matches: usize,
}

impl LinkStats {
    /// Percentage of song plays with a resolved song_id
    pub fn match_rate(&self) -> f64 {
        if self.song_plays == 0 {
            0.0
        } else {
            100.0 * self.song_matches as f64 / self.song_plays as f64
        }
    }
}
