//! User activity transform: `time` and `users` dimensions and the
//! `songplays` fact table.
//!
//! Only `NextSong` events are song plays; everything else in the logs is
//! navigation and is dropped up front. Songplays are linked to the artist and
//! song dimensions already in the database by exact text equality on the
//! artist name and song title. A miss leaves the foreign key `NULL`.

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike};
use rusqlite::Connection;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::info;

use crate::error::{EtlError, Result};
use crate::load::{upload_table, LoadMode, Table};
use crate::models::{LinkStats, LogEvent, Songplay, TimeBucket, User};
use crate::schema::{ARTIST_LOOKUP_SELECT, SONG_LOOKUP_SELECT};

/// A `NextSong` event with its decoded timestamp.
#[derive(Clone, Debug)]
pub struct SongPlay<'a> {
    pub event: &'a LogEvent,
    pub start_time: NaiveDateTime,
}

/// Milliseconds since the Unix epoch to a UTC timestamp.
pub fn event_time(ts: i64) -> Result<NaiveDateTime> {
    DateTime::from_timestamp_millis(ts)
        .map(|dt| dt.naive_utc())
        .ok_or(EtlError::Timestamp(ts))
}

pub fn song_plays(events: &[LogEvent]) -> Result<Vec<SongPlay<'_>>> {
    events
        .iter()
        .filter(|e| e.is_song_play())
        .map(|event| {
            Ok(SongPlay {
                event,
                start_time: event_time(event.ts)?,
            })
        })
        .collect()
}

pub fn time_bucket(start_time: NaiveDateTime) -> TimeBucket {
    TimeBucket {
        start_time,
        hour: start_time.hour(),
        day: start_time.day(),
        week: start_time.iso_week().week(),
        month: start_time.month(),
        year: start_time.year(),
    }
}

/// One bucket per distinct start time, first occurrence order.
pub fn time_rows(plays: &[SongPlay<'_>]) -> Vec<TimeBucket> {
    let mut seen: FxHashSet<NaiveDateTime> = FxHashSet::default();
    plays
        .iter()
        .filter(|p| seen.insert(p.start_time))
        .map(|p| time_bucket(p.start_time))
        .collect()
}

/// One row per user, attributes taken from the user's latest event.
///
/// Plays are stably sorted by `ts` and the last occurrence of each
/// `user_id` is kept, so a free→paid upgrade ends up as `paid`. Events
/// without a user id cannot key a row and are skipped.
pub fn user_rows(plays: &[SongPlay<'_>]) -> Vec<User> {
    let mut ordered: Vec<(i64, &LogEvent)> = plays
        .iter()
        .filter_map(|p| p.event.user_id.map(|_| (p.event.ts, p.event)))
        .collect();
    ordered.sort_by_key(|(ts, _)| *ts);

    let mut seen: FxHashSet<i64> = FxHashSet::default();
    let mut users: Vec<User> = ordered
        .into_iter()
        .rev()
        .filter_map(|(_, e)| {
            let user_id = e.user_id?;
            seen.insert(user_id).then(|| User {
                user_id,
                first_name: e.first_name.clone(),
                last_name: e.last_name.clone(),
                gender: e.gender.clone(),
                level: e.level.clone(),
            })
        })
        .collect();
    users.reverse();
    users
}

/// Exact-key lookups into the artist and song dimensions.
#[derive(Default, Debug, Clone)]
pub struct DimensionLookup {
    artist_ids: FxHashMap<String, String>,
    song_ids: FxHashMap<String, String>,
}

impl DimensionLookup {
    /// Read `artists(artist_id, name)` and `songs(song_id, title)` once.
    /// When a name or title appears more than once, the earliest row wins.
    pub fn fetch(conn: &Connection) -> Result<Self> {
        let mut lookup = Self::default();

        let mut stmt = conn.prepare(ARTIST_LOOKUP_SELECT)?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let artist_id: String = row.get(0)?;
            let name: Option<String> = row.get(1)?;
            if let Some(name) = name {
                lookup.add_artist(name, artist_id);
            }
        }

        let mut stmt = conn.prepare(SONG_LOOKUP_SELECT)?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let song_id: String = row.get(0)?;
            let title: Option<String> = row.get(1)?;
            if let Some(title) = title {
                lookup.add_song(title, song_id);
            }
        }

        info!(
            "Dimension lookup: {} artist names, {} song titles",
            lookup.artist_ids.len(),
            lookup.song_ids.len()
        );
        Ok(lookup)
    }

    pub fn add_artist(&mut self, name: String, artist_id: String) {
        self.artist_ids.entry(name).or_insert(artist_id);
    }

    pub fn add_song(&mut self, title: String, song_id: String) {
        self.song_ids.entry(title).or_insert(song_id);
    }

    pub fn artist_id(&self, name: &str) -> Option<&str> {
        self.artist_ids.get(name).map(String::as_str)
    }

    pub fn song_id(&self, title: &str) -> Option<&str> {
        self.song_ids.get(title).map(String::as_str)
    }
}

/// One songplay per play. `artist_id` is set when the artist name matches;
/// `song_id` only when both the artist name and the song title match.
pub fn songplay_rows(plays: &[SongPlay<'_>], lookup: &DimensionLookup) -> (Vec<Songplay>, LinkStats) {
    let mut stats = LinkStats {
        song_plays: plays.len(),
        ..LinkStats::default()
    };

    let rows: Vec<Songplay> = plays
        .iter()
        .map(|p| {
            let e = p.event;
            let artist_id = e.artist.as_deref().and_then(|a| lookup.artist_id(a));
            let song_id = artist_id
                .and(e.song.as_deref())
                .and_then(|s| lookup.song_id(s));

            if artist_id.is_some() {
                stats.artist_matches += 1;
            }
            if song_id.is_some() {
                stats.song_matches += 1;
            }

            Songplay {
                start_time: p.start_time,
                user_id: e.user_id,
                level: e.level.clone(),
                song_id: song_id.map(str::to_string),
                artist_id: artist_id.map(str::to_string),
                session_id: e.session_id,
                location: e.location.clone(),
                user_agent: e.user_agent.clone(),
            }
        })
        .collect();

    (rows, stats)
}

/// Build and load the `time`, `users` and `songplays` tables. The artist
/// and song dimensions must already be in the database.
pub fn process_logs(conn: &Connection, events: &[LogEvent], mode: LoadMode) -> Result<()> {
    let plays = song_plays(events)?;
    info!("Log data: {} events, {} song plays", events.len(), plays.len());

    let time = time_rows(&plays);
    let users = user_rows(&plays);

    let lookup = DimensionLookup::fetch(conn)?;
    let (songplays, stats) = songplay_rows(&plays, &lookup);
    info!(
        "Linked {}/{} song plays to songs ({:.1}%), {} to artists",
        stats.song_matches,
        stats.song_plays,
        stats.match_rate(),
        stats.artist_matches
    );

    upload_table(conn, &Table::from_rows(time), mode);
    upload_table(conn, &Table::from_rows(users), mode);
    upload_table(conn, &Table::from_rows(songplays), mode);
    Ok(())
}
