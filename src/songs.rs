//! Song metadata transform: `songs` and `artists` dimensions.

use rusqlite::Connection;
use rustc_hash::FxHashSet;
use tracing::info;

use crate::error::Result;
use crate::load::{upload_table, LoadMode, Table};
use crate::models::{Artist, Song, SongRecord};

/// One song row per record, fields passed through unchanged.
pub fn song_rows(records: &[SongRecord]) -> Vec<Song> {
    records
        .iter()
        .map(|r| Song {
            song_id: r.song_id.clone(),
            title: r.title.clone(),
            artist_id: r.artist_id.clone(),
            year: r.year,
            duration: r.duration,
        })
        .collect()
}

/// Artist rows deduplicated by `artist_id`; the first record seen wins.
pub fn artist_rows(records: &[SongRecord]) -> Vec<Artist> {
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    records
        .iter()
        .filter(|r| seen.insert(r.artist_id.as_str()))
        .map(|r| Artist {
            artist_id: r.artist_id.clone(),
            name: r.artist_name.clone(),
            location: r.artist_location.clone(),
            latitude: r.artist_latitude,
            longitude: r.artist_longitude,
        })
        .collect()
}

/// Build and load the `songs` and `artists` tables.
pub fn process_songs(conn: &Connection, records: &[SongRecord], mode: LoadMode) -> Result<()> {
    let songs = song_rows(records);
    let artists = artist_rows(records);
    info!(
        "Song data: {} records -> {} songs, {} artists",
        records.len(),
        songs.len(),
        artists.len()
    );

    upload_table(conn, &Table::from_rows(songs), mode);
    upload_table(conn, &Table::from_rows(artists), mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    fn record(song_id: &str, artist_id: &str, artist_name: &str) -> SongRecord {
        SongRecord {
            song_id: song_id.to_string(),
            title: format!("Title of {}", song_id),
            artist_id: artist_id.to_string(),
            year: 2000,
            duration: 200.0,
            artist_name: artist_name.to_string(),
            artist_location: Some("LA".to_string()),
            artist_latitude: Some(1.0),
            artist_longitude: Some(2.0),
        }
    }

    #[test]
    fn test_single_song_scenario() {
        let record: SongRecord = serde_json::from_str(
            r#"{"song_id":"S1","title":"T1","artist_id":"A1","year":2000,"duration":200.0,"artist_name":"Artist1","artist_location":"LA","artist_latitude":1.0,"artist_longitude":2.0}"#,
        )
        .unwrap();
        let records = vec![record];

        assert_eq!(
            song_rows(&records),
            vec![Song {
                song_id: "S1".to_string(),
                title: "T1".to_string(),
                artist_id: "A1".to_string(),
                year: 2000,
                duration: 200.0,
            }]
        );
        assert_eq!(
            artist_rows(&records),
            vec![Artist {
                artist_id: "A1".to_string(),
                name: "Artist1".to_string(),
                location: Some("LA".to_string()),
                latitude: Some(1.0),
                longitude: Some(2.0),
            }]
        );
    }

    #[test]
    fn test_artist_dedup_keeps_first() {
        let records = vec![
            record("S1", "A1", "First Name"),
            record("S2", "A2", "Other"),
            record("S3", "A1", "Second Name"),
        ];
        let artists = artist_rows(&records);
        assert_eq!(artists.len(), 2);
        assert_eq!(artists[0].artist_id, "A1");
        assert_eq!(artists[0].name, "First Name");
        assert_eq!(artists[1].artist_id, "A2");
        // Songs are never deduplicated
        assert_eq!(song_rows(&records).len(), 3);
    }

    #[test]
    fn test_process_songs_loads_both_tables() {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        let records = vec![record("S1", "A1", "Artist1"), record("S2", "A1", "Artist1")];

        for mode in [LoadMode::Bulk, LoadMode::RowInsert] {
            schema::reset(&conn).unwrap();
            process_songs(&conn, &records, mode).unwrap();
            let songs: i64 = conn
                .query_row("SELECT COUNT(*) FROM songs", [], |row| row.get(0))
                .unwrap();
            let artists: i64 = conn
                .query_row("SELECT COUNT(*) FROM artists", [], |row| row.get(0))
                .unwrap();
            assert_eq!((songs, artists), (2, 1), "mode {:?}", mode);
        }
    }
}
