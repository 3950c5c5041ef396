use kioku_core::error::KiokuError;
use kioku_core::model::MemoryEntry;
use rusqlite::{params, Connection};
use std::path::Path;
use tokio::sync::Mutex;

/// Ordering column for `get_timeline` (§4.2/§4.3): `ProcessingTime` orders
/// by when the entry was recorded, `EventTime` by the date the extractor
/// parsed out of its text (ported from `server.py`'s `sort_by` parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineSort {
    ProcessingTime,
    EventTime,
}

impl Default for TimelineSort {
    fn default() -> Self {
        TimelineSort::ProcessingTime
    }
}

impl TimelineSort {
    fn column(self) -> &'static str {
        match self {
            TimelineSort::ProcessingTime => "date",
            TimelineSort::EventTime => "event_date",
        }
    }
}

/// One row's worth of hydrated content, keyed by content hash — used both
/// as a lexical search hit and as the hydration source for vector/graph
/// leg results (§4.2).
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    pub content_hash: String,
    pub text: String,
    pub date: String,
    pub timestamp: String,
    pub mood: Option<String>,
    pub tags: Vec<String>,
    pub event_date: Option<String>,
    pub score: f32,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS memories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content_hash TEXT UNIQUE NOT NULL,
    text TEXT NOT NULL,
    date TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    mood TEXT,
    tags TEXT NOT NULL DEFAULT '',
    event_date TEXT
);
CREATE VIRTUAL TABLE IF NOT EXISTS memory_fts USING fts5(
    text,
    content = 'memories',
    content_rowid = 'id'
);
CREATE TRIGGER IF NOT EXISTS memories_ai AFTER INSERT ON memories BEGIN
    INSERT INTO memory_fts(rowid, text) VALUES (new.id, new.text);
END;
";

/// Lexical full-text index, backed by SQLite FTS5 over a plain metadata
/// table (mirroring `original_source`'s `memories`/`memory_fts` split, so
/// date/timeline queries run against ordinary indexed columns instead of
/// FTS5's unindexed ones). The teacher has no embedded relational store of
/// its own; `rusqlite` is the one dependency added outside its stack (see
/// DESIGN.md).
pub struct KeywordIndex {
    conn: Mutex<Connection>,
}

impl KeywordIndex {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KiokuError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| KiokuError::Backend(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(|e| KiokuError::Backend(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| KiokuError::Backend(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, KiokuError> {
        let conn = Connection::open_in_memory().map_err(|e| KiokuError::Backend(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| KiokuError::Backend(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Idempotent on `content_hash`: inserting the same hash twice is a
    /// no-op (invariant: keyword insert is idempotent, §4.1).
    pub async fn index(&self, entry: &MemoryEntry) -> Result<(), KiokuError> {
        let conn = self.conn.lock().await;
        let hash = entry.content_hash.as_str();

        let exists: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memories WHERE content_hash = ?1",
                params![hash],
                |row| row.get(0),
            )
            .map_err(|e| KiokuError::Backend(e.to_string()))?;
        if exists > 0 {
            return Ok(());
        }

        conn.execute(
            "INSERT INTO memories (content_hash, text, date, timestamp, mood, tags, event_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                hash,
                entry.text,
                entry.processing_date,
                entry.timestamp,
                entry.mood,
                entry.tags.join(","),
                entry.event_date,
            ],
        )
        .map_err(|e| KiokuError::Backend(e.to_string()))?;

        Ok(())
    }

    /// BM25 rank, normalized into `[0, 1]` relative to the best match in
    /// the result set (ported from `search/bm25.py::bm25_search`).
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<KeywordHit>, KiokuError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT m.content_hash, m.text, m.date, m.timestamp, m.mood, m.tags,
                        m.event_date, bm25(memory_fts) AS rank
                 FROM memory_fts
                 JOIN memories m ON m.id = memory_fts.rowid
                 WHERE memory_fts MATCH ?1
                 ORDER BY rank LIMIT ?2",
            )
            .map_err(|e| KiokuError::Backend(e.to_string()))?;

        let rows = stmt
            .query_map(params![fts_query(query), limit as i64], row_to_search_tuple)
            .map_err(|e| KiokuError::Backend(e.to_string()))?;

        let mut hits = Vec::new();
        for row in rows {
            let (content_hash, text, date, timestamp, mood, tags_raw, event_date, rank) =
                row.map_err(|e| KiokuError::Backend(e.to_string()))?;
            // FTS5 bm25() returns lower-is-better; negate so higher is better.
            hits.push((
                content_hash,
                text,
                date,
                timestamp,
                mood,
                tags_raw,
                event_date,
                -rank as f32,
            ));
        }

        let max_score = hits
            .iter()
            .map(|h| h.7)
            .fold(f32::MIN, f32::max)
            .max(f32::EPSILON);

        Ok(hits
            .into_iter()
            .map(
                |(content_hash, text, date, timestamp, mood, tags_raw, event_date, score)| {
                    KeywordHit {
                        content_hash,
                        text,
                        date,
                        timestamp,
                        mood,
                        tags: split_tags(&tags_raw),
                        event_date,
                        score: (score / max_score).max(0.0),
                    }
                },
            )
            .collect())
    }

    pub async fn get_by_hash(&self, hash: &str) -> Result<Option<KeywordHit>, KiokuError> {
        let conn = self.conn.lock().await;
        let result = conn.query_row(
            "SELECT content_hash, text, date, timestamp, mood, tags, event_date
             FROM memories WHERE content_hash = ?1",
            params![hash],
            row_to_hit_tuple,
        );
        Self::one_or_none(result)
    }

    /// All entries for a single processing date, oldest-first.
    pub async fn get_by_date(&self, date: &str) -> Result<Vec<KeywordHit>, KiokuError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT content_hash, text, date, timestamp, mood, tags, event_date
                 FROM memories WHERE date = ?1 ORDER BY timestamp ASC",
            )
            .map_err(|e| KiokuError::Backend(e.to_string()))?;
        let rows = stmt
            .query_map(params![date], row_to_hit_tuple)
            .map_err(|e| KiokuError::Backend(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| KiokuError::Backend(e.to_string()))?);
        }
        Ok(out)
    }

    /// Every date with at least one entry, ascending.
    pub async fn get_dates(&self) -> Result<Vec<String>, KiokuError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT DISTINCT date FROM memories ORDER BY date ASC")
            .map_err(|e| KiokuError::Backend(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| KiokuError::Backend(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| KiokuError::Backend(e.to_string()))?);
        }
        Ok(out)
    }

    /// The most recent `limit` entries within `[start_date, end_date]`
    /// (inclusive, `YYYY-MM-DD`), ordered by `sort_by`, then reversed to
    /// chronological order within that slice (§4.2): selecting the window
    /// requires ranking newest-first so a date-unbounded timeline on a
    /// store larger than `limit` still returns the most recent rows, not
    /// the oldest.
    pub async fn get_timeline(
        &self,
        start_date: Option<&str>,
        end_date: Option<&str>,
        limit: usize,
        sort_by: TimelineSort,
    ) -> Result<Vec<KeywordHit>, KiokuError> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT content_hash, text, date, timestamp, mood, tags, event_date
             FROM memories
             WHERE (:start IS NULL OR date >= :start)
               AND (:end IS NULL OR date <= :end)
             ORDER BY {col} DESC, timestamp DESC
             LIMIT :limit",
            col = sort_by.column(),
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| KiokuError::Backend(e.to_string()))?;

        let rows = stmt
            .query_map(
                rusqlite::named_params! {
                    ":start": start_date,
                    ":end": end_date,
                    ":limit": limit as i64,
                },
                row_to_hit_tuple,
            )
            .map_err(|e| KiokuError::Backend(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| KiokuError::Backend(e.to_string()))?);
        }
        out.reverse();
        Ok(out)
    }

    pub async fn count(&self) -> Result<usize, KiokuError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
            .map_err(|e| KiokuError::Backend(e.to_string()))?;
        Ok(count as usize)
    }

    fn one_or_none(
        result: rusqlite::Result<KeywordHit>,
    ) -> Result<Option<KeywordHit>, KiokuError> {
        match result {
            Ok(hit) => Ok(Some(hit)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(KiokuError::Backend(e.to_string())),
        }
    }
}

type SearchRow = (String, String, String, String, Option<String>, String, Option<String>, f64);

fn row_to_search_tuple(row: &rusqlite::Row) -> rusqlite::Result<SearchRow> {
    Ok((
        row.get::<_, String>(0)?,
        row.get::<_, String>(1)?,
        row.get::<_, String>(2)?,
        row.get::<_, String>(3)?,
        row.get::<_, Option<String>>(4)?,
        row.get::<_, String>(5)?,
        row.get::<_, Option<String>>(6)?,
        row.get::<_, f64>(7)?,
    ))
}

fn row_to_hit_tuple(row: &rusqlite::Row) -> rusqlite::Result<KeywordHit> {
    Ok(KeywordHit {
        content_hash: row.get(0)?,
        text: row.get(1)?,
        date: row.get(2)?,
        timestamp: row.get(3)?,
        mood: row.get(4)?,
        tags: split_tags(&row.get::<_, String>(5)?),
        event_date: row.get(6)?,
        score: 1.0,
    })
}

fn split_tags(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        Vec::new()
    } else {
        raw.split(',').map(|s| s.to_string()).collect()
    }
}

/// FTS5 treats bare input as a match expression; quote it so punctuation
/// in free-text queries doesn't trip the query parser.
fn fts_query(query: &str) -> String {
    let escaped = query.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(text: &str) -> MemoryEntry {
        MemoryEntry::new(text, "2024-01-01T09:00:00+07:00", "2024-01-01", None, None, vec![])
    }

    #[tokio::test]
    async fn index_then_search_finds_matching_text() {
        let index = KeywordIndex::open_in_memory().unwrap();
        index.index(&entry("walked the dog in the park")).await.unwrap();
        index.index(&entry("ate breakfast at a cafe")).await.unwrap();

        let hits = index.search("dog", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text.contains("dog"));
    }

    #[tokio::test]
    async fn index_is_idempotent_on_same_content_hash() {
        let index = KeywordIndex::open_in_memory().unwrap();
        let e = entry("same text twice");
        index.index(&e).await.unwrap();
        index.index(&e).await.unwrap();

        let hits = index.search("text", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn get_by_hash_returns_none_for_unknown_hash() {
        let index = KeywordIndex::open_in_memory().unwrap();
        let missing = index.get_by_hash("deadbeef").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn get_dates_and_timeline_are_chronological() {
        let index = KeywordIndex::open_in_memory().unwrap();
        let mut e1 = entry("day one");
        e1.processing_date = "2024-01-01".to_string();
        let mut e2 = entry("day two");
        e2.processing_date = "2024-01-02".to_string();
        e2.content_hash = kioku_core::model::ContentHash::of("day two distinct");

        index.index(&e1).await.unwrap();
        index.index(&e2).await.unwrap();

        assert_eq!(
            index.get_dates().await.unwrap(),
            vec!["2024-01-01".to_string(), "2024-01-02".to_string()]
        );

        let timeline = index
            .get_timeline(None, None, 10, TimelineSort::ProcessingTime)
            .await
            .unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].date, "2024-01-01");
        assert_eq!(timeline[1].date, "2024-01-02");
    }

    #[tokio::test]
    async fn get_timeline_returns_most_recent_slice_when_over_limit() {
        let index = KeywordIndex::open_in_memory().unwrap();
        for (i, date) in ["2024-01-01", "2024-01-02", "2024-01-03"].iter().enumerate() {
            let mut e = entry(&format!("entry {}", i));
            e.processing_date = date.to_string();
            e.content_hash = kioku_core::model::ContentHash::of(&format!("entry {} distinct", i));
            index.index(&e).await.unwrap();
        }

        let timeline = index
            .get_timeline(None, None, 2, TimelineSort::ProcessingTime)
            .await
            .unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].date, "2024-01-02");
        assert_eq!(timeline[1].date, "2024-01-03");
    }

    #[tokio::test]
    async fn get_timeline_orders_by_event_time_when_requested() {
        let index = KeywordIndex::open_in_memory().unwrap();
        let mut e1 = entry("first");
        e1.processing_date = "2024-01-01".to_string();
        e1.event_date = Some("2024-05-01".to_string());
        e1.content_hash = kioku_core::model::ContentHash::of("first distinct");

        let mut e2 = entry("second");
        e2.processing_date = "2024-01-02".to_string();
        e2.event_date = Some("2024-02-01".to_string());
        e2.content_hash = kioku_core::model::ContentHash::of("second distinct");

        index.index(&e1).await.unwrap();
        index.index(&e2).await.unwrap();

        let timeline = index
            .get_timeline(None, None, 10, TimelineSort::EventTime)
            .await
            .unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].event_date.as_deref(), Some("2024-02-01"));
        assert_eq!(timeline[1].event_date.as_deref(), Some("2024-05-01"));
    }
}
