use kioku_core::error::KiokuError;
use kioku_core::model::MemoryEntry;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Append-only, human-readable write log, one file per processing date.
/// This is the recovery anchor of the write path: every other store can
/// be rebuilt from it, so a failed append is always surfaced (§7).
pub struct MarkdownLog {
    dir: PathBuf,
}

impl MarkdownLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_path(&self, date: &str) -> PathBuf {
        self.dir.join(format!("{}.md", date))
    }

    /// Appends `entry` to the file for its `processing_date`, creating the
    /// file (with a date header) on first write of the day.
    pub async fn append(&self, entry: &MemoryEntry) -> Result<(), KiokuError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| KiokuError::MarkdownAppend(e.to_string()))?;

        let path = self.file_path(&entry.processing_date);
        let is_new = fs::metadata(&path).await.is_err();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| KiokuError::MarkdownAppend(e.to_string()))?;

        let mut buf = String::new();
        if is_new {
            buf.push_str(&format!("# Kioku — {}\n", entry.processing_date));
        }

        buf.push_str("\n---\n");
        buf.push_str(&format!("time: \"{}\"\n", entry.timestamp));
        if let Some(mood) = &entry.mood {
            buf.push_str(&format!("mood: \"{}\"\n", mood));
        }
        if !entry.tags.is_empty() {
            let tags_repr = entry
                .tags
                .iter()
                .map(|t| format!("'{}'", t))
                .collect::<Vec<_>>()
                .join(", ");
            buf.push_str(&format!("tags: [{}]\n", tags_repr));
        }
        if let Some(event_date) = &entry.event_date {
            buf.push_str(&format!("event_time: \"{}\"\n", event_date));
        }
        buf.push_str("---\n");
        buf.push_str(&entry.text);
        buf.push('\n');

        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| KiokuError::MarkdownAppend(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| KiokuError::MarkdownAppend(e.to_string()))?;
        file.sync_all()
            .await
            .map_err(|e| KiokuError::MarkdownAppend(e.to_string()))?;

        Ok(())
    }

    /// Returns the raw markdown for a given date's file, if present.
    pub async fn read_date(&self, date: &str) -> Result<Option<String>, KiokuError> {
        match fs::read_to_string(self.file_path(date)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(KiokuError::Backend(e.to_string())),
        }
    }

    /// Parses a date's entries back out of its frontmatter-delimited body.
    pub async fn parse_entries(&self, date: &str) -> Result<Vec<ParsedEntry>, KiokuError> {
        let Some(content) = self.read_date(date).await? else {
            return Ok(Vec::new());
        };
        Ok(parse_entries(&content))
    }

    /// Lists every date with a saved entry, sorted ascending.
    pub async fn list_dates(&self) -> Result<Vec<String>, KiokuError> {
        let mut dates = Vec::new();
        let mut read_dir = match fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dates),
            Err(e) => return Err(KiokuError::Backend(e.to_string())),
        };

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| KiokuError::Backend(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("md") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    dates.push(stem.to_string());
                }
            }
        }
        dates.sort();
        Ok(dates)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEntry {
    pub time: String,
    pub mood: Option<String>,
    pub tags: Vec<String>,
    pub event_time: Option<String>,
    pub text: String,
}

/// Splits the file body on the `\n---\n` delimiter: odd chunks are
/// frontmatter blocks, the following even chunk is the entry text.
fn parse_entries(content: &str) -> Vec<ParsedEntry> {
    let parts: Vec<&str> = content.split("\n---\n").collect();
    let mut out = Vec::new();

    let mut i = 1;
    while i + 1 <= parts.len() {
        if i >= parts.len() {
            break;
        }
        let frontmatter = parts[i];
        let body = parts.get(i + 1).copied().unwrap_or("");

        let mut time = String::new();
        let mut mood = None;
        let mut tags = Vec::new();
        let mut event_time = None;

        for line in frontmatter.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("time:") {
                time = rest.trim().trim_matches('"').to_string();
            } else if let Some(rest) = line.strip_prefix("mood:") {
                mood = Some(rest.trim().trim_matches('"').to_string());
            } else if let Some(rest) = line.strip_prefix("tags:") {
                tags = rest
                    .trim()
                    .trim_start_matches('[')
                    .trim_end_matches(']')
                    .split(',')
                    .map(|t| t.trim().trim_matches('"').trim_matches('\'').to_string())
                    .filter(|t| !t.is_empty())
                    .collect();
            } else if let Some(rest) = line.strip_prefix("event_time:") {
                event_time = Some(rest.trim().trim_matches('"').to_string());
            }
        }

        out.push(ParsedEntry {
            time,
            mood,
            tags,
            event_time,
            text: body.trim().to_string(),
        });

        i += 2;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use kioku_core::model::MemoryEntry;
    use tempfile::tempdir;

    #[tokio::test]
    async fn append_creates_header_on_first_write_of_day() {
        let dir = tempdir().unwrap();
        let log = MarkdownLog::new(dir.path());

        let entry = MemoryEntry::new(
            "had a good day",
            "2024-01-01T09:00:00+07:00",
            "2024-01-01",
            None,
            Some("happy".to_string()),
            vec!["work".to_string()],
        );
        log.append(&entry).await.unwrap();

        let content = log.read_date("2024-01-01").await.unwrap().unwrap();
        assert!(content.starts_with("# Kioku — 2024-01-01"));
        assert!(content.contains("mood: \"happy\""));
        assert!(content.contains("had a good day"));
    }

    #[tokio::test]
    async fn parse_entries_round_trips_saved_entries() {
        let dir = tempdir().unwrap();
        let log = MarkdownLog::new(dir.path());

        let e1 = MemoryEntry::new(
            "first entry",
            "2024-01-01T09:00:00+07:00",
            "2024-01-01",
            None,
            None,
            vec![],
        );
        let e2 = MemoryEntry::new(
            "second entry",
            "2024-01-01T20:00:00+07:00",
            "2024-01-01",
            None,
            Some("calm".to_string()),
            vec!["evening".to_string()],
        );
        log.append(&e1).await.unwrap();
        log.append(&e2).await.unwrap();

        let parsed = log.parse_entries("2024-01-01").await.unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].text, "first entry");
        assert_eq!(parsed[1].text, "second entry");
        assert_eq!(parsed[1].mood.as_deref(), Some("calm"));
    }

    #[tokio::test]
    async fn list_dates_is_sorted() {
        let dir = tempdir().unwrap();
        let log = MarkdownLog::new(dir.path());

        for (date, text) in [("2024-01-02", "b"), ("2024-01-01", "a")] {
            let entry = MemoryEntry::new(text, "2024-01-01T00:00:00+07:00", date, None, None, vec![]);
            log.append(&entry).await.unwrap();
        }

        let dates = log.list_dates().await.unwrap();
        assert_eq!(dates, vec!["2024-01-01".to_string(), "2024-01-02".to_string()]);
    }
}
