//! Source Readers
//!
//! The reader contract and the join barrier that runs every reader concurrently before a
//! run starts. Each reader is bounded by a timeout; an error, a timeout or an empty
//! result all turn into an absent source, never into a failed run.
//!
//! [`DirectorySourceReader`] loads the on-disk layout the scrapers write:
//!
//! ```text
//! <root>/<source>/*.json    one JSON array of payloads (or a single payload) per file
//! ```
//!
//! Files are read in name order. A payload may carry an `observed_at` RFC3339 timestamp;
//! otherwise the file's modification time is used. That fallback ties same-source
//! last-write-wins to filesystem metadata: copying or touching a drop directory can
//! change which of two unstamped records of one source wins. Scrapers should embed
//! `observed_at` in every payload; unstamped payloads are logged at debug level.

use crate::consolidation::keys::SourceKind;
use crate::consolidation::pipeline::{
    RunAborted, RunCancellation, RunInput, RunStage, SourceDelivery,
};
use crate::consolidation::raw::{RawEnvelope, RawRecord};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[async_trait]
pub trait SourceReader: Send + Sync {
    fn source(&self) -> SourceKind;

    async fn read(&self) -> Result<Vec<RawEnvelope>>;
}

/// Run all readers concurrently and wait for every one to finish or time out.
///
/// The cancellation token is checked once the barrier is reached; a cancelled run
/// discards whatever the readers returned.
pub async fn gather_sources(
    readers: &[Arc<dyn SourceReader>],
    timeout: Duration,
    cancel: &RunCancellation,
) -> Result<RunInput, RunAborted> {
    let reads = readers.iter().map(|reader| {
        let reader = Arc::clone(reader);
        async move {
            let source = reader.source();
            match tokio::time::timeout(timeout, reader.read()).await {
                Ok(Ok(records)) => {
                    debug!(source = %source, records = records.len(), "Reader finished");
                    SourceDelivery::from_records(source, records)
                }
                Ok(Err(e)) => {
                    warn!(source = %source, error = %e, "Reader failed, source treated as absent");
                    SourceDelivery::Absent {
                        source,
                        reason: format!("reader error: {:#}", e),
                    }
                }
                Err(_) => {
                    warn!(
                        source = %source,
                        timeout_ms = timeout.as_millis() as u64,
                        "Reader timed out, source treated as absent"
                    );
                    SourceDelivery::Absent {
                        source,
                        reason: format!("timed out after {:?}", timeout),
                    }
                }
            }
        }
    });
    let deliveries = join_all(reads).await;

    if cancel.is_cancelled() {
        warn!("Run cancelled at the reader barrier");
        return Err(RunAborted::Cancelled {
            stage: RunStage::Gather,
        });
    }

    let delivered = deliveries
        .iter()
        .filter(|d| matches!(d, SourceDelivery::Delivered { .. }))
        .count();
    info!(readers = readers.len(), delivered, "All readers finished");
    Ok(RunInput::from_deliveries(deliveries))
}

// =============================================================================
// DIRECTORY READER
// =============================================================================

pub struct DirectorySourceReader {
    root: PathBuf,
    source: SourceKind,
}

impl DirectorySourceReader {
    pub fn new(root: impl Into<PathBuf>, source: SourceKind) -> Self {
        Self {
            root: root.into(),
            source,
        }
    }

    /// One reader per source under `root`.
    pub fn for_all_sources(root: impl AsRef<Path>) -> Vec<Arc<dyn SourceReader>> {
        SourceKind::ALL
            .iter()
            .map(|source| {
                Arc::new(DirectorySourceReader::new(root.as_ref(), *source)) as Arc<dyn SourceReader>
            })
            .collect()
    }

    pub fn directory(&self) -> PathBuf {
        self.root.join(self.source.as_str())
    }

    async fn read_file(&self, path: &Path, out: &mut Vec<RawEnvelope>) -> Result<()> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let modified: DateTime<Utc> = tokio::fs::metadata(path)
            .await
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .with_context(|| format!("modification time of {}", path.display()))?;

        let payloads = match serde_json::from_str::<Value>(&contents)
            .with_context(|| format!("parsing {}", path.display()))?
        {
            Value::Array(items) => items,
            single => vec![single],
        };

        for (index, mut payload) in payloads.into_iter().enumerate() {
            let observed_at = take_observed_at(&mut payload).unwrap_or_else(|| {
                debug!(
                    source = %self.source,
                    file = %path.display(),
                    index,
                    "No observed_at in payload, using file modification time"
                );
                modified
            });
            match RawRecord::from_json(self.source, payload) {
                Ok(record) => out.push(RawEnvelope::new(record, observed_at)),
                Err(e) => warn!(
                    source = %self.source,
                    file = %path.display(),
                    index,
                    error = %e,
                    "Skipping undecodable payload"
                ),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SourceReader for DirectorySourceReader {
    fn source(&self) -> SourceKind {
        self.source
    }

    async fn read(&self) -> Result<Vec<RawEnvelope>> {
        let dir = self.directory();
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            bail!("no directory {}", dir.display());
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("listing {}", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        files.sort();

        let mut records = Vec::new();
        for path in &files {
            if let Err(e) = self.read_file(path, &mut records).await {
                warn!(source = %self.source, error = %format!("{:#}", e), "Skipping unreadable file");
            }
        }
        debug!(source = %self.source, files = files.len(), records = records.len(), "Directory read");
        Ok(records)
    }
}

fn take_observed_at(payload: &mut Value) -> Option<DateTime<Utc>> {
    let raw = payload.as_object_mut()?.remove("observed_at")?;
    let parsed = DateTime::parse_from_rfc3339(raw.as_str()?).ok()?;
    Some(parsed.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FailingReader;

    #[async_trait]
    impl SourceReader for FailingReader {
        fn source(&self) -> SourceKind {
            SourceKind::Odds
        }

        async fn read(&self) -> Result<Vec<RawEnvelope>> {
            bail!("upstream returned 503")
        }
    }

    struct SlowReader;

    #[async_trait]
    impl SourceReader for SlowReader {
        fn source(&self) -> SourceKind {
            SourceKind::Injuries
        }

        async fn read(&self) -> Result<Vec<RawEnvelope>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    fn write_json(dir: &Path, name: &str, value: &Value) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(name), serde_json::to_string(value).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_directory_reader_reads_arrays_and_objects() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("odds");
        write_json(
            &dir,
            "b.json",
            &json!({"date": "2024-01-15", "home_team": "LAL", "away_team": "BOS",
                    "moneyline_home": "-150", "observed_at": "2024-01-15T18:00:00Z"}),
        );
        write_json(
            &dir,
            "a.json",
            &json!([
                {"date": "2024-01-16", "home_team": "NYK", "away_team": "MIA"},
                "not a payload"
            ]),
        );
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let reader = DirectorySourceReader::new(tmp.path(), SourceKind::Odds);
        let records = reader.read().await.unwrap();
        assert_eq!(records.len(), 2);
        // a.json sorts first
        assert_eq!(records[0].record.game().date.as_deref(), Some("2024-01-16"));
        assert_eq!(
            records[1].retrieved_at,
            DateTime::parse_from_rfc3339("2024-01-15T18:00:00Z")
                .unwrap()
                .with_timezone(&Utc)
        );
    }

    #[tokio::test]
    async fn test_embedded_timestamp_survives_a_copy_and_mtime_fills_the_gap() {
        let payloads = json!([
            {"date": "2024-01-15", "home_team": "LAL", "away_team": "BOS",
             "home_score": 102, "observed_at": "2024-01-15T23:00:00Z"},
            {"date": "2024-01-15", "home_team": "LAL", "away_team": "BOS", "home_score": 101}
        ]);
        let first = tempfile::tempdir().unwrap();
        let copy = tempfile::tempdir().unwrap();
        write_json(&first.path().join("boxscore"), "games.json", &payloads);
        write_json(&copy.path().join("boxscore"), "games.json", &payloads);

        let stamped = DateTime::parse_from_rfc3339("2024-01-15T23:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        for root in [first.path(), copy.path()] {
            let records = DirectorySourceReader::new(root, SourceKind::Boxscore)
                .read()
                .await
                .unwrap();
            assert_eq!(records.len(), 2);
            assert_eq!(records[0].retrieved_at, stamped);

            let modified: DateTime<Utc> = std::fs::metadata(root.join("boxscore/games.json"))
                .unwrap()
                .modified()
                .unwrap()
                .into();
            assert_eq!(records[1].retrieved_at, modified);
        }
    }

    #[tokio::test]
    async fn test_gather_turns_failures_into_absence() {
        let tmp = tempfile::tempdir().unwrap();
        write_json(
            &tmp.path().join("schedule"),
            "games.json",
            &json!([{"date": "2024-01-15", "home_team": "LAL", "away_team": "BOS"}]),
        );
        std::fs::create_dir_all(tmp.path().join("standings")).unwrap();

        let readers: Vec<Arc<dyn SourceReader>> = vec![
            Arc::new(DirectorySourceReader::new(tmp.path(), SourceKind::Schedule)),
            Arc::new(DirectorySourceReader::new(tmp.path(), SourceKind::Standings)),
            Arc::new(DirectorySourceReader::new(tmp.path(), SourceKind::Boxscore)),
            Arc::new(FailingReader),
            Arc::new(SlowReader),
        ];
        let input = gather_sources(&readers, Duration::from_millis(100), &RunCancellation::new())
            .await
            .unwrap();

        let deliveries = input.deliveries();
        assert_eq!(deliveries.len(), 5);
        assert!(matches!(
            &deliveries[0],
            SourceDelivery::Delivered { source: SourceKind::Schedule, records } if records.len() == 1
        ));
        for delivery in &deliveries[1..] {
            assert!(matches!(delivery, SourceDelivery::Absent { .. }), "{:?}", delivery);
        }
        let SourceDelivery::Absent { reason, .. } = &deliveries[4] else {
            unreachable!()
        };
        assert!(reason.starts_with("timed out"));
    }

    #[tokio::test]
    async fn test_gather_honours_cancellation() {
        let cancel = RunCancellation::new();
        cancel.cancel();
        let readers: Vec<Arc<dyn SourceReader>> = vec![Arc::new(FailingReader)];
        let result = gather_sources(&readers, Duration::from_millis(100), &cancel).await;
        assert_eq!(
            result,
            Err(RunAborted::Cancelled {
                stage: RunStage::Gather
            })
        );
    }
}
