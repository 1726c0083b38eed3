//! Sink Adapters
//!
//! Persistence of a run's partition. [`SqliteSink`] upserts accepted games into `games`
//! and flagged games into `flagged_games`, keyed by `GameKey`, and removes the key from
//! the other table in the same transaction, so after every run each key lives in exactly
//! one table. Re-running the same batch leaves both tables unchanged. Every run also
//! appends a `pipeline_runs` row with its fingerprint and counters.
//!
//! [`JsonReportSink`] writes the whole report as pretty JSON for operator review.

use crate::consolidation::consolidate::ConsolidatedGame;
use crate::consolidation::keys::GameKey;
use crate::consolidation::pipeline::RunReport;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS games (
    game_key TEXT PRIMARY KEY,
    season TEXT NOT NULL,
    game_date TEXT NOT NULL,
    home TEXT NOT NULL,
    away TEXT NOT NULL,
    completeness TEXT NOT NULL,
    record_json TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_games_date ON games(game_date, home);

-- Games held back for operator review
CREATE TABLE IF NOT EXISTS flagged_games (
    game_key TEXT PRIMARY KEY,
    season TEXT NOT NULL,
    game_date TEXT NOT NULL,
    home TEXT NOT NULL,
    away TEXT NOT NULL,
    record_json TEXT NOT NULL,
    violations_json TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS pipeline_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    accepted INTEGER NOT NULL,
    flagged INTEGER NOT NULL,
    counters_json TEXT NOT NULL
);
"#;

// =============================================================================
// ERRORS & CONTRACT
// =============================================================================

#[derive(Debug)]
pub enum SinkError {
    Sqlite(rusqlite::Error),
    Serialization(serde_json::Error),
    Io(std::io::Error),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(e) => write!(f, "SQLite error: {}", e),
            Self::Serialization(e) => write!(f, "Serialization error: {}", e),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for SinkError {}

impl From<rusqlite::Error> for SinkError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e)
    }
}

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SinkSummary {
    pub accepted_written: usize,
    pub flagged_written: usize,
}

/// Receives a finished run. Owns persistence and upsert semantics.
pub trait GameSink: Send + Sync {
    fn persist(&self, report: &RunReport) -> Result<SinkSummary, SinkError>;
}

// =============================================================================
// SQLITE
// =============================================================================

pub struct SqliteSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let sink = Self::with_connection(conn)?;
        info!(path = %path.display(), "Game store opened");
        Ok(sink)
    }

    /// In-memory store (for testing).
    pub fn in_memory() -> Result<Self, SinkError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, SinkError> {
        conn.execute_batch(SCHEMA_SQL)?;
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if !journal_mode.eq_ignore_ascii_case("wal") {
            debug!(journal_mode = %journal_mode, "WAL mode not active");
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn accepted_keys(&self) -> Result<Vec<String>, SinkError> {
        self.keys("SELECT game_key FROM games ORDER BY game_key")
    }

    pub fn flagged_keys(&self) -> Result<Vec<String>, SinkError> {
        self.keys("SELECT game_key FROM flagged_games ORDER BY game_key")
    }

    fn keys(&self, sql: &str) -> Result<Vec<String>, SinkError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    /// Stored record of an accepted game.
    pub fn accepted_game(&self, key: &GameKey) -> Result<Option<serde_json::Value>, SinkError> {
        let conn = self.conn.lock();
        let json: Option<String> = conn
            .query_row(
                "SELECT record_json FROM games WHERE game_key = ?1",
                params![key.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match json {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        })
    }

    /// Stored violations of a flagged game.
    pub fn flagged_violations(
        &self,
        key: &GameKey,
    ) -> Result<Option<serde_json::Value>, SinkError> {
        let conn = self.conn.lock();
        let json: Option<String> = conn
            .query_row(
                "SELECT violations_json FROM flagged_games WHERE game_key = ?1",
                params![key.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match json {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        })
    }

    pub fn run_count(&self) -> Result<u64, SinkError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM pipeline_runs", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    pub fn last_fingerprint(&self) -> Result<Option<String>, SinkError> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT fingerprint FROM pipeline_runs ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?)
    }
}

fn upsert_accepted(tx: &Transaction<'_>, game: &ConsolidatedGame) -> Result<(), SinkError> {
    let key = game.game_key();
    let record_json = serde_json::to_string(game)?;
    let completeness: Vec<&str> = game.completeness().iter().map(|s| s.as_str()).collect();
    tx.execute(
        "INSERT INTO games (game_key, season, game_date, home, away, completeness, record_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(game_key) DO UPDATE SET
            completeness = excluded.completeness,
            record_json = excluded.record_json",
        params![
            key.to_string(),
            key.season.to_string(),
            key.date.to_string(),
            key.home.as_str(),
            key.away.as_str(),
            completeness.join(","),
            record_json
        ],
    )?;
    tx.execute(
        "DELETE FROM flagged_games WHERE game_key = ?1",
        params![key.to_string()],
    )?;
    Ok(())
}

fn upsert_flagged(
    tx: &Transaction<'_>,
    game: &ConsolidatedGame,
    violations_json: &str,
) -> Result<(), SinkError> {
    let key = game.game_key();
    let record_json = serde_json::to_string(game)?;
    tx.execute(
        "INSERT INTO flagged_games (game_key, season, game_date, home, away, record_json, violations_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(game_key) DO UPDATE SET
            record_json = excluded.record_json,
            violations_json = excluded.violations_json",
        params![
            key.to_string(),
            key.season.to_string(),
            key.date.to_string(),
            key.home.as_str(),
            key.away.as_str(),
            record_json,
            violations_json
        ],
    )?;
    tx.execute("DELETE FROM games WHERE game_key = ?1", params![key.to_string()])?;
    Ok(())
}

impl GameSink for SqliteSink {
    fn persist(&self, report: &RunReport) -> Result<SinkSummary, SinkError> {
        // Serialize outside the lock
        let counters_json = serde_json::to_string(&report.counters)?;
        let flagged: Vec<(&ConsolidatedGame, String)> = report
            .flagged
            .iter()
            .map(|f| -> Result<_, SinkError> {
                Ok((&f.game, serde_json::to_string(&f.violations)?))
            })
            .collect::<Result<_, _>>()?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for game in &report.accepted {
            upsert_accepted(&tx, game)?;
        }
        for (game, violations_json) in &flagged {
            upsert_flagged(&tx, game, violations_json)?;
        }
        tx.execute(
            "INSERT INTO pipeline_runs (fingerprint, finished_at, accepted, flagged, counters_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                report.fingerprint.as_str(),
                Utc::now().to_rfc3339(),
                report.accepted.len() as i64,
                report.flagged.len() as i64,
                counters_json
            ],
        )?;
        tx.commit()?;

        let summary = SinkSummary {
            accepted_written: report.accepted.len(),
            flagged_written: report.flagged.len(),
        };
        info!(
            accepted = summary.accepted_written,
            flagged = summary.flagged_written,
            fingerprint = %report.fingerprint,
            "Run persisted"
        );
        Ok(summary)
    }
}

// =============================================================================
// JSON REPORT
// =============================================================================

pub struct JsonReportSink {
    path: PathBuf,
}

impl JsonReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GameSink for JsonReportSink {
    fn persist(&self, report: &RunReport) -> Result<SinkSummary, SinkError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(&self.path, json)?;
        if !report.is_clean() {
            warn!(
                path = %self.path.display(),
                flagged = report.flagged.len(),
                "Report contains flagged games"
            );
        }
        Ok(SinkSummary {
            accepted_written: report.accepted.len(),
            flagged_written: report.flagged.len(),
        })
    }
}
