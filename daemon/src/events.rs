//! Append-only event log backed by SQLite.
//!
//! Every append is a single autocommit INSERT with `synchronous = FULL`, so a
//! record is durable when `append` returns and a killed process never leaves a
//! partial row. Records are never updated.

use chrono::{Local, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension};
use shared::events::{EventFilter, EventQuery, EventRecord, EventType, EVENT_TIMESTAMP_FORMAT};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum EventLogError {
    #[error("failed to create event log directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to encode event detail: {0}")]
    Detail(#[from] serde_json::Error),

    #[error("invalid time range: {start} is after {end}")]
    InvalidRange {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
}

pub struct EventLog {
    conn: Connection,
}

impl EventLog {
    pub fn open(path: &Path) -> Result<Self, EventLogError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir)?;
                info!("Created event log directory at {:?}", dir);
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        Self::migrate(&conn)?;

        debug!("Event log opened at {:?}", path);
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, EventLogError> {
        let conn = Connection::open_in_memory()?;
        Self::migrate(&conn)?;
        Ok(Self { conn })
    }

    fn migrate(conn: &Connection) -> Result<(), EventLogError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS event_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                detail TEXT,
                confidence REAL
            );
            CREATE INDEX IF NOT EXISTS idx_event_log_type ON event_log(event_type);",
        )?;
        Ok(())
    }

    pub fn append(
        &self,
        event_type: EventType,
        detail: Option<serde_json::Value>,
        confidence: Option<f64>,
    ) -> Result<EventRecord, EventLogError> {
        self.append_at(Local::now().naive_local(), event_type, detail, confidence)
    }

    pub fn append_at(
        &self,
        timestamp: NaiveDateTime,
        event_type: EventType,
        detail: Option<serde_json::Value>,
        confidence: Option<f64>,
    ) -> Result<EventRecord, EventLogError> {
        let ts = timestamp.format(EVENT_TIMESTAMP_FORMAT).to_string();
        let detail_str = detail.as_ref().map(serde_json::to_string).transpose()?;

        self.conn.execute(
            "INSERT INTO event_log (timestamp, event_type, detail, confidence) VALUES (?1, ?2, ?3, ?4)",
            params![ts, event_type.as_str(), detail_str, confidence],
        )?;
        let id = self.conn.last_insert_rowid();

        info!(
            "[event] {} {} detail={} confidence={:?}",
            ts,
            event_type,
            detail_str.as_deref().unwrap_or("-"),
            confidence
        );

        Ok(EventRecord {
            id,
            timestamp,
            event_type: event_type.as_str().to_string(),
            detail,
            confidence,
        })
    }

    /// Records with `start <= timestamp <= end`, ascending. Rows whose stored
    /// timestamp does not parse are skipped.
    pub fn query(&self, query: &EventQuery) -> Result<Vec<EventRecord>, EventLogError> {
        if query.start > query.end {
            return Err(EventLogError::InvalidRange {
                start: query.start,
                end: query.end,
            });
        }

        let mut sql =
            String::from("SELECT id, timestamp, event_type, detail, confidence FROM event_log");
        let mut args: Vec<String> = Vec::new();
        match &query.filter {
            Some(EventFilter::Type(event_type)) => {
                sql.push_str(" WHERE event_type = ?");
                args.push(event_type.as_str().to_string());
            }
            Some(EventFilter::Category(category)) => {
                let clauses: Vec<&str> = category
                    .patterns()
                    .iter()
                    .map(|_| "event_type LIKE ?")
                    .collect();
                sql.push_str(&format!(" WHERE ({})", clauses.join(" OR ")));
                args.extend(category.patterns().iter().map(|p| p.to_string()));
            }
            None => {}
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<f64>>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, ts, event_type, detail, confidence) = row?;
            let Ok(timestamp) = NaiveDateTime::parse_from_str(&ts, EVENT_TIMESTAMP_FORMAT) else {
                debug!("Skipping event {} with malformed timestamp {:?}", id, ts);
                continue;
            };
            if timestamp < query.start || timestamp > query.end {
                continue;
            }
            if !query.terms.is_empty() {
                let text = detail.as_deref().unwrap_or("");
                if !query.terms.iter().any(|term| text.contains(term.as_str())) {
                    continue;
                }
            }
            let detail = detail.map(|raw| {
                serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
            });
            records.push(EventRecord {
                id,
                timestamp,
                event_type,
                detail,
                confidence,
            });
        }

        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    pub fn count(&self) -> Result<i64, EventLogError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM event_log", [], |row| row.get(0))?)
    }

    pub fn latest(&self) -> Result<Option<EventRecord>, EventLogError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, timestamp, event_type, detail, confidence FROM event_log ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<f64>>(4)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.and_then(|(id, ts, event_type, detail, confidence)| {
            let timestamp = NaiveDateTime::parse_from_str(&ts, EVENT_TIMESTAMP_FORMAT).ok()?;
            Some(EventRecord {
                id,
                timestamp,
                event_type,
                detail: detail.and_then(|raw| serde_json::from_str(&raw).ok()),
                confidence,
            })
        }))
    }

    #[cfg(test)]
    fn insert_raw(&self, timestamp: &str, event_type: &str, detail: Option<&str>) {
        self.conn
            .execute(
                "INSERT INTO event_log (timestamp, event_type, detail, confidence) VALUES (?1, ?2, ?3, NULL)",
                params![timestamp, event_type, detail],
            )
            .unwrap();
    }
}
