//! SQLite record store

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use kestrel_core::{Record, RecordField, Source};

use crate::{RecordQuery, RecordStore, SourceStats, StoreError};

const RECORD_COLUMNS: &str = "id, source, external_id, response, manual_label, \
     predicted_label, predicted_score, created_at";

/// Record store backed by a single SQLite connection
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        debug!("Opened record store at {}", path.display());
        Self::init(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                external_id TEXT NOT NULL,
                response TEXT NOT NULL DEFAULT '{}',
                manual_label INTEGER NULL,
                predicted_label INTEGER NULL,
                predicted_score REAL NULL,
                created_at TEXT NOT NULL,
                CONSTRAINT unique_source_external_id UNIQUE (source, external_id)
            );
            CREATE INDEX IF NOT EXISTS idx_records_unscored
                ON records(source, id) WHERE predicted_label IS NULL;
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl RecordStore for SqliteStore {
    fn upsert(
        &self,
        source: Source,
        external_id: &str,
        response: &Value,
    ) -> Result<(Record, bool), StoreError> {
        let payload = serde_json::to_string(response)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let inserted = tx.execute(
            "INSERT INTO records (source, external_id, response, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(source, external_id) DO NOTHING",
            params![source.as_str(), external_id, payload, Utc::now().to_rfc3339()],
        )?;
        let created = inserted == 1;

        if !created {
            tx.execute(
                "UPDATE records SET response = ?3 WHERE source = ?1 AND external_id = ?2",
                params![source.as_str(), external_id, payload],
            )?;
        }

        let record = tx.query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM records WHERE source = ?1 AND external_id = ?2"),
            params![source.as_str(), external_id],
            record_from_row,
        )?;
        tx.commit()?;

        Ok((record, created))
    }

    fn get(&self, source: Source, external_id: &str) -> Result<Option<Record>, StoreError> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE source = ?1 AND external_id = ?2"),
                params![source.as_str(), external_id],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn filter_by(&self, query: &RecordQuery) -> Result<Vec<Record>, StoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE {} ORDER BY id ASC LIMIT ?3",
            where_clause(query)
        );
        // A negative LIMIT means no limit in SQLite.
        let limit = query.limit.map(|l| l as i64).unwrap_or(-1);

        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(
            params![query.source.as_str(), query.after_id.unwrap_or(0), limit],
            record_from_row,
        )?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn count(&self, query: &RecordQuery) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM records WHERE {}", where_clause(query));
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            &sql,
            params![query.source.as_str(), query.after_id.unwrap_or(0)],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn bulk_update(&self, records: &[Record], fields: &[RecordField]) -> Result<usize, StoreError> {
        if records.is_empty() || fields.is_empty() {
            return Ok(0);
        }

        let assignments: Vec<String> = fields
            .iter()
            .enumerate()
            .map(|(i, field)| format!("{} = ?{}", field.column(), i + 1))
            .collect();
        let sql = format!(
            "UPDATE records SET {} WHERE id = ?{}",
            assignments.join(", "),
            fields.len() + 1
        );

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare_cached(&sql)?;
            for record in records {
                let mut values = Vec::with_capacity(fields.len() + 1);
                for field in fields {
                    values.push(field_value(record, *field)?);
                }
                values.push(SqlValue::Integer(record.id));
                updated += stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;

        debug!("Bulk updated {} records ({} fields)", updated, fields.len());
        Ok(updated)
    }

    fn stats(&self, source: Source) -> Result<SourceStats, StoreError> {
        let conn = self.conn.lock();
        let stats = conn.query_row(
            "SELECT COUNT(*),
                    COUNT(predicted_label),
                    COALESCE(SUM(predicted_label = 1), 0),
                    COUNT(manual_label)
             FROM records WHERE source = ?1",
            params![source.as_str()],
            |row| {
                Ok(SourceStats {
                    total: row.get::<_, i64>(0)? as u64,
                    scored: row.get::<_, i64>(1)? as u64,
                    positive: row.get::<_, i64>(2)? as u64,
                    manually_labeled: row.get::<_, i64>(3)? as u64,
                })
            },
        )?;
        Ok(stats)
    }
}

fn where_clause(query: &RecordQuery) -> &'static str {
    if query.unscored_only {
        "source = ?1 AND id > ?2 AND predicted_label IS NULL"
    } else {
        "source = ?1 AND id > ?2"
    }
}

fn field_value(record: &Record, field: RecordField) -> Result<SqlValue, StoreError> {
    let value = match field {
        RecordField::Response => SqlValue::Text(serde_json::to_string(&record.response)?),
        RecordField::ManualLabel => bool_value(record.manual_label),
        RecordField::PredictedLabel => bool_value(record.predicted_label),
        RecordField::PredictedScore => match record.predicted_score {
            Some(score) if !(0.0..=1.0).contains(&score) => {
                return Err(StoreError::Corrupt(format!(
                    "score {} out of range for record {}",
                    score, record.id
                )))
            }
            Some(score) => SqlValue::Real(score),
            None => SqlValue::Null,
        },
    };
    Ok(value)
}

fn bool_value(value: Option<bool>) -> SqlValue {
    match value {
        Some(b) => SqlValue::Integer(i64::from(b)),
        None => SqlValue::Null,
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Record> {
    let source: String = row.get(1)?;
    let source = source
        .parse::<Source>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;

    let response: String = row.get(3)?;
    let response = serde_json::from_str(&response)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    let created_at: String = row.get(7)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;

    Ok(Record {
        id: row.get(0)?,
        source,
        external_id: row.get(2)?,
        response,
        manual_label: row.get(4)?,
        predicted_label: row.get(5)?,
        predicted_score: row.get(6)?,
        created_at,
    })
}
