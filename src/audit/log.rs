// Keyward — Append-only audit log
//
// Records are only ever inserted. Timestamps are clamped so they never go
// backwards relative to the previous append, which keeps timestamp order and
// insertion order identical even across clock adjustments and restarts.

use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, params_from_iter};

use super::record::{AuditAction, AuditQuery, AuditRecord};
use super::AuditError;
use crate::enclave::Fingerprint;
use crate::store::SharedDatabase;

// ─── Trait ───────────────────────────────────────────────────────────────────

/// The audit ledger. Readers may filter but never mutate.
pub trait AuditLog: Send + Sync {
    /// Append one record. Fails only when storage does. Returns the record as
    /// stored (with its id and final timestamp).
    fn append(&self, record: AuditRecord) -> Result<AuditRecord, AuditError>;

    /// Records matching `query`, in append order.
    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, AuditError>;
}

// ─── SQLite Implementation ──────────────────────────────────────────────────

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub struct SqliteAuditLog {
    db: SharedDatabase,
    last_timestamp: Mutex<Option<DateTime<Utc>>>,
}

impl SqliteAuditLog {
    pub fn new(db: SharedDatabase) -> Result<Self, AuditError> {
        let last: Option<String> =
            db.with_conn(|conn| conn.query_row("SELECT MAX(timestamp) FROM audit_log", [], |row| row.get(0)))?;
        let last_timestamp = last
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(Self {
            db,
            last_timestamp: Mutex::new(last_timestamp),
        })
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditRecord> {
        let id: i64 = row.get(0)?;
        let timestamp_str: String = row.get(1)?;
        let actor: String = row.get(2)?;
        let action_str: String = row.get(3)?;
        let credential_name: String = row.get(4)?;
        let old_hash: Option<String> = row.get(5)?;
        let new_hash: Option<String> = row.get(6)?;
        let detail: Option<String> = row.get(7)?;

        let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
            })?;

        let action = AuditAction::parse(&action_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown audit action '{}'", action_str).into(),
            )
        })?;

        Ok(AuditRecord {
            id: Some(id),
            timestamp,
            actor,
            action,
            credential_name,
            old_value_hash: old_hash.map(Fingerprint::from_stored),
            new_value_hash: new_hash.map(Fingerprint::from_stored),
            detail,
        })
    }
}

impl AuditLog for SqliteAuditLog {
    fn append(&self, mut record: AuditRecord) -> Result<AuditRecord, AuditError> {
        let mut last = self.last_timestamp.lock().map_err(|_| AuditError::Poisoned)?;

        // Stored at microsecond precision; clamp against what a reopen will read.
        record.timestamp = record.timestamp.trunc_subsecs(6);
        if let Some(prev) = *last {
            if record.timestamp < prev {
                record.timestamp = prev;
            }
        }

        let id = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO audit_log
                    (timestamp, actor, action, credential_name, old_value_hash, new_value_hash, detail)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    format_ts(&record.timestamp),
                    record.actor,
                    record.action.as_str(),
                    record.credential_name,
                    record.old_value_hash.as_ref().map(|h| h.as_str()),
                    record.new_value_hash.as_ref().map(|h| h.as_str()),
                    record.detail,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        *last = Some(record.timestamp);
        record.id = Some(id);

        tracing::debug!(
            credential = %record.credential_name,
            action = %record.action,
            actor = %record.actor,
            "Audit record appended"
        );

        Ok(record)
    }

    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, AuditError> {
        let mut sql = String::from(
            "SELECT id, timestamp, actor, action, credential_name, old_value_hash, new_value_hash, detail
             FROM audit_log WHERE 1 = 1",
        );
        let mut args: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(name) = &query.credential_name {
            args.push(Box::new(name.clone()));
            sql.push_str(&format!(" AND credential_name = ?{}", args.len()));
        }
        if !query.actions.is_empty() {
            let mut slots = Vec::with_capacity(query.actions.len());
            for action in &query.actions {
                args.push(Box::new(action.as_str().to_string()));
                slots.push(format!("?{}", args.len()));
            }
            sql.push_str(&format!(" AND action IN ({})", slots.join(", ")));
        }
        if let Some(since) = &query.since {
            args.push(Box::new(format_ts(since)));
            sql.push_str(&format!(" AND timestamp >= ?{}", args.len()));
        }
        if let Some(until) = &query.until {
            args.push(Box::new(format_ts(until)));
            sql.push_str(&format!(" AND timestamp <= ?{}", args.len()));
        }
        sql.push_str(" ORDER BY id ASC");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let records = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args.iter().map(|a| a.as_ref())), Self::row_to_record)?;
            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })?;

        Ok(records)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
