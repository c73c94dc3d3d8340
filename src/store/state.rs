// Keyward — Lifecycle state repository
//
// Persists the value-free part of each credential record so cadence and
// status survive restarts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::db::SharedDatabase;
use super::models::{CredentialStatus, PersistedState};
use super::StoreError;

#[derive(Clone)]
pub struct StateRepository {
    db: SharedDatabase,
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

impl StateRepository {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    fn row_to_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<PersistedState> {
        let name: String = row.get(0)?;
        let first_seen_str: String = row.get(1)?;
        let last_rotated_str: Option<String> = row.get(2)?;
        let status_str: String = row.get(3)?;
        let provider_key_id: Option<String> = row.get(4)?;

        let first_seen_at = parse_timestamp(1, &first_seen_str)?;
        let last_rotated_at = match last_rotated_str {
            Some(s) => Some(parse_timestamp(2, &s)?),
            None => None,
        };

        // An unknown status string means an interrupted write from a newer
        // build; treat the credential as active rather than refuse to load.
        let status = CredentialStatus::parse(&status_str).unwrap_or(CredentialStatus::Active);

        Ok(PersistedState {
            name,
            first_seen_at,
            last_rotated_at,
            status,
            provider_key_id,
        })
    }

    pub fn load_all(&self) -> Result<HashMap<String, PersistedState>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, first_seen_at, last_rotated_at, status, provider_key_id
                 FROM credential_state",
            )?;
            let rows = stmt.query_map([], Self::row_to_state)?;

            let mut states = HashMap::new();
            for row in rows {
                let state = row?;
                states.insert(state.name.clone(), state);
            }
            Ok(states)
        })
    }

    pub fn get(&self, name: &str) -> Result<Option<PersistedState>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, first_seen_at, last_rotated_at, status, provider_key_id
                 FROM credential_state WHERE name = ?1",
            )?;
            let mut rows = stmt.query_map(params![name], Self::row_to_state)?;
            rows.next().transpose()
        })
    }

    pub fn upsert(&self, state: &PersistedState) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO credential_state
                    (name, first_seen_at, last_rotated_at, status, provider_key_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(name) DO UPDATE SET
                    last_rotated_at = excluded.last_rotated_at,
                    status = excluded.status,
                    provider_key_id = excluded.provider_key_id",
                params![
                    state.name,
                    state.first_seen_at.to_rfc3339(),
                    state.last_rotated_at.map(|t| t.to_rfc3339()),
                    state.status.as_str(),
                    state.provider_key_id,
                ],
            )
        })?;

        tracing::debug!(credential = %state.name, status = state.status.as_str(), "Credential state persisted");
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
