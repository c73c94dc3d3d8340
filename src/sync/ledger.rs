// Keyward — Sync ledger
//
// Last fingerprint pushed per (destination, name). Lets reconcile skip
// unchanged values without ever storing plaintext.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::enclave::Fingerprint;
use crate::store::{SharedDatabase, StoreError};

#[derive(Clone)]
pub struct SyncLedger {
    db: SharedDatabase,
}

impl SyncLedger {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    pub fn for_destination(&self, destination: &str) -> Result<HashMap<String, Fingerprint>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT credential_name, value_hash FROM sync_ledger WHERE destination_id = ?1",
            )?;
            let rows = stmt.query_map(params![destination], |row| {
                let name: String = row.get(0)?;
                let hash: String = row.get(1)?;
                Ok((name, Fingerprint::from_stored(hash)))
            })?;

            let mut pushed = HashMap::new();
            for row in rows {
                let (name, hash) = row?;
                pushed.insert(name, hash);
            }
            Ok(pushed)
        })
    }

    pub fn record(
        &self,
        destination: &str,
        name: &str,
        hash: &Fingerprint,
        pushed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sync_ledger (destination_id, credential_name, value_hash, pushed_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(destination_id, credential_name) DO UPDATE SET
                    value_hash = excluded.value_hash,
                    pushed_at = excluded.pushed_at",
                params![destination, name, hash.as_str(), pushed_at.to_rfc3339()],
            )
        })?;
        Ok(())
    }
}
