// Keyward — SQLCipher Database Management
//
// Opens and initializes the encrypted state database. It holds lifecycle
// metadata, the audit log and the sync ledger. Credential values are never
// written here: the credential file is the only place values live at rest.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use super::StoreError;

/// Wrapper around a SQLCipher-encrypted SQLite connection.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) an encrypted database at the given path.
    /// The `hex_key` must be the hex-encoded 32-byte key derived from Argon2id.
    pub fn open(path: &std::path::Path, hex_key: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "key", format!("x'{}'", hex_key))?;

        // A wrong key surfaces here as "file is not a database"
        conn.execute_batch("SELECT count(*) FROM sqlite_master;")
            .map_err(|_| StoreError::InvalidKey)?;

        let db = Self { conn };
        db.run_migrations()?;

        Ok(db)
    }

    /// Open an in-memory database (unencrypted, for testing only).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.run_migrations()?;
        Ok(db)
    }

    /// Get a reference to the underlying connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    fn run_migrations(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS credential_state (
                name              TEXT PRIMARY KEY,
                first_seen_at     TEXT NOT NULL,
                last_rotated_at   TEXT,
                status            TEXT NOT NULL DEFAULT 'active',
                provider_key_id   TEXT
            );

            CREATE TABLE IF NOT EXISTS audit_log (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp        TEXT NOT NULL,
                actor            TEXT NOT NULL,
                action           TEXT NOT NULL,
                credential_name  TEXT NOT NULL,
                old_value_hash   TEXT,
                new_value_hash   TEXT,
                detail           TEXT
            );

            CREATE TABLE IF NOT EXISTS sync_ledger (
                destination_id   TEXT NOT NULL,
                credential_name  TEXT NOT NULL,
                value_hash       TEXT NOT NULL,
                pushed_at        TEXT NOT NULL,
                PRIMARY KEY (destination_id, credential_name)
            );

            CREATE INDEX IF NOT EXISTS idx_audit_credential
                ON audit_log(credential_name);

            CREATE INDEX IF NOT EXISTS idx_audit_timestamp
                ON audit_log(timestamp);
            ",
        )?;

        tracing::debug!("Database migrations completed successfully");
        Ok(())
    }
}

/// A database handle shared between the store, the audit log and the sync
/// ledger. rusqlite connections are `Send` but not `Sync`, so every access is
/// serialized; callers never hold the lock across an `.await`.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        match Database::open_in_memory() {
            Ok(db) => Self::new(db),
            Err(e) => panic!("in-memory database: {}", e),
        }
    }

    /// Run `f` against the connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        let guard = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(guard.conn())?)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(db: &Database, name: &str) -> bool {
        let count: i64 = db
            .conn()
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name=?1",
                [name],
                |row| row.get(0),
            )
            .unwrap();
        count == 1
    }

    #[test]
    fn test_open_in_memory_succeeds() {
        let db = Database::open_in_memory();
        assert!(db.is_ok(), "Should be able to open an in-memory database");
    }

    #[test]
    fn test_schema_migration_creates_tables() {
        let db = Database::open_in_memory().unwrap();
        assert!(table_exists(&db, "credential_state"));
        assert!(table_exists(&db, "audit_log"));
        assert!(table_exists(&db, "sync_ledger"));
    }

    #[test]
    fn test_schema_migration_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.run_migrations().is_ok(), "Migrations should be idempotent");
    }

    #[test]
    fn test_no_table_has_a_value_column() {
        let db = Database::open_in_memory().unwrap();
        let mut stmt = db
            .conn()
            .prepare("SELECT sql FROM sqlite_master WHERE type='table'")
            .unwrap();
        let ddl: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();
        for sql in ddl {
            assert!(
                !sql.contains("secret_value") && !sql.contains(" value "),
                "State tables must never store credential values: {}",
                sql
            );
        }
    }

    #[test]
    fn test_encrypted_db_with_correct_key() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let hex_key = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

        let result = Database::open(&db_path, hex_key);
        assert!(result.is_ok(), "Should open successfully with a valid key");
    }

    #[test]
    fn test_encrypted_db_wrong_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test_wrong_key.db");
        let correct_key = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
        let wrong_key = "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff";

        {
            let _db = Database::open(&db_path, correct_key).unwrap();
        }

        let result = Database::open(&db_path, wrong_key);
        assert!(result.is_err(), "Opening with the wrong key must fail");
    }

    #[test]
    fn test_shared_database_runs_closures() {
        let shared = SharedDatabase::in_memory();
        let count: i64 = shared
            .with_conn(|c| c.query_row("SELECT count(*) FROM audit_log", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(count, 0);
    }
}
