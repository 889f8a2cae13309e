//! SQLite schema versions.
//!
//! The applied version lives in `PRAGMA user_version`. Version 1 holds the
//! server-side tables: records, shares, the revocation ledger and the key
//! directory. Version 2 adds the client-side key slots.

use rusqlite::{Connection, Transaction};

use crate::error::{Result, StoreError};

/// Schema steps, applied in order. Entry `i` moves version `i` to `i + 1`.
const STEPS: &[&str] = &[V1_SERVER_TABLES, V2_LOCAL_KEYS];

pub const CURRENT_VERSION: u32 = STEPS.len() as u32;

/// Bring the schema up to [`CURRENT_VERSION`]. Safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    let found = schema_version(conn)?;
    if found > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "schema version {} is newer than this build ({})",
            found, CURRENT_VERSION
        )));
    }
    if found == CURRENT_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (index, sql) in STEPS.iter().enumerate().skip(found as usize) {
        step(&tx, index as u32 + 1, sql)?;
    }
    tx.commit()?;
    Ok(())
}

pub fn schema_version(conn: &Connection) -> Result<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

fn step(tx: &Transaction<'_>, version: u32, sql: &str) -> Result<()> {
    tx.execute_batch(sql)
        .map_err(|e| StoreError::Migration(format!("step {}: {}", version, e)))?;
    tx.pragma_update(None, "user_version", version)?;
    tracing::debug!(version, "schema step applied");
    Ok(())
}

const V1_SERVER_TABLES: &str = r#"
        -- Records: opaque sealed payload plus cleartext metadata
        CREATE TABLE records (
            record_id BLOB PRIMARY KEY,          -- 16 bytes
            owner_id TEXT NOT NULL,
            encrypted_payload BLOB NOT NULL,     -- marker byte + envelope
            label TEXT NOT NULL,
            content_type TEXT NOT NULL,
            created_at INTEGER NOT NULL,         -- Unix ms
            updated_at INTEGER NOT NULL
        );

        -- Shares: never updated, one per (record, recipient)
        CREATE TABLE shares (
            share_id BLOB PRIMARY KEY,           -- 16 bytes
            record_id BLOB NOT NULL,
            owner_id TEXT NOT NULL,
            recipient_id TEXT NOT NULL,
            envelope BLOB NOT NULL,              -- CBOR HybridEnvelope
            sender_attestation BLOB NOT NULL,    -- 64 bytes, Ed25519 signature
            created_at INTEGER NOT NULL,

            UNIQUE(record_id, recipient_id)
        );

        -- Revocation ledger: append-only, at most one entry per record
        CREATE TABLE revocations (
            record_id BLOB PRIMARY KEY,
            revoked_by TEXT NOT NULL,
            revoked_at INTEGER NOT NULL,
            reason TEXT NOT NULL
        );

        -- Public key directory
        CREATE TABLE public_keys (
            key_id BLOB PRIMARY KEY,             -- 32 bytes, Blake3 of kem_public
            user_id TEXT NOT NULL,
            kem_public BLOB NOT NULL,            -- 1184 bytes
            verifying_key BLOB NOT NULL,         -- 32 bytes
            storage_tier TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            active INTEGER NOT NULL DEFAULT 0
        );

        CREATE UNIQUE INDEX idx_public_keys_active ON public_keys(user_id) WHERE active = 1;
        CREATE INDEX idx_public_keys_user ON public_keys(user_id, created_at);
        CREATE INDEX idx_records_owner ON records(owner_id, created_at);
        CREATE INDEX idx_shares_record ON shares(record_id, created_at);
        CREATE INDEX idx_shares_recipient ON shares(recipient_id, created_at);
        CREATE INDEX idx_revocations_by ON revocations(revoked_by, revoked_at);
        "#;

const V2_LOCAL_KEYS: &str = r#"
        CREATE TABLE local_keys (
            user_id TEXT NOT NULL,
            slot_kind TEXT NOT NULL,             -- 'kem' | 'legacy_x25519'
            slot_key BLOB NOT NULL,              -- key id, empty for legacy
            tier TEXT NOT NULL,
            sealed BLOB NOT NULL,                -- tier-wrapped secret
            created_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, slot_kind, slot_key)
        );
        "#;

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")
            .unwrap();
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        names
    }

    #[test]
    fn fresh_database_gets_every_table() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables = table_names(&conn);
        for expected in ["records", "shares", "revocations", "public_keys", "local_keys"] {
            assert!(tables.iter().any(|t| t == expected), "missing {}", expected);
        }
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn rerunning_is_a_no_op() {
        let mut conn = Connection::open_in_memory().unwrap();
        for _ in 0..3 {
            migrate(&mut conn).unwrap();
        }
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn v1_database_gains_local_keys() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(V1_SERVER_TABLES).unwrap();
        conn.pragma_update(None, "user_version", 1u32).unwrap();
        assert!(!table_names(&conn).iter().any(|t| t == "local_keys"));

        migrate(&mut conn).unwrap();
        assert!(table_names(&conn).iter().any(|t| t == "local_keys"));
    }

    #[test]
    fn newer_schema_is_refused() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", CURRENT_VERSION + 1).unwrap();
        assert!(matches!(migrate(&mut conn), Err(StoreError::Migration(_))));
    }
}
