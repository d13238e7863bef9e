//! Ledger schema and forward-only migrations.
//!
//! Schema version is stored in `PRAGMA user_version`. All timestamps are
//! unix epoch seconds; all amounts are integer cents.

use rusqlite::Connection;
use tracing::info;

use crate::error::{Error, Result};

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS agents (
    id              TEXT PRIMARY KEY,
    agent_wallet    TEXT,
    creator_wallet  TEXT,
    created_at      INTEGER NOT NULL,
    updated_at      INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS clip_variants (
    id               TEXT PRIMARY KEY,
    agent_id         TEXT NOT NULL REFERENCES agents(id),
    vote_count       INTEGER NOT NULL DEFAULT 0,
    tip_total_cents  INTEGER NOT NULL DEFAULT 0,
    created_at       INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS tip_votes (
    id                TEXT PRIMARY KEY,
    clip_variant_id   TEXT NOT NULL REFERENCES clip_variants(id),
    payer_address     TEXT NOT NULL,
    amount_cents      INTEGER NOT NULL CHECK (amount_cents > 0),
    authorization_id  TEXT NOT NULL UNIQUE,
    created_at        INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tip_votes_clip ON tip_votes(clip_variant_id);

CREATE TABLE IF NOT EXISTS payout_entries (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    recipient_kind     TEXT NOT NULL
        CHECK (recipient_kind IN ('creator', 'platform', 'agent', 'treasury')),
    recipient_address  TEXT,
    amount_cents       INTEGER NOT NULL CHECK (amount_cents >= 0),
    status             TEXT NOT NULL
        CHECK (status IN ('pending', 'escrowed', 'paid', 'failed', 'swept')),
    subject_id         TEXT NOT NULL,
    agent_id           TEXT,
    created_at         INTEGER NOT NULL,
    resolved_at        INTEGER,
    tx_reference       TEXT,
    failure_reason     TEXT
);
CREATE INDEX IF NOT EXISTS idx_payout_entries_status ON payout_entries(status);
CREATE INDEX IF NOT EXISTS idx_payout_entries_subject ON payout_entries(subject_id);

CREATE TABLE IF NOT EXISTS unclaimed_funds (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id         TEXT NOT NULL REFERENCES agents(id),
    payout_entry_id  INTEGER NOT NULL UNIQUE REFERENCES payout_entries(id),
    amount_cents     INTEGER NOT NULL CHECK (amount_cents > 0),
    created_at       INTEGER NOT NULL,
    expires_at       INTEGER NOT NULL,
    claimed_at       INTEGER,
    swept_at         INTEGER,
    CHECK (claimed_at IS NULL OR swept_at IS NULL)
);
CREATE INDEX IF NOT EXISTS idx_unclaimed_funds_agent ON unclaimed_funds(agent_id);
CREATE INDEX IF NOT EXISTS idx_unclaimed_funds_expiry ON unclaimed_funds(expires_at);

CREATE TABLE IF NOT EXISTS settlements (
    tip_vote_id        TEXT PRIMARY KEY REFERENCES tip_votes(id),
    status             TEXT NOT NULL CHECK (status IN ('pending', 'settled', 'failed')),
    transaction_hash   TEXT,
    error              TEXT,
    attempts           INTEGER NOT NULL DEFAULT 0,
    payload_json       TEXT NOT NULL,
    requirements_json  TEXT NOT NULL,
    updated_at         INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS wallet_challenges (
    nonce           TEXT PRIMARY KEY,
    subject         TEXT NOT NULL,
    wallet_address  TEXT NOT NULL,
    operation       TEXT NOT NULL,
    message         TEXT NOT NULL,
    issued_at       INTEGER NOT NULL,
    expires_at      INTEGER NOT NULL,
    consumed_at     INTEGER
);
";

/// Configure SQLite pragmas.
pub(crate) fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}

/// Run all pending migrations.
pub(crate) fn migrate(conn: &Connection) -> Result<()> {
    let current_version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if current_version == 0 {
        info!("Initializing ledger schema v{SCHEMA_VERSION}");
        conn.execute_batch(SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(Error::Config(format!(
            "ledger schema version {current_version} is newer than supported {SCHEMA_VERSION}"
        )));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_fresh_database() {
        let conn = Connection::open_in_memory().expect("open");
        configure(&conn).expect("configure");
        migrate(&conn).expect("migrate");

        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("user_version");
        assert_eq!(version, SCHEMA_VERSION);

        // Idempotent
        migrate(&conn).expect("migrate again");
    }

    #[test]
    fn test_newer_schema_rejected() {
        let conn = Connection::open_in_memory().expect("open");
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .expect("set version");
        assert!(migrate(&conn).is_err());
    }

    #[test]
    fn test_fund_cannot_be_claimed_and_swept() {
        let conn = Connection::open_in_memory().expect("open");
        configure(&conn).expect("configure");
        migrate(&conn).expect("migrate");

        conn.execute_batch(
            "INSERT INTO agents (id, created_at, updated_at) VALUES ('a', 0, 0);
             INSERT INTO payout_entries (recipient_kind, amount_cents, status, subject_id, created_at)
                 VALUES ('creator', 10, 'escrowed', 't', 0);",
        )
        .expect("seed");

        let result = conn.execute(
            "INSERT INTO unclaimed_funds
                (agent_id, payout_entry_id, amount_cents, created_at, expires_at, claimed_at, swept_at)
             VALUES ('a', 1, 10, 0, 1, 5, 6)",
            [],
        );
        assert!(result.is_err());
    }
}
