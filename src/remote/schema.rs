//! Schema of the remote store, applied with the same migration engine as the
//! device database.

use crate::db::migrate::{Migration, apply_migrations};
use crate::errors::AppResult;
use rusqlite::Connection;

const REMOTE_MIGRATIONS: &[Migration] = &[
    Migration {
        version: "20250301_r001_samples_and_rollups",
        description: "Accepted samples, remote sessions and rollups",
        sql: r#"
        CREATE TABLE IF NOT EXISTS remote_samples (
            hash            TEXT PRIMARY KEY,
            employee_id     TEXT NOT NULL,
            session_id      TEXT NOT NULL,
            latitude        REAL NOT NULL,
            longitude       REAL NOT NULL,
            accuracy        REAL NOT NULL,
            speed           REAL,
            altitude        REAL,
            heading         REAL,
            is_moving       INTEGER NOT NULL DEFAULT 0,
            recorded_at     INTEGER NOT NULL,
            received_at     INTEGER NOT NULL,
            payload_version INTEGER NOT NULL,
            provider        TEXT,
            address         TEXT,
            is_mock         INTEGER,
            phase           TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_remote_samples_order
            ON remote_samples(session_id, recorded_at, hash);

        CREATE TABLE IF NOT EXISTS remote_sessions (
            id               TEXT PRIMARY KEY,
            employee_id      TEXT NOT NULL,
            total_distance_m REAL NOT NULL DEFAULT 0,
            status           TEXT NOT NULL DEFAULT 'active' CHECK(status IN ('active','closed')),
            ended_at         INTEGER
        );

        CREATE TABLE IF NOT EXISTS session_rollups (
            session_id       TEXT PRIMARY KEY,
            employee_id      TEXT NOT NULL,
            distance_m       REAL NOT NULL DEFAULT 0,
            sample_count     INTEGER NOT NULL DEFAULT 0,
            last_latitude    REAL NOT NULL,
            last_longitude   REAL NOT NULL,
            last_recorded_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS daily_rollups (
            employee_id      TEXT NOT NULL,
            day              TEXT NOT NULL,
            distance_m       REAL NOT NULL DEFAULT 0,
            sample_count     INTEGER NOT NULL DEFAULT 0,
            last_latitude    REAL NOT NULL,
            last_longitude   REAL NOT NULL,
            last_recorded_at INTEGER NOT NULL,
            PRIMARY KEY (employee_id, day)
        );
        "#,
    },
    Migration {
        version: "20250315_r002_alerts",
        description: "Alerts with one open alert per session and kind",
        sql: r#"
        CREATE TABLE IF NOT EXISTS alerts (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            employee_id     TEXT NOT NULL,
            session_id      TEXT NOT NULL,
            kind            TEXT NOT NULL CHECK(kind IN ('stuck','no_signal','mock_location','clock_drift')),
            severity        TEXT NOT NULL CHECK(severity IN ('info','warning','critical')),
            state           TEXT NOT NULL CHECK(state IN ('open','acknowledged','resolved')),
            escalated       INTEGER NOT NULL DEFAULT 0,
            opened_at       INTEGER NOT NULL,
            acknowledged_at INTEGER,
            resolved_at     INTEGER,
            latitude        REAL,
            longitude       REAL,
            detail          TEXT NOT NULL DEFAULT ''
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_one_per_onset
            ON alerts(session_id, kind) WHERE state != 'resolved';

        CREATE TABLE IF NOT EXISTS session_alert_state (
            session_id   TEXT PRIMARY KEY,
            anchor_lat   REAL NOT NULL,
            anchor_lon   REAL NOT NULL,
            anchor_since INTEGER NOT NULL,
            last_at      INTEGER NOT NULL
        );
        "#,
    },
    Migration {
        version: "20250402_r003_accepted_ledger",
        description: "Accepted-hash ledger that outlives the sample window",
        sql: r#"
        CREATE TABLE IF NOT EXISTS accepted_samples (
            hash        TEXT PRIMARY KEY,
            session_id  TEXT NOT NULL,
            latitude    REAL NOT NULL,
            longitude   REAL NOT NULL,
            recorded_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_accepted_samples_order
            ON accepted_samples(session_id, recorded_at, hash);

        INSERT OR IGNORE INTO accepted_samples (hash, session_id, latitude, longitude, recorded_at)
            SELECT hash, session_id, latitude, longitude, recorded_at FROM remote_samples;
        "#,
    },
];

pub fn run_remote_migrations(conn: &Connection) -> AppResult<usize> {
    apply_migrations(conn, REMOTE_MIGRATIONS)
}
