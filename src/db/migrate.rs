//! Versioned schema migrations.
//!
//! Applied versions are recorded in the `log` table as `migration_applied`
//! rows, so the same engine serves the on-device database and the remote
//! store (see `remote::schema`).

use crate::errors::{AppError, AppResult};
use rusqlite::{Connection, OptionalExtension, params};

pub struct Migration {
    pub version: &'static str,
    pub description: &'static str,
    pub sql: &'static str,
}

/// Ensure that the `log` table exists with the modern schema.
pub fn ensure_log_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS log (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            date      TEXT NOT NULL,
            operation TEXT NOT NULL,
            target    TEXT DEFAULT '',
            message   TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn is_applied(conn: &Connection, version: &str) -> rusqlite::Result<bool> {
    let mut chk = conn.prepare(
        "SELECT 1 FROM log
         WHERE operation = 'migration_applied' AND target = ?1
         LIMIT 1",
    )?;
    Ok(chk.query_row([version], |_| Ok(())).optional()?.is_some())
}

/// Apply every migration of `migrations` not yet recorded, each in its own
/// transaction together with its marker row. Returns how many ran.
pub fn apply_migrations(conn: &Connection, migrations: &[Migration]) -> AppResult<usize> {
    ensure_log_table(conn)?;

    let mut applied = 0;
    for m in migrations {
        if is_applied(conn, m.version)? {
            continue;
        }

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(m.sql)
            .map_err(|e| AppError::Migration(format!("{}: {}", m.version, e)))?;
        tx.execute(
            "INSERT INTO log (date, operation, target, message)
             VALUES (datetime('now'), 'migration_applied', ?1, ?2)",
            params![m.version, m.description],
        )?;
        tx.commit()?;

        log::info!("migration applied: {} ({})", m.version, m.description);
        applied += 1;
    }
    Ok(applied)
}

const LOCAL_MIGRATIONS: &[Migration] = &[
    Migration {
        version: "20250301_0001_base_schema",
        description: "Sessions, sample queue and timeline tables",
        sql: r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id               TEXT PRIMARY KEY,
            employee_id      TEXT NOT NULL,
            started_at       INTEGER NOT NULL,
            ended_at         INTEGER,
            total_distance_m REAL NOT NULL DEFAULT 0,
            status           TEXT NOT NULL CHECK(status IN ('active','completed')),
            close_reason     TEXT CHECK(close_reason IN ('ended','forced'))
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_one_active
            ON sessions(employee_id) WHERE status = 'active';

        CREATE TABLE IF NOT EXISTS location_samples (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            hash            TEXT NOT NULL UNIQUE,
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
            created_at      INTEGER NOT NULL,
            uploaded        INTEGER NOT NULL DEFAULT 0,
            uploaded_at     INTEGER,
            attempts        INTEGER NOT NULL DEFAULT 0,
            last_attempt_at INTEGER,
            claimed_at      INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_samples_pending
            ON location_samples(uploaded, attempts, recorded_at);
        CREATE INDEX IF NOT EXISTS idx_samples_session
            ON location_samples(session_id, recorded_at);

        CREATE TABLE IF NOT EXISTS timeline_events (
            id            TEXT PRIMARY KEY,
            session_id    TEXT NOT NULL,
            kind          TEXT NOT NULL CHECK(kind IN ('start','end','stop','move')),
            started_at    INTEGER NOT NULL,
            ended_at      INTEGER NOT NULL,
            duration_secs INTEGER NOT NULL DEFAULT 0,
            day           TEXT NOT NULL,
            latitude      REAL NOT NULL,
            longitude     REAL NOT NULL,
            end_latitude  REAL,
            end_longitude REAL,
            distance_m    REAL NOT NULL DEFAULT 0,
            point_count   INTEGER NOT NULL DEFAULT 0,
            finalized     INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_timeline_session
            ON timeline_events(session_id, started_at);
        "#,
    },
    Migration {
        version: "20250412_0002_add_sample_metadata",
        description: "Provider, address, mock flag and segment phase on samples",
        sql: r#"
        ALTER TABLE location_samples ADD COLUMN provider TEXT;
        ALTER TABLE location_samples ADD COLUMN address TEXT;
        ALTER TABLE location_samples ADD COLUMN is_mock INTEGER NOT NULL DEFAULT 0;
        ALTER TABLE location_samples ADD COLUMN phase TEXT;
        "#,
    },
    Migration {
        version: "20250520_0003_session_close_report",
        description: "Track which session closures were reported to the remote",
        sql: r#"
        ALTER TABLE sessions ADD COLUMN close_reported INTEGER NOT NULL DEFAULT 0;
        "#,
    },
];

/// Public entry point: run all pending migrations of the on-device database.
///
/// Invoked by db::initialize::init_db().
pub fn run_pending_migrations(conn: &Connection) -> AppResult<()> {
    apply_migrations(conn, LOCAL_MIGRATIONS)?;
    Ok(())
}
