use predicates::prelude::*;
use predicates::str::contains;

mod common;
use common::{
    FIXES_CSV, init_dbs, last_session_id, rft, setup_remote_db, setup_test_db, write_fixture,
};

#[test]
fn test_init_creates_both_databases() {
    let db = setup_test_db("init_both");
    let remote = setup_remote_db("init_both");

    init_dbs(&db, &remote);

    assert!(std::path::Path::new(&db).exists());
    assert!(std::path::Path::new(&remote).exists());

    rft()
        .args(["--db", &db, "log", "--print"])
        .assert()
        .success()
        .stdout(contains("migration_applied"))
        .stdout(contains("init"));
}

#[test]
fn test_capture_end_sync_and_rollup() {
    let db = setup_test_db("capture_sync");
    let remote = setup_remote_db("capture_sync");
    let fixes = write_fixture("capture_sync", "csv", FIXES_CSV);
    init_dbs(&db, &remote);

    rft()
        .args(["--db", &db, "session", "start", "alice", "--at", "2025-03-01T08:00:00Z"])
        .assert()
        .success()
        .stdout(contains("started for alice"));

    rft()
        .args(["--db", &db, "ingest", &fixes, "--employee", "alice"])
        .assert()
        .success()
        .stdout(contains("5 of 6 fixes accepted"))
        .stdout(contains("poor_accuracy"));

    rft()
        .args(["--db", &db, "session", "end", "alice", "--at", "2025-03-01T08:20:00Z"])
        .assert()
        .success()
        .stdout(contains("ended"));

    rft()
        .args(["--db", &db, "--remote", &remote, "sync", "--cycles", "3"])
        .assert()
        .success()
        .stdout(contains("Uploaded 5 samples"))
        .stdout(contains("Reported 1 closed session"));

    // queue is drained: a second run uploads nothing
    rft()
        .args(["--db", &db, "--remote", &remote, "sync"])
        .assert()
        .success()
        .stdout(contains("Nothing to upload."));

    rft()
        .args(["--db", &db, "--remote", &remote, "remote", "rollup", "--employee", "alice"])
        .assert()
        .success()
        .stdout(contains("alice"))
        .stdout(contains("2025-03-01"));
}

#[test]
fn test_timeline_lists_stop_and_move() {
    let db = setup_test_db("timeline");
    let remote = setup_remote_db("timeline");
    let fixes = write_fixture("timeline", "csv", FIXES_CSV);
    init_dbs(&db, &remote);

    rft()
        .args(["--db", &db, "session", "start", "bob", "--at", "2025-03-01T08:00:00Z"])
        .assert()
        .success();
    rft()
        .args(["--db", &db, "ingest", &fixes, "--employee", "bob"])
        .assert()
        .success();

    let id = last_session_id(&db, "bob");
    rft()
        .args(["--db", &db, "timeline", &id])
        .assert()
        .success()
        .stdout(contains("start"))
        .stdout(contains("stop"))
        .stdout(contains("move"))
        .stdout(contains("Total distance"));

    rft()
        .args(["--db", &db, "status"])
        .assert()
        .success()
        .stdout(contains("bob"))
        .stdout(contains("Pending samples"));
}

#[test]
fn test_second_start_is_rejected() {
    let db = setup_test_db("double_start");
    let remote = setup_remote_db("double_start");
    init_dbs(&db, &remote);

    rft()
        .args(["--db", &db, "session", "start", "carol"])
        .assert()
        .success();
    rft()
        .args(["--db", &db, "session", "start", "carol"])
        .assert()
        .failure()
        .stderr(contains("still active"));
}

#[test]
fn test_ingest_without_active_session_fails() {
    let db = setup_test_db("ingest_inactive");
    let remote = setup_remote_db("ingest_inactive");
    let fixes = write_fixture("ingest_inactive", "csv", FIXES_CSV);
    init_dbs(&db, &remote);

    rft()
        .args(["--db", &db, "ingest", &fixes, "--employee", "dave"])
        .assert()
        .failure()
        .stderr(contains("No active session for employee dave"));
}

#[test]
fn test_force_close_is_idempotent() {
    let db = setup_test_db("force_close");
    let remote = setup_remote_db("force_close");
    init_dbs(&db, &remote);

    rft()
        .args(["--db", &db, "session", "start", "erin", "--at", "2025-03-01T08:00:00Z"])
        .assert()
        .success();
    let id = last_session_id(&db, "erin");

    rft()
        .args(["--db", &db, "session", "close", &id, "--at", "2025-03-01T09:00:00Z"])
        .assert()
        .success()
        .stdout(contains("force-closed"));
    rft()
        .args(["--db", &db, "session", "close", &id])
        .assert()
        .success()
        .stdout(contains("already closed"));

    rft()
        .args(["--db", &db, "session", "list", "--employee", "erin"])
        .assert()
        .success()
        .stdout(contains("closed (forced)"))
        .stdout(contains("01h 00m 00s"));

    rft()
        .args(["--db", &db, "session", "close", "no-such-session"])
        .assert()
        .failure()
        .stderr(contains("Session not found"));
}

#[test]
fn test_older_remote_gets_v1_payloads() {
    let db = setup_test_db("old_remote");
    let remote = setup_remote_db("old_remote");
    let fixes = write_fixture("old_remote", "csv", FIXES_CSV);
    init_dbs(&db, &remote);

    rft()
        .args(["--db", &db, "session", "start", "frank", "--at", "2025-03-01T08:00:00Z"])
        .assert()
        .success();
    rft()
        .args(["--db", &db, "ingest", &fixes, "--employee", "frank"])
        .assert()
        .success();

    rft()
        .args(["--db", &db, "--remote", &remote, "sync", "--remote-max-version", "1"])
        .assert()
        .success()
        .stdout(contains("as v1"));
}

#[test]
fn test_sync_fails_when_nothing_could_be_uploaded() {
    let db = setup_test_db("broken_remote");
    let remote = setup_remote_db("broken_remote");
    let fixes = write_fixture("broken_remote", "csv", FIXES_CSV);
    init_dbs(&db, &remote);

    rft()
        .args(["--db", &db, "session", "start", "hana", "--at", "2025-03-01T08:00:00Z"])
        .assert()
        .success();
    rft()
        .args(["--db", &db, "ingest", &fixes, "--employee", "hana"])
        .assert()
        .success();

    // the remote loses a table it writes every sample to
    let conn = rusqlite::Connection::open(&remote).expect("open remote");
    conn.execute_batch("DROP TABLE accepted_samples;").expect("drop table");
    drop(conn);

    rft()
        .args(["--db", &db, "--remote", &remote, "sync"])
        .assert()
        .failure()
        .stderr(contains("Transient upload failure"));

    rft()
        .args(["--db", &db, "status"])
        .assert()
        .success();
}

#[test]
fn test_remote_alerts_and_tick() {
    let db = setup_test_db("remote_alerts");
    let remote = setup_remote_db("remote_alerts");
    let fixes = write_fixture("remote_alerts", "csv", FIXES_CSV);
    init_dbs(&db, &remote);

    rft()
        .args(["--db", &db, "session", "start", "gina", "--at", "2025-03-01T08:00:00Z"])
        .assert()
        .success();
    rft()
        .args(["--db", &db, "ingest", &fixes, "--employee", "gina"])
        .assert()
        .success();
    rft()
        .args(["--db", &db, "--remote", &remote, "sync"])
        .assert()
        .success();

    rft()
        .args(["--db", &db, "--remote", &remote, "remote", "alerts"])
        .assert()
        .success()
        .stdout(contains("No alerts."));

    // last fix was 08:14, the session is still open
    rft()
        .args(["--db", &db, "--remote", &remote, "remote", "tick", "--at", "2025-03-01T09:00:00Z"])
        .assert()
        .success()
        .stdout(contains("1 no-signal alert(s) opened"));

    rft()
        .args(["--db", &db, "--remote", &remote, "remote", "alerts"])
        .assert()
        .success()
        .stdout(contains("no_signal"))
        .stdout(contains("gina"));

    rft()
        .args(["--db", &db, "--remote", &remote, "remote", "ack", "999"])
        .assert()
        .success()
        .stdout(contains("is not open"));
}

#[test]
fn test_db_info_and_config_print() {
    let db = setup_test_db("db_info");
    let remote = setup_remote_db("db_info");
    init_dbs(&db, &remote);

    rft()
        .args(["--db", &db, "--remote", &remote, "db", "--info", "--check"])
        .assert()
        .success()
        .stdout(contains("Sessions"))
        .stdout(contains("Integrity check passed (device)"))
        .stdout(contains("Integrity check passed (remote)"));

    rft()
        .args(["--db", &db, "config", "--print"])
        .assert()
        .success()
        .stdout(contains("stop_radius_m").and(contains("max_attempts")));
}

#[test]
fn test_recover_and_purge_on_empty_queue() {
    let db = setup_test_db("recover_purge");
    let remote = setup_remote_db("recover_purge");
    init_dbs(&db, &remote);

    rft()
        .args(["--db", &db, "recover"])
        .assert()
        .success()
        .stdout(contains("nothing to recover"));

    rft()
        .args(["--db", &db, "--remote", &remote, "purge", "--at", "2030-01-01T00:00:00Z"])
        .assert()
        .success()
        .stdout(contains("Device: 0 uploaded samples"));
}
