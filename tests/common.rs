#![allow(dead_code)]
use assert_cmd::{Command, cargo_bin_cmd};
use std::env;
use std::fs;
use std::path::PathBuf;

pub fn rft() -> Command {
    cargo_bin_cmd!("rfieldtrack")
}

fn temp_path(name: &str, suffix: &str) -> String {
    let mut path: PathBuf = env::temp_dir();
    path.push(format!("{}_{}", name, suffix));
    let p = path.to_string_lossy().to_string();
    for ext in ["", "-wal", "-shm"] {
        fs::remove_file(format!("{p}{ext}")).ok();
    }
    p
}

/// Create a unique test DB path inside the system temp dir and remove any existing file
pub fn setup_test_db(name: &str) -> String {
    temp_path(name, "rfieldtrack.sqlite")
}

/// Matching remote store path for a test
pub fn setup_remote_db(name: &str) -> String {
    temp_path(name, "rfieldtrack-remote.sqlite")
}

/// Run `init` for a device/remote pair in test mode (no config file written)
pub fn init_dbs(db: &str, remote: &str) {
    rft()
        .args(["--db", db, "--remote", remote, "--test", "init"])
        .assert()
        .success();
}

/// A short provider log: a six minute stop, two moves and one fix with a
/// useless accuracy that the sampler must drop.
pub const FIXES_CSV: &str = "\
latitude,longitude,accuracy,speed,recorded_at,provider
12.971600,77.594600,8,,2025-03-01T08:00:00Z,gps
12.971650,77.594620,9,,2025-03-01T08:03:00Z,gps
12.971620,77.594580,7,,2025-03-01T08:06:00Z,gps
12.981600,77.594600,10,4.5,2025-03-01T08:10:00Z,gps
12.991600,77.594600,10,4.5,2025-03-01T08:14:00Z,fused
12.991700,77.594600,500,,2025-03-01T08:15:00Z,network
";

/// Write `content` to a temp file and return its path
pub fn write_fixture(name: &str, ext: &str, content: &str) -> String {
    let p = temp_path(name, &format!("fixes.{ext}"));
    fs::write(&p, content).expect("write fixture");
    p
}

/// Id of the most recent session of `employee`, read through the library API
pub fn last_session_id(db: &str, employee: &str) -> String {
    let conn = rusqlite::Connection::open(db).expect("open db");
    rfieldtrack::db::sessions::list_sessions(&conn, Some(employee))
        .expect("list sessions")
        .into_iter()
        .max_by_key(|s| s.started_at)
        .expect("session exists")
        .id
}
