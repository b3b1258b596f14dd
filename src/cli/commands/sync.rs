use crate::cli::parser::Commands;
use crate::config::Config;
use crate::core::payload::PayloadVersion;
use crate::core::sync::{SyncEngine, SyncOutcome};
use crate::db::log::ttlog;
use crate::db::pool::DbPool;
use crate::errors::AppResult;
use crate::remote::store::RemoteDb;
use crate::ui::messages::{info, success, warning};
use crate::utils::colors::{RESET, color_for_backlog};
use chrono::Utc;

/// Handle the `sync` command: run up to `--cycles` upload cycles against the
/// configured remote store, stopping early once the queue is drained.
pub fn handle(cmd: &Commands, cfg: &Config) -> AppResult<()> {
    if let Commands::Sync {
        cycles,
        remote_max_version,
    } = cmd
    {
        let mut pool = DbPool::new(&cfg.database)?;
        let mut remote = RemoteDb::open(&cfg.remote_database, cfg)?;
        if let Some(v) = remote_max_version {
            remote = remote.with_max_version(PayloadVersion::try_from(*v)?);
        }

        let mut engine = SyncEngine::new(cfg.sync.clone());
        let mut total = SyncOutcome::default();
        let mut ran = 0;

        for _ in 0..(*cycles).max(1) {
            let outcome = engine.run_cycle(&mut pool.conn, &mut remote, Utc::now())?;
            ran += 1;

            total.claimed += outcome.claimed;
            total.uploaded += outcome.uploaded;
            total.duplicates += outcome.duplicates;
            total.failed += outcome.failed;
            total.closures_reported += outcome.closures_reported;
            total.pending = outcome.pending;
            total.backlog = outcome.backlog;
            total.payload_version = outcome.payload_version.or(total.payload_version);

            if let Some(e) = &outcome.error {
                warning(format!("Upload failed: {}", e));
                total.error = outcome.error;
                break;
            }
            if outcome.claimed == 0 {
                break;
            }
        }

        print_outcome(&total, ran, engine.version());

        if let Err(e) = ttlog(
            &pool.conn,
            "sync",
            &cfg.remote_database,
            &format!(
                "{} uploaded, {} failed, {} pending",
                total.uploaded, total.failed, total.pending
            ),
        ) {
            warning(format!("Failed to write internal log: {}", e));
        }

        // partial progress is still a success; nothing uploaded is not
        if let Some(e) = total.error
            && total.uploaded == 0
        {
            return Err(e.into());
        }
    }

    Ok(())
}

fn print_outcome(o: &SyncOutcome, cycles: usize, version: PayloadVersion) {
    if o.claimed == 0 && o.closures_reported == 0 {
        info("Nothing to upload.");
    } else if o.failed == 0 {
        success(format!(
            "Uploaded {} samples ({} already known) in {} cycle(s) as {}.",
            o.uploaded, o.duplicates, cycles, version
        ));
    }
    if o.closures_reported > 0 {
        info(format!("Reported {} closed session(s).", o.closures_reported));
    }

    println!("   pending: {}", o.pending);
    println!("   backlog: {}{}{}", color_for_backlog(o.backlog), o.backlog, RESET);
}
