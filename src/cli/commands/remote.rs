use crate::cli::parser::{Commands, RemoteAction};
use crate::config::Config;
use crate::errors::AppResult;
use crate::remote::store::RemoteDb;
use crate::remote::{aggregator, alerts};
use crate::ui::messages::{header, info, success, warning};
use crate::utils::format_distance;
use crate::utils::table::Table;
use crate::utils::time::timestamp_or_now;
use chrono::Utc;

pub fn handle(cmd: &Commands, cfg: &Config) -> AppResult<()> {
    let Commands::Remote { action } = cmd else {
        return Ok(());
    };
    let mut remote = RemoteDb::open(&cfg.remote_database, cfg)?;

    match action {
        RemoteAction::Rollup { employee } => {
            header("Sessions");
            let mut sessions = Table::new(vec!["SESSION", "EMPLOYEE", "SAMPLES", "DISTANCE", "LAST FIX"]);
            for r in aggregator::session_rollups(remote.conn())? {
                if employee.as_ref().is_some_and(|e| *e != r.employee_id) {
                    continue;
                }
                sessions.add_row(vec![
                    r.session_id,
                    r.employee_id,
                    r.sample_count.to_string(),
                    format_distance(r.distance_m),
                    r.last_recorded_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                ]);
            }
            if sessions.is_empty() {
                info("No samples received yet.");
                return Ok(());
            }
            print!("{}", sessions.render());

            println!();
            header("Days");
            let mut days = Table::new(vec!["EMPLOYEE", "DAY", "SAMPLES", "DISTANCE"]);
            for d in aggregator::day_rollups(remote.conn(), employee.as_deref())? {
                days.add_row(vec![
                    d.employee_id,
                    d.day.to_string(),
                    d.sample_count.to_string(),
                    format_distance(d.distance_m),
                ]);
            }
            print!("{}", days.render());
        }

        RemoteAction::Alerts { all } => {
            let list = alerts::list_alerts(remote.conn(), *all)?;
            if list.is_empty() {
                info("No alerts.");
                return Ok(());
            }

            let mut table = Table::new(vec![
                "ID", "KIND", "SEVERITY", "STATE", "SESSION", "EMPLOYEE", "OPENED", "DETAIL",
            ]);
            for a in list {
                table.add_row(vec![
                    a.id.to_string(),
                    a.kind.to_db_str().to_string(),
                    a.severity.to_db_str().to_string(),
                    a.state.to_db_str().to_string(),
                    a.session_id,
                    a.employee_id,
                    a.opened_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    a.detail,
                ]);
            }
            print!("{}", table.render());
        }

        RemoteAction::Ack { id } => {
            if alerts::acknowledge(remote.conn(), *id, Utc::now())? {
                success(format!("Alert {} acknowledged.", id));
            } else {
                warning(format!("Alert {} is not open.", id));
            }
        }

        RemoteAction::Tick { at } => {
            let now = timestamp_or_now(at.as_deref())?;
            let report = remote.tick(now)?;
            success(format!(
                "{} no-signal alert(s) opened, {} escalated.",
                report.no_signal_opened, report.escalated
            ));
        }
    }

    Ok(())
}
