use crate::cli::parser::Commands;
use crate::config::Config;
use crate::db::log::load_log;
use crate::db::pool::DbPool;
use crate::errors::AppResult;
use ansi_term::Colour;

/// ANSI colour for an operation name
fn color_for_operation(op: &str) -> Colour {
    match op {
        "session_start" => Colour::Green,
        "session_end" => Colour::Cyan,
        "session_force_close" => Colour::Red,
        "ingest" | "sync" => Colour::Yellow,
        "purge" | "recover" => Colour::Blue,
        "migration_applied" => Colour::Purple,
        "init" => Colour::RGB(255, 153, 51),
        _ => Colour::White,
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let mut out: String = s.chars().take(max.saturating_sub(3)).collect();
        out.push_str("...");
        out
    } else {
        s.to_string()
    }
}

pub fn handle(cmd: &Commands, cfg: &Config) -> AppResult<()> {
    if !matches!(cmd, Commands::Log { print: true }) {
        return Ok(());
    }

    let pool = DbPool::new(&cfg.database)?;
    let entries = load_log(&pool.conn)?;

    let id_w = entries
        .iter()
        .map(|(id, ..)| id.to_string().len())
        .max()
        .unwrap_or(1);
    let op_w = entries
        .iter()
        .map(|(_, _, op, target, _)| {
            let plain = if target.is_empty() {
                op.clone()
            } else {
                format!("{op} ({target})")
            };
            truncate(&plain, 60).chars().count()
        })
        .max()
        .unwrap_or(10);

    println!("📜 Internal log:\n");

    for (id, raw_date, op, target, message) in entries {
        let date = chrono::DateTime::parse_from_rfc3339(&raw_date)
            .map(|dt| dt.format("%FT%T%:z").to_string())
            .unwrap_or(raw_date);

        let plain = if target.is_empty() {
            op.clone()
        } else {
            truncate(&format!("{op} ({target})"), 60)
        };
        let padding = " ".repeat(op_w.saturating_sub(plain.chars().count()));

        // only the operation word is coloured
        let colored = match plain.split_once(' ') {
            Some((word, rest)) => format!("{} {}", color_for_operation(&op).paint(word), rest),
            None => color_for_operation(&op).paint(plain.as_str()).to_string(),
        };

        println!(
            "{:>id_w$}: {:<25} | {}{} => {}",
            id,
            date,
            colored,
            padding,
            message,
            id_w = id_w
        );
    }

    Ok(())
}
