//! Formatting utilities used for CLI outputs.

/// `850 m`, `12.40 km`
pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{:.0} m", meters)
    } else {
        format!("{:.2} km", meters / 1000.0)
    }
}

/// `00h 05m 30s`
pub fn format_duration(secs: i64) -> String {
    let s = secs.max(0);
    format!("{:02}h {:02}m {:02}s", s / 3600, (s % 3600) / 60, s % 60)
}
