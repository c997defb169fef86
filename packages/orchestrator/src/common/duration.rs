//! Human-readable durations for snapshot deltas.

/// Format a millisecond span as `"2d 3h 5m"`, dropping zero parts.
///
/// The minimum unit is minutes; anything under one minute reports `"0m"`.
pub fn humanize_ms(ms: i64) -> String {
    let total_minutes = ms.max(0) / 60_000;
    let days = total_minutes / (24 * 60);
    let hours = (total_minutes % (24 * 60)) / 60;
    let minutes = total_minutes % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }

    if parts.is_empty() {
        "0m".to_string()
    } else {
        parts.join(" ")
    }
}
