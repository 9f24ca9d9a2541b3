//! Elapsed/remaining label formatting.

/// Formats seconds as `m:ss`, or `h:mm:ss` once an hour is reached.
/// Returns `None` for non-finite input.
pub fn format_clock(seconds: f64) -> Option<String> {
    if !seconds.is_finite() {
        return None;
    }
    let total = seconds.max(0.0).round() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        Some(format!("{hours}:{minutes:02}:{secs:02}"))
    } else {
        Some(format!("{minutes}:{secs:02}"))
    }
}

/// Formats the time left as `-m:ss` / `-h:mm:ss`.
pub fn format_remaining(elapsed_s: f64, duration_s: f64) -> Option<String> {
    format_clock(duration_s - elapsed_s).map(|label| format!("-{label}"))
}
