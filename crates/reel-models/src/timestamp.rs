//! Timestamp formatting for cue files and encoder arguments.

/// Format seconds as `HH:MM:SS.mmm`, the WebVTT cue time format.
///
/// # Examples
/// ```
/// use reel_models::timestamp::format_cue_time;
/// assert_eq!(format_cue_time(0.0), "00:00:00.000");
/// assert_eq!(format_cue_time(3661.25), "01:01:01.250");
/// ```
pub fn format_cue_time(total_secs: f64) -> String {
    let total_ms = if total_secs.is_finite() && total_secs > 0.0 {
        (total_secs * 1000.0).round() as u64
    } else {
        0
    };
    let hours = total_ms / 3_600_000;
    let mins = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, mins, secs, millis)
}

/// Format seconds for an ffmpeg `-ss` argument.
pub fn format_seek(total_secs: f64) -> String {
    format!("{:.3}", total_secs.max(0.0))
}

/// Parse ffmpeg's `HH:MM:SS.micro` clock (as printed in `out_time=`) to seconds.
///
/// Returns `None` for malformed or negative values such as `-577014:32:22.77`,
/// which ffmpeg prints before the first packet is muxed.
pub fn parse_clock(value: &str) -> Option<f64> {
    let parts: Vec<&str> = value.trim().split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;
    if hours < 0.0 || minutes < 0.0 || seconds < 0.0 {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}
