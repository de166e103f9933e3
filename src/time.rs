use chrono::{DateTime, SecondsFormat, Utc};

pub fn format_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Seconds between a job entering Processing and either its terminal
/// transition or now. None until the job has started.
pub fn elapsed_seconds(
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<f64> {
    let started = started_at?;
    let end = completed_at.unwrap_or(now);
    Some(((end - started).num_milliseconds() as f64 / 1000.0).max(0.0))
}
