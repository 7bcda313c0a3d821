use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{Error, Result};

/// Current UTC time as a fixed-width RFC 3339 string.
///
/// Fixed microsecond precision keeps lexicographic order equal to
/// chronological order, which the keyset cursor relies on.
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Re-render a caller-supplied timestamp in the canonical fixed-width form.
pub fn normalize(raw: &str) -> Result<String> {
    let parsed: DateTime<Utc> = raw
        .parse()
        .map_err(|_| Error::Validation(format!("invalid timestamp: {raw}")))?;
    Ok(parsed.to_rfc3339_opts(SecondsFormat::Micros, true))
}
