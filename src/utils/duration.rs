//! ISO 8601 duration parsing.
//!
//! The telephony platform communicates retry delays as ISO 8601 durations
//! (e.g. `PT3S`, `PT1M30S`). Only the day/time designators that appear on the
//! wire are supported.

use std::time::Duration;

/// Parse an ISO 8601 duration of the form `P[nD]T[nH][nM][n(.n)S]` into a
/// [`Duration`]. Returns `None` for anything that does not match.
pub fn parse_iso8601_duration(value: &str) -> Option<Duration> {
    let rest = value.strip_prefix('P')?;
    let (day_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, t),
        None => (rest, ""),
    };

    let mut total_secs = 0f64;

    if !day_part.is_empty() {
        let days: f64 = day_part.strip_suffix('D')?.parse().ok()?;
        total_secs += days * 86_400.0;
    }

    let mut remaining = time_part;
    for (designator, factor) in [('H', 3_600.0), ('M', 60.0), ('S', 1.0)] {
        if let Some(pos) = remaining.find(designator) {
            let number: f64 = remaining[..pos].parse().ok()?;
            total_secs += number * factor;
            remaining = &remaining[pos + 1..];
        }
    }

    if !remaining.is_empty() {
        return None;
    }

    Some(Duration::from_secs_f64(total_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seconds() {
        assert_eq!(
            parse_iso8601_duration("PT3S"),
            Some(Duration::from_secs(3))
        );
        assert_eq!(
            parse_iso8601_duration("PT0.5S"),
            Some(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_parse_composite() {
        assert_eq!(
            parse_iso8601_duration("PT1M30S"),
            Some(Duration::from_secs(90))
        );
        assert_eq!(
            parse_iso8601_duration("PT2H"),
            Some(Duration::from_secs(7_200))
        );
        assert_eq!(
            parse_iso8601_duration("P1DT1S"),
            Some(Duration::from_secs(86_401))
        );
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(parse_iso8601_duration(""), None);
        assert_eq!(parse_iso8601_duration("3S"), None);
        assert_eq!(parse_iso8601_duration("PTXS"), None);
        assert_eq!(parse_iso8601_duration("PT3S extra"), None);
    }
}
