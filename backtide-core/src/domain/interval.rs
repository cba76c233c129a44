//! Interval strings such as `15m`, `4h` or `1d`.

use thiserror::Error;

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntervalError {
    #[error("empty interval string")]
    Empty,
    #[error("invalid interval '{0}': expected a number followed by s, m, h, d, w, M or y")]
    Invalid(String),
    #[error("interval must be positive, got '{0}'")]
    NonPositive(String),
}

/// Convert an interval string to seconds.
///
/// Units: `s`, `m`, `h`, `d`, `w`, `M` (30 days), `y` (365 days). A bare
/// integer is read as seconds.
pub fn parse_interval(text: &str) -> Result<i64, IntervalError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(IntervalError::Empty);
    }

    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    let count: i64 = digits
        .parse()
        .map_err(|_| IntervalError::Invalid(text.to_string()))?;

    let unit_seconds = match unit {
        "" | "s" => 1,
        "m" => MINUTE,
        "h" => HOUR,
        "d" => DAY,
        "w" => 7 * DAY,
        "M" => 30 * DAY,
        "y" => 365 * DAY,
        _ => return Err(IntervalError::Invalid(text.to_string())),
    };

    let seconds = count
        .checked_mul(unit_seconds)
        .ok_or_else(|| IntervalError::Invalid(text.to_string()))?;
    if seconds <= 0 {
        return Err(IntervalError::NonPositive(text.to_string()));
    }
    Ok(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_units() {
        assert_eq!(parse_interval("30s"), Ok(30));
        assert_eq!(parse_interval("15m"), Ok(900));
        assert_eq!(parse_interval("4h"), Ok(14_400));
        assert_eq!(parse_interval("1d"), Ok(86_400));
        assert_eq!(parse_interval("1w"), Ok(604_800));
        assert_eq!(parse_interval("1M"), Ok(2_592_000));
        assert_eq!(parse_interval("1y"), Ok(31_536_000));
    }

    #[test]
    fn bare_number_is_seconds() {
        assert_eq!(parse_interval("3600"), Ok(3600));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_interval(""), Err(IntervalError::Empty));
        assert!(matches!(parse_interval("d"), Err(IntervalError::Invalid(_))));
        assert!(matches!(parse_interval("5x"), Err(IntervalError::Invalid(_))));
        assert!(matches!(parse_interval("0m"), Err(IntervalError::NonPositive(_))));
    }
}
