use std::time::Duration;

pub mod archive;

mod error;

pub use error::Error;

/// Reads a boolean toggle from the environment, falling back to the
/// given default when the variable is absent or unparsable.
pub fn env_get_bool(key: &str, default_value: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => v.parse().unwrap_or(default_value),
        Err(_) => default_value,
    }
}

/// Reads a duration from the environment, falling back to the given
/// default when the variable is absent or unparsable.
pub fn env_get_duration(key: &str, default_value: Duration) -> Duration {
    match std::env::var(key) {
        Ok(v) => parse_duration(&v).unwrap_or(default_value),
        Err(_) => default_value,
    }
}

/// Parses durations of the form `90s`, `30m`, `1h30m` or a bare number
/// of seconds. Unknown units fail the whole parse.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut number = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            number.push(c);
            continue;
        }
        let value: u64 = number.parse().ok()?;
        number.clear();
        total += match c {
            's' => Duration::from_secs(value),
            'm' => Duration::from_secs(value * 60),
            'h' => Duration::from_secs(value * 3600),
            _ => return None,
        };
    }
    if !number.is_empty() {
        // trailing digits without a unit
        return None;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_durations() {
        assert_eq!(parse_duration("90s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("30m"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
    }

    #[test]
    fn rejects_unknown_units() {
        assert_eq!(parse_duration("10d"), None);
        assert_eq!(parse_duration("5m3"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn env_toggles_fall_back_to_defaults() {
        assert!(env_get_bool("BUNDLEKIT_TEST_UNSET_BOOL", true));
        assert_eq!(
            env_get_duration("BUNDLEKIT_TEST_UNSET_DUR", Duration::from_secs(7)),
            Duration::from_secs(7)
        );
    }
}
