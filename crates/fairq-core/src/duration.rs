//! Duration-string parsing for config values.
//!
//! Accepts plain seconds (`"300"`) or a number with a unit suffix:
//! `"30s"`, `"5m"`, `"12h"`, `"7d"`.

use crate::config::ConfigError;

/// Parse a duration string into whole seconds.
pub fn parse_duration_secs(s: &str) -> Result<u64, ConfigError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ConfigError::BadDuration(s.to_string()));
    }

    let (number, multiplier) = match s.as_bytes()[s.len() - 1] {
        b's' => (&s[..s.len() - 1], 1),
        b'm' => (&s[..s.len() - 1], 60),
        b'h' => (&s[..s.len() - 1], 3600),
        b'd' => (&s[..s.len() - 1], 86_400),
        _ => (s, 1),
    };

    number
        .parse::<u64>()
        .map(|n| n * multiplier)
        .map_err(|_| ConfigError::BadDuration(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_seconds() {
        assert_eq!(parse_duration_secs("300").unwrap(), 300);
        assert_eq!(parse_duration_secs("0").unwrap(), 0);
    }

    #[test]
    fn suffixed_values() {
        assert_eq!(parse_duration_secs("30s").unwrap(), 30);
        assert_eq!(parse_duration_secs("5m").unwrap(), 300);
        assert_eq!(parse_duration_secs("12h").unwrap(), 43_200);
        assert_eq!(parse_duration_secs("7d").unwrap(), 604_800);
    }

    #[test]
    fn whitespace_is_trimmed() {
        assert_eq!(parse_duration_secs(" 5m ").unwrap(), 300);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_duration_secs("").is_err());
        assert!(parse_duration_secs("5x").is_err());
        assert!(parse_duration_secs("m").is_err());
        assert!(parse_duration_secs("five").is_err());
    }
}
