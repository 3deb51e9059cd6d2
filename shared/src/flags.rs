//! Flag map derived from raw `--flag value` tokens

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::errors::{SharedError, SharedResult};

static INTERVAL_PATTERN: OnceLock<Regex> = OnceLock::new();

/// Case-sensitive flag name to raw string value mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flags {
    values: HashMap<String, String>,
}

impl Flags {
    /// Parse `--name value` pairs. A flag followed by another flag (or nothing)
    /// gets an empty value. Values may start with a single dash (`--nice -5`).
    pub fn parse(tokens: &[String]) -> Self {
        let mut values = HashMap::new();
        let mut iter = tokens.iter().peekable();

        while let Some(token) = iter.next() {
            let Some(name) = token.strip_prefix("--") else {
                continue;
            };
            let value = match iter.peek() {
                Some(next) if !next.starts_with("--") => iter.next().cloned().unwrap_or_default(),
                _ => String::new(),
            };
            values.insert(name.to_string(), value);
        }

        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn require(&self, name: &str) -> SharedResult<&str> {
        self.get(name).ok_or_else(|| SharedError::MissingFlag { flag: name.to_string() })
    }

    /// Convert an optional flag into `T`
    pub fn parse_value<T>(&self, name: &str) -> SharedResult<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(name) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| SharedError::invalid_flag(name, raw, e.to_string())),
        }
    }

    /// Convert a mandatory flag into `T`
    pub fn require_parsed<T>(&self, name: &str) -> SharedResult<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.parse_value(name)?
            .ok_or_else(|| SharedError::MissingFlag { flag: name.to_string() })
    }
}

/// Parse an interval of the form `1h:2m:3s` (any subset, colons optional) or a
/// bare number of seconds.
pub fn parse_interval(input: &str) -> SharedResult<Duration> {
    let input = input.trim();
    if !input.is_empty() && input.bytes().all(|b| b.is_ascii_digit()) {
        return input
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| SharedError::InvalidInterval { input: input.to_string() });
    }

    let pattern = INTERVAL_PATTERN.get_or_init(|| {
        Regex::new(r"^(?:(\d+)h)?:?(?:(\d+)m)?:?(?:(\d+)s)?$").expect("interval pattern is valid")
    });
    let invalid = || SharedError::InvalidInterval { input: input.to_string() };
    let captures = pattern.captures(input).ok_or_else(invalid)?;

    let mut total = 0u64;
    let mut matched = false;
    for (group, unit) in [(1, 3600u64), (2, 60), (3, 1)] {
        if let Some(value) = captures.get(group) {
            let value: u64 = value.as_str().parse().map_err(|_| invalid())?;
            total = value
                .checked_mul(unit)
                .and_then(|v| total.checked_add(v))
                .ok_or_else(invalid)?;
            matched = true;
        }
    }

    if !matched {
        return Err(invalid());
    }
    Ok(Duration::from_secs(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(raw: &str) -> Vec<String> {
        raw.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_parse_pairs_and_negative_values() {
        let flags = Flags::parse(&tokens("--cpu 4 --nice -5 --timeout 10"));

        assert_eq!(flags.get("cpu"), Some("4"));
        assert_eq!(flags.get("nice"), Some("-5"));
        assert_eq!(flags.get("timeout"), Some("10"));
    }

    #[test]
    fn test_valueless_flag_and_case_sensitivity() {
        let flags = Flags::parse(&tokens("--vm-keep --Path /tmp"));

        assert_eq!(flags.get("vm-keep"), Some(""));
        assert_eq!(flags.get("Path"), Some("/tmp"));
        assert!(!flags.contains("path"));
    }

    #[test]
    fn test_typed_accessors() {
        let flags = Flags::parse(&tokens("--pid 1234 --offset abc"));

        assert_eq!(flags.require_parsed::<i32>("pid").unwrap(), 1234);
        assert!(matches!(
            flags.require_parsed::<i64>("offset"),
            Err(SharedError::InvalidFlag { .. })
        ));
        assert!(matches!(
            flags.require_parsed::<i64>("length"),
            Err(SharedError::MissingFlag { .. })
        ));
        assert_eq!(flags.parse_value::<i32>("nice").unwrap(), None);
    }

    #[test]
    fn test_parse_interval_forms() {
        assert_eq!(parse_interval("1h:1m:1s").unwrap(), Duration::from_secs(3661));
        assert_eq!(parse_interval("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_interval("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_interval("1h:30s").unwrap(), Duration::from_secs(3630));
        assert_eq!(parse_interval("15").unwrap(), Duration::from_secs(15));
    }

    #[test]
    fn test_parse_interval_rejects_garbage() {
        for input in ["", "1x", "h", "1s:1h", "-5s", "::"] {
            assert!(parse_interval(input).is_err(), "{input} should be rejected");
        }
    }
}
