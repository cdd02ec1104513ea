//! Autoevents: periodic self-issued commands (spec §3, §4.6).

use crate::device::name::Name;
use crate::Error;
use std::time::Duration;

/// A resource or command name, a parsed interval, an on-change flag,
/// and an on-change threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Autoevent {
    pub target: Name,
    pub interval: Duration,
    pub on_change: bool,
    pub on_change_threshold: f64,
}

impl Autoevent {
    pub fn new(target: Name, interval_spec: &str, on_change: bool, on_change_threshold: f64) -> Result<Self, Error> {
        Ok(Autoevent {
            target,
            interval: parse_interval(interval_spec)?,
            on_change,
            on_change_threshold,
        })
    }
}

/// Parses a decimal integer followed by one of `ms`, `s`, `m`, `h`
/// (spec §6 "Time formats").
pub fn parse_interval(spec: &str) -> Result<Duration, Error> {
    let bad = || Error::BadRequest(format!("malformed interval {:?}", spec));

    let (digits, unit) = if let Some(d) = spec.strip_suffix("ms") {
        (d, "ms")
    } else if let Some(d) = spec.strip_suffix('s') {
        (d, "s")
    } else if let Some(d) = spec.strip_suffix('m') {
        (d, "m")
    } else if let Some(d) = spec.strip_suffix('h') {
        (d, "h")
    } else {
        return Err(bad());
    };

    let n: u64 = digits.parse().map_err(|_| bad())?;

    Ok(match unit {
        "ms" => Duration::from_millis(n),
        "s" => Duration::from_secs(n),
        "m" => Duration::from_secs(n * 60),
        "h" => Duration::from_secs(n * 3600),
        _ => unreachable!(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_interval("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_interval("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_interval("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_interval_rejects_garbage() {
        assert!(parse_interval("5").is_err());
        assert!(parse_interval("5x").is_err());
        assert!(parse_interval("ms").is_err());
    }
}
