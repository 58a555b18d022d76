//! Utility functions for traefik-register

use std::time::Duration;

/// Parse duration string (e.g., "500ms", "30s", "5m", "1h")
pub fn parse_duration(s: &str) -> crate::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(crate::Error::InvalidConfig("empty duration".into()));
    }

    let (num_str, unit) = if let Some(num) = s.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = s.strip_suffix('s') {
        (num, "s")
    } else if let Some(num) = s.strip_suffix('m') {
        (num, "m")
    } else if let Some(num) = s.strip_suffix('h') {
        (num, "h")
    } else {
        (s, "s")
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| crate::Error::InvalidConfig(format!("invalid duration: {}", s)))?;

    let duration = match unit {
        "ms" => Duration::from_millis(num),
        "s" => Duration::from_secs(num),
        "m" => Duration::from_secs(num * 60),
        "h" => Duration::from_secs(num * 3600),
        _ => {
            return Err(crate::Error::InvalidConfig(format!(
                "unknown duration unit: {}",
                unit
            )))
        }
    };

    Ok(duration)
}

/// Validate a single key path segment (service name, instance id)
///
/// Segments are spliced into store keys, so they must be non-empty and must
/// not contain `/` or control characters.
pub fn validate_segment(what: &str, segment: &str) -> crate::Result<()> {
    if segment.is_empty() {
        return Err(crate::Error::InvalidConfig(format!("{} cannot be empty", what)));
    }

    if segment.contains('/') {
        return Err(crate::Error::InvalidConfig(format!(
            "{} cannot contain '/': {}",
            what, segment
        )));
    }

    if segment.chars().any(|c| c.is_control()) {
        return Err(crate::Error::InvalidConfig(format!(
            "{} contains invalid characters",
            what
        )));
    }

    Ok(())
}

/// Join a key prefix and a segment with exactly one `/`
pub fn join_key(prefix: &str, segment: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("15s").unwrap(), Duration::from_secs(15));
        assert_eq!(parse_duration("60").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
    }

    #[test]
    fn test_validate_segment() {
        assert!(validate_segment("service name", "user-service").is_ok());
        assert!(validate_segment("service name", "").is_err());
        assert!(validate_segment("service name", "user/service").is_err());
        assert!(validate_segment("instance id", "abc\n").is_err());
    }

    #[test]
    fn test_join_key() {
        assert_eq!(join_key("/microservices", "user"), "/microservices/user");
        assert_eq!(join_key("/microservices/", "user"), "/microservices/user");
    }
}
