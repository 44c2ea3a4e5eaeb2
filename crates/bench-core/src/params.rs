use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// `30/s`, `120/m`
const RATE_PATTERN: &str = r"^([0-9]+)/([sm])$";
/// `60s`, `5m`
const DURATION_PATTERN: &str = r"^([0-9]+)([sm])$";

#[derive(Debug, Error)]
pub enum ParamError {
    #[error("rate must be in format like 30/s or 120/m, got {0:?}")]
    Rate(String),
    #[error("rate must be greater than zero, got {0:?}")]
    ZeroRate(String),
    #[error("duration must be in format like 30s or 5m, got {0:?}")]
    Duration(String),
    #[error("discarded fraction must be in [0, 1), got {0}")]
    Discarded(f64),
    #[error("batch size must be at least 1")]
    BatchSize,
    #[error("{0} must be at least 1")]
    Zero(&'static str),
    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

/// Target invocation rate in events per second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rate(f64);

impl Rate {
    pub fn per_second(value: f64) -> Result<Self, ParamError> {
        if value.is_finite() && value > 0.0 {
            Ok(Self(value))
        } else {
            Err(ParamError::ZeroRate(value.to_string()))
        }
    }

    pub fn as_f64(&self) -> f64 {
        self.0
    }

    /// Time between two emitted tokens.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.0)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/s", self.0)
    }
}

impl FromStr for Rate {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_rate(s)
    }
}

/// Split `<digits><unit>` (or `<digits>/<unit>`) into a number and the unit char.
fn split_value(pattern: &str, input: &str) -> Result<Option<(f64, char)>, ParamError> {
    let re = Regex::new(pattern)?;
    let Some(caps) = re.captures(input) else {
        return Ok(None);
    };
    let value = caps[1].parse::<f64>().ok();
    let unit = caps[2].chars().next();
    Ok(value.zip(unit))
}

/// Parse a rate like `30/s` (per second) or `120/m` (per minute).
pub fn parse_rate(input: &str) -> Result<Rate, ParamError> {
    let (value, unit) =
        split_value(RATE_PATTERN, input)?.ok_or_else(|| ParamError::Rate(input.to_string()))?;
    let per_second = if unit == 'm' { value / 60.0 } else { value };
    Rate::per_second(per_second).map_err(|_| ParamError::ZeroRate(input.to_string()))
}

/// Parse a duration like `60s` or `5m`.
pub fn parse_duration(input: &str) -> Result<Duration, ParamError> {
    let (value, unit) = split_value(DURATION_PATTERN, input)?
        .ok_or_else(|| ParamError::Duration(input.to_string()))?;
    let seconds = if unit == 'm' { value * 60.0 } else { value };
    Duration::try_from_secs_f64(seconds).map_err(|_| ParamError::Duration(input.to_string()))
}

/// Validate the warm-up discard fraction.
pub fn check_discarded(discarded: f64) -> Result<f64, ParamError> {
    if (0.0..1.0).contains(&discarded) {
        Ok(discarded)
    } else {
        Err(ParamError::Discarded(discarded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("30/s").unwrap().as_f64(), 30.0);
        assert_eq!(parse_rate("120/m").unwrap().as_f64(), 2.0);
        assert_eq!(parse_rate("30/s").unwrap().period(), Duration::from_secs_f64(1.0 / 30.0));
    }

    #[test]
    fn test_parse_rate_rejects_malformed() {
        for bad in ["30", "30/h", "/s", "abc/s", "", "30 /s", "-5/s", "1.5/s"] {
            assert!(
                matches!(parse_rate(bad), Err(ParamError::Rate(_))),
                "expected rejection for {bad:?}"
            );
        }
    }

    #[test]
    fn test_parse_rate_rejects_zero() {
        assert!(matches!(parse_rate("0/s"), Err(ParamError::ZeroRate(_))));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("60s").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_rejects_malformed() {
        for bad in ["60", "60h", "s", "1.5s", "60/s"] {
            assert!(
                matches!(parse_duration(bad), Err(ParamError::Duration(_))),
                "expected rejection for {bad:?}"
            );
        }
    }

    #[test]
    fn test_rate_from_str() {
        let rate: Rate = "30/s".parse().unwrap();
        assert_eq!(rate.to_string(), "30/s");
    }

    #[test]
    fn test_check_discarded() {
        assert!(check_discarded(0.0).is_ok());
        assert!(check_discarded(0.3).is_ok());
        assert!(check_discarded(1.0).is_err());
        assert!(check_discarded(-0.1).is_err());
        assert!(check_discarded(f64::NAN).is_err());
    }
}
