//! Validation of user-supplied viewer parameters

use std::time::Duration;

use tracing::warn;

use crate::capture::SourceId;
use crate::error::ConfigError;
use crate::pipeline::viewer::MAX_PERIOD;
use crate::pipeline::ViewerSettings;
use crate::utils::parse_number;
use crate::ViewerSpec;

/// What to do with a frame rate above the camera's native rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateCap {
    /// Interactive input: reject and ask again
    Reject,
    /// Config files: lower to the native rate with a warning
    Clamp,
}

pub fn parse_delay(input: &str) -> Result<Duration, ConfigError> {
    let delay = parse_number(input).ok_or_else(|| ConfigError::NotANumber(input.trim().into()))?;
    check_delay(delay)
}

pub fn check_delay(delay: f64) -> Result<Duration, ConfigError> {
    if !delay.is_finite() || delay < 0.0 {
        return Err(ConfigError::NegativeDelay(delay));
    }
    let too_long = || ConfigError::DelayTooLong {
        requested: delay,
        max: MAX_PERIOD.as_secs(),
    };
    let delay = Duration::try_from_secs_f64(delay).map_err(|_| too_long())?;
    if delay > MAX_PERIOD {
        return Err(too_long());
    }
    Ok(delay)
}

pub fn parse_rate(input: &str, native: f64, cap: RateCap) -> Result<f64, ConfigError> {
    let rate = parse_number(input).ok_or_else(|| ConfigError::NotANumber(input.trim().into()))?;
    check_rate(rate, native, cap)
}

pub fn check_rate(rate: f64, native: f64, cap: RateCap) -> Result<f64, ConfigError> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(ConfigError::NonPositiveRate(rate));
    }
    match Duration::try_from_secs_f64(1.0 / rate) {
        Ok(period) if period <= MAX_PERIOD => {}
        _ => {
            return Err(ConfigError::RateTooLow {
                requested: rate,
                max: MAX_PERIOD.as_secs(),
            })
        }
    }
    if rate > native {
        return match cap {
            RateCap::Reject => Err(ConfigError::RateAboveNative {
                requested: rate,
                native,
            }),
            RateCap::Clamp => {
                warn!("frame rate {} fps capped to native {} fps", rate, native);
                Ok(native)
            }
        };
    }
    Ok(rate)
}

pub fn parse_positive(input: &str, what: &'static str) -> Result<u32, ConfigError> {
    match input.trim().parse::<u32>() {
        Ok(0) | Err(_) => Err(ConfigError::NonPositive(what)),
        Ok(value) => Ok(value),
    }
}

pub fn parse_source(input: &str) -> Result<SourceId, ConfigError> {
    input
        .trim()
        .parse::<u32>()
        .map(SourceId)
        .map_err(|_| ConfigError::NotANumber(input.trim().into()))
}

/// Validates a config-file viewer entry against its source's native rate.
pub fn settings_from_spec(
    spec: &ViewerSpec,
    native_rate: impl Fn(SourceId) -> Option<f64>,
) -> Result<ViewerSettings, ConfigError> {
    let native = native_rate(spec.source).ok_or(ConfigError::UnknownSource(spec.source))?;
    let delay = check_delay(spec.delay)?;
    let rate = check_rate(spec.fps, native, RateCap::Clamp)?;
    Ok(ViewerSettings::new(delay, rate, spec.source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays() {
        assert_eq!(parse_delay("1.5").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_delay("0").unwrap(), Duration::ZERO);
        assert!(matches!(parse_delay("-0.1"), Err(ConfigError::NegativeDelay(_))));
        assert!(matches!(parse_delay("soon"), Err(ConfigError::NotANumber(_))));
        assert!(matches!(parse_delay("1e20"), Err(ConfigError::DelayTooLong { .. })));
        assert!(matches!(parse_delay("1e11"), Err(ConfigError::DelayTooLong { .. })));
        assert_eq!(parse_delay("86400").unwrap(), MAX_PERIOD);
    }

    #[test]
    fn rates() {
        assert_eq!(parse_rate("15", 30.0, RateCap::Reject).unwrap(), 15.0);
        assert_eq!(parse_rate("30", 30.0, RateCap::Reject).unwrap(), 30.0);
        assert!(matches!(
            parse_rate("0", 30.0, RateCap::Reject),
            Err(ConfigError::NonPositiveRate(_))
        ));
        assert!(matches!(
            parse_rate("60", 30.0, RateCap::Reject),
            Err(ConfigError::RateAboveNative { .. })
        ));
        assert_eq!(parse_rate("60", 30.0, RateCap::Clamp).unwrap(), 30.0);
        assert!(matches!(
            parse_rate("1e-300", 30.0, RateCap::Reject),
            Err(ConfigError::RateTooLow { .. })
        ));
        assert!(matches!(
            parse_rate("1e-6", 30.0, RateCap::Clamp),
            Err(ConfigError::RateTooLow { .. })
        ));
    }

    #[test]
    fn positives_and_sources() {
        assert_eq!(parse_positive("3", "count").unwrap(), 3);
        assert!(parse_positive("0", "count").is_err());
        assert!(parse_positive("-2", "count").is_err());
        assert_eq!(parse_source(" 1 ").unwrap(), SourceId(1));
    }

    #[test]
    fn spec_validation() {
        let native = |id: SourceId| (id == SourceId(0)).then_some(30.0);
        let spec = ViewerSpec {
            delay: 2.0,
            fps: 120.0,
            source: SourceId(0),
        };
        let settings = settings_from_spec(&spec, native).unwrap();
        assert_eq!(settings.delay, Duration::from_secs(2));
        assert!((settings.refresh_period.as_secs_f64() - 1.0 / 30.0).abs() < 1e-9);

        let unknown = ViewerSpec {
            source: SourceId(4),
            ..spec
        };
        assert!(matches!(
            settings_from_spec(&unknown, native),
            Err(ConfigError::UnknownSource(SourceId(4)))
        ));
    }
}
