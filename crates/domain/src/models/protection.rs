//! Registration protection models.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Decision returned to the registration endpoint before any account
/// creation logic runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationDecision {
    Allowed,
    CaptchaRequired,
    Blocked,
}

/// Outcome recorded for a registration attempt. `Succeeded` is recorded
/// separately by the route layer once account creation completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Allowed,
    CaptchaRequired,
    Blocked,
    Succeeded,
}

/// One recorded registration attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationAttempt {
    pub ip: String,
    pub email_domain: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    /// In [0, 1].
    pub suspicion_score: f64,
}

/// Tunable protection thresholds. Updates take effect on the next
/// `check_attempt` call; existing blocks are not re-evaluated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionThresholds {
    /// Attempts allowed per IP within the window before blocking.
    pub rate_limit: u32,
    pub window_minutes: u32,
    pub block_duration_minutes: u32,
    /// Attempt count at which CAPTCHA is demanded.
    pub captcha_threshold: u32,
    /// Suspicion score at which an attempt is blocked outright.
    pub suspicion_threshold: f64,
    /// Admin kill switch for self-registration.
    pub registration_enabled: bool,
}

impl Default for ProtectionThresholds {
    fn default() -> Self {
        Self {
            rate_limit: 5,
            window_minutes: 15,
            block_duration_minutes: 60,
            captcha_threshold: 3,
            suspicion_threshold: 0.8,
            registration_enabled: true,
        }
    }
}

impl ProtectionThresholds {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.rate_limit == 0 {
            return Err(DomainError::validation("rate_limit must be at least 1"));
        }
        if self.window_minutes == 0 || self.window_minutes > 24 * 60 {
            return Err(DomainError::validation(
                "window_minutes must be between 1 and 1440",
            ));
        }
        if self.block_duration_minutes == 0 {
            return Err(DomainError::validation(
                "block_duration_minutes must be at least 1",
            ));
        }
        if self.captcha_threshold > self.rate_limit {
            return Err(DomainError::validation(
                "captcha_threshold must not exceed rate_limit",
            ));
        }
        if !(0.0..=1.0).contains(&self.suspicion_threshold) {
            return Err(DomainError::validation(
                "suspicion_threshold must be within [0, 1]",
            ));
        }
        Ok(())
    }

    pub fn window(&self) -> Duration {
        Duration::minutes(i64::from(self.window_minutes))
    }

    pub fn block_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.block_duration_minutes))
    }
}

/// Partial threshold update; each field independently optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThresholdUpdate {
    #[serde(default)]
    pub rate_limit: Option<u32>,
    #[serde(default)]
    pub window_minutes: Option<u32>,
    #[serde(default)]
    pub block_duration_minutes: Option<u32>,
    #[serde(default)]
    pub captcha_threshold: Option<u32>,
    #[serde(default)]
    pub suspicion_threshold: Option<f64>,
}

impl ThresholdUpdate {
    pub fn is_empty(&self) -> bool {
        self.rate_limit.is_none()
            && self.window_minutes.is_none()
            && self.block_duration_minutes.is_none()
            && self.captcha_threshold.is_none()
            && self.suspicion_threshold.is_none()
    }

    pub fn apply_to(
        &self,
        current: &ProtectionThresholds,
    ) -> Result<ProtectionThresholds, DomainError> {
        let mut updated = current.clone();
        if let Some(rate_limit) = self.rate_limit {
            updated.rate_limit = rate_limit;
        }
        if let Some(window) = self.window_minutes {
            updated.window_minutes = window;
        }
        if let Some(block) = self.block_duration_minutes {
            updated.block_duration_minutes = block;
        }
        if let Some(captcha) = self.captcha_threshold {
            updated.captcha_threshold = captcha;
        }
        if let Some(suspicion) = self.suspicion_threshold {
            updated.suspicion_threshold = suspicion;
        }
        updated.validate()?;
        Ok(updated)
    }
}

/// Queryable metric window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsRange {
    LastHour,
    Last24Hours,
    Last7Days,
    Last30Days,
}

impl MetricsRange {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1h" => Some(Self::LastHour),
            "24h" => Some(Self::Last24Hours),
            "7d" => Some(Self::Last7Days),
            "30d" => Some(Self::Last30Days),
            _ => None,
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Self::LastHour => Duration::hours(1),
            Self::Last24Hours => Duration::hours(24),
            Self::Last7Days => Duration::days(7),
            Self::Last30Days => Duration::days(30),
        }
    }
}

/// Protection metrics recomputed on demand over a time range.
#[derive(Debug, Clone, Serialize)]
pub struct ProtectionMetrics {
    pub range: MetricsRange,
    pub total_attempts: u64,
    pub successful_registrations: u64,
    pub blocked_attempts: u64,
    pub captcha_challenges: u64,
    pub unique_ips: u64,
    pub suspicious_ips: u64,
    /// Successful registrations per CAPTCHA challenge, clamped to 1.0;
    /// 1.0 when no challenges were issued in the range.
    pub captcha_solve_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds_valid() {
        assert!(ProtectionThresholds::default().validate().is_ok());
    }

    #[test]
    fn test_threshold_validation() {
        let mut thresholds = ProtectionThresholds::default();
        thresholds.rate_limit = 0;
        assert!(thresholds.validate().is_err());

        let mut thresholds = ProtectionThresholds::default();
        thresholds.suspicion_threshold = 1.5;
        assert!(thresholds.validate().is_err());

        let mut thresholds = ProtectionThresholds::default();
        thresholds.captcha_threshold = thresholds.rate_limit + 1;
        assert!(thresholds.validate().is_err());

        let mut thresholds = ProtectionThresholds::default();
        thresholds.window_minutes = 0;
        assert!(thresholds.validate().is_err());
    }

    #[test]
    fn test_partial_update_applies_only_given_fields() {
        let current = ProtectionThresholds::default();
        let update = ThresholdUpdate {
            rate_limit: Some(10),
            ..Default::default()
        };
        let updated = update.apply_to(&current).unwrap();
        assert_eq!(updated.rate_limit, 10);
        assert_eq!(updated.window_minutes, current.window_minutes);
        assert_eq!(updated.captcha_threshold, current.captcha_threshold);
    }

    #[test]
    fn test_partial_update_revalidates() {
        let current = ProtectionThresholds::default();
        let update = ThresholdUpdate {
            suspicion_threshold: Some(2.0),
            ..Default::default()
        };
        assert!(update.apply_to(&current).is_err());
    }

    #[test]
    fn test_metrics_range_parse() {
        assert_eq!(MetricsRange::parse("1h"), Some(MetricsRange::LastHour));
        assert_eq!(MetricsRange::parse("24h"), Some(MetricsRange::Last24Hours));
        assert_eq!(MetricsRange::parse("7d"), Some(MetricsRange::Last7Days));
        assert_eq!(MetricsRange::parse("30d"), Some(MetricsRange::Last30Days));
        assert_eq!(MetricsRange::parse("2w"), None);
    }

    #[test]
    fn test_metrics_range_duration() {
        assert_eq!(MetricsRange::LastHour.duration(), Duration::hours(1));
        assert_eq!(MetricsRange::Last30Days.duration(), Duration::days(30));
    }
}
