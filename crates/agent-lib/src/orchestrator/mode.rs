//! Sampling modes and the health-check transition rule

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::MonitoringSettings;
use crate::health::HealthAssessment;

/// Polling cadence of the sampling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Normal,
    Critical,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::Critical => "critical",
        }
    }

    /// Sampling period for this mode
    pub fn interval(&self, settings: &MonitoringSettings) -> Duration {
        match self {
            Mode::Normal => settings.interval(),
            Mode::Critical => settings.fast_interval(),
        }
    }

    /// Mode after a health check
    ///
    /// Any critical metric enters critical mode. Leaving it requires every
    /// metric back below its warning threshold; warnings keep the current
    /// mode.
    pub fn after_check(self, assessment: &HealthAssessment) -> Mode {
        if assessment.any_critical() {
            Mode::Critical
        } else if assessment.all_normal() {
            Mode::Normal
        } else {
            self
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Thresholds;
    use crate::models::fixtures;

    fn assess(cpu: f64) -> HealthAssessment {
        HealthAssessment::evaluate(&fixtures::with_cpu(cpu), &Thresholds::default())
    }

    #[test]
    fn test_transitions() {
        assert_eq!(Mode::Normal.after_check(&assess(30.0)), Mode::Normal);
        assert_eq!(Mode::Normal.after_check(&assess(75.0)), Mode::Normal);
        assert_eq!(Mode::Normal.after_check(&assess(95.0)), Mode::Critical);
        assert_eq!(Mode::Critical.after_check(&assess(75.0)), Mode::Critical);
        assert_eq!(Mode::Critical.after_check(&assess(30.0)), Mode::Normal);
    }

    #[test]
    fn test_interval_per_mode() {
        let settings = MonitoringSettings::default();
        assert_eq!(Mode::Normal.interval(&settings), Duration::from_millis(10_000));
        assert_eq!(Mode::Critical.interval(&settings), Duration::from_millis(2_000));
        assert_eq!(serde_json::to_string(&Mode::Critical).unwrap(), "\"critical\"");
    }
}
