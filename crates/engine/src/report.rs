//! Per-scenario pass/fail reports

use crate::scenarios::Tally;
use chrono::{DateTime, Utc};
use oomsweep_core::{HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    /// Fresh open, fixed sequence, close; then the Step sweep
    OpenClose,
    /// Long Random run with implicit and explicit transaction passes
    Resistance,
}

impl ScenarioKind {
    /// Every scenario, in run order
    pub const ALL: [ScenarioKind; 2] = [ScenarioKind::OpenClose, ScenarioKind::Resistance];

    /// Stable name used in logs and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioKind::OpenClose => "open-close",
            ScenarioKind::Resistance => "resistance",
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Outcome of one scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioReport {
    /// Which scenario ran
    pub scenario: ScenarioKind,
    /// `false` if the library under test broke a contract
    pub passed: bool,
    /// Injector sessions started
    pub sessions: u64,
    /// Library calls made
    pub attempts: u64,
    /// First successful Step delay (OpenClose with the sweep enabled)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_sweep_delay: Option<u64>,
    /// The broken contract, for failed scenarios
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violation: Option<String>,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration
    pub elapsed_ms: u64,
}

impl ScenarioReport {
    /// Turn a scenario result into a report.
    ///
    /// A violation becomes a failed report. Every other error is a harness
    /// problem rather than a verdict on the library and is returned as is.
    pub fn from_result(
        scenario: ScenarioKind,
        result: HarnessResult<Option<u64>>,
        tally: Tally,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> HarnessResult<Self> {
        let (step_sweep_delay, violation) = match result {
            Ok(delay) => (delay, None),
            Err(HarnessError::Violation(v)) => (None, Some(v.to_string())),
            Err(e) => return Err(e),
        };
        Ok(ScenarioReport {
            scenario,
            passed: violation.is_none(),
            sessions: tally.sessions,
            attempts: tally.attempts,
            step_sweep_delay,
            violation,
            started_at,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        })
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.passed { "PASS" } else { "FAIL" };
        write!(
            f,
            "{:<11} {} sessions={} attempts={}",
            self.scenario, verdict, self.sessions, self.attempts
        )?;
        if let Some(delay) = self.step_sweep_delay {
            write!(f, " step_sweep_delay={}", delay)?;
        }
        write!(f, " elapsed={}ms", self.elapsed_ms)?;
        if let Some(violation) = &self.violation {
            write!(f, ": {}", violation)?;
        }
        Ok(())
    }
}
