//! Top-level runner
//!
//! [`Harness`] binds an injector and a library to a [`HarnessConfig`] and
//! runs scenarios by name, turning each outcome into a [`ScenarioReport`].

use crate::report::{ScenarioKind, ScenarioReport};
use crate::scenarios::{open_close, resistance, ScenarioContext, Tally};
use crate::DatabasePath;
use chrono::Utc;
use oomsweep_core::{HarnessConfig, HarnessResult};
use oomsweep_injector::FaultInjector;
use oomsweep_storage::StorageLibrary;
use std::time::Instant;
use tracing::{info, warn};

/// Scenario runner
#[derive(Debug)]
pub struct Harness<I, L> {
    context: ScenarioContext<I, L>,
    config: HarnessConfig,
}

impl<I, L> Harness<I, L>
where
    I: FaultInjector + Clone,
    L: StorageLibrary,
{
    /// Validate `config` and bind the collaborators.
    ///
    /// `injector` is a prototype: every session works on a clone of it.
    ///
    /// # Errors
    ///
    /// Configuration error for invalid settings or an unusable database path.
    pub fn new(injector: I, library: L, config: HarnessConfig) -> HarnessResult<Self> {
        config.validate()?;
        let database = DatabasePath::new(config.database_path.clone())?;
        let context = ScenarioContext::new(injector, library, database, config.retry);
        Ok(Harness { context, config })
    }

    /// Configuration in effect
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Collaborators handed to the scenario drivers
    pub fn context(&self) -> &ScenarioContext<I, L> {
        &self.context
    }

    /// Run one scenario.
    ///
    /// # Errors
    ///
    /// Harness errors (usage, configuration, retry budget, I/O). A broken
    /// library contract is a failed report, not an error.
    pub fn run(&self, scenario: ScenarioKind) -> HarnessResult<ScenarioReport> {
        info!(target: "oomsweep::scenario", %scenario, "Starting scenario");
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut tally = Tally::default();

        let result = match scenario {
            ScenarioKind::OpenClose => {
                open_close::run(&self.context, &self.config.open_close, &mut tally)
                    .map(|summary| summary.step_sweep_delay)
            }
            ScenarioKind::Resistance => {
                resistance::run(&self.context, &self.config.resistance, &mut tally).map(|_| None)
            }
        };

        let report = ScenarioReport::from_result(scenario, result, tally, started_at, clock.elapsed())?;
        if let Some(violation) = &report.violation {
            warn!(target: "oomsweep::scenario", %scenario, %violation, "Scenario failed");
        }
        Ok(report)
    }

    /// Run `scenarios` in order, continuing past failed ones
    pub fn run_many(&self, scenarios: &[ScenarioKind]) -> HarnessResult<Vec<ScenarioReport>> {
        scenarios.iter().map(|&scenario| self.run(scenario)).collect()
    }

    /// Run every scenario
    pub fn run_all(&self) -> HarnessResult<Vec<ScenarioReport>> {
        self.run_many(&ScenarioKind::ALL)
    }
}
