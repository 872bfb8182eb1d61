//! Harness Comprehensive Test Suite
//!
//! End-to-end runs of the harness through its public facade.
//!
//! ## Modules
//!
//! - `simulated`: every scenario against the simulated library, including
//!   the defects each scenario must catch
//! - `config`: configuration files driving a run
//! - `preloaded`: the real injector and SQLite (ignored unless the injector
//!   is preloaded)
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test harness_comprehensive
//!
//! # With the injector preloaded
//! LD_PRELOAD=/path/to/liboverthrower.so cargo test --test harness_comprehensive -- --ignored
//! ```

use oomsweep::{
    Defect, Harness, HarnessConfig, ScenarioKind, ScenarioReport, SimulatedInjector,
    SimulatedLibrary,
};

mod config;
mod preloaded;
mod simulated;

/// Small but complete configuration
fn quick_config() -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.open_close.iteration_count = 10;
    config.resistance.rows_to_insert = 15;
    config.resistance.seed = Some(21);
    config
}

/// Harness over a fresh simulated pair
fn simulated_harness(
    config: HarnessConfig,
    defects: &[Defect],
) -> Harness<SimulatedInjector, SimulatedLibrary> {
    let injector = SimulatedInjector::seeded(2024);
    let library = defects
        .iter()
        .fold(SimulatedLibrary::new(injector.gate()), |lib, &d| lib.with_defect(d));
    Harness::new(injector, library, config).unwrap()
}

fn report_for(reports: &[ScenarioReport], kind: ScenarioKind) -> &ScenarioReport {
    reports.iter().find(|r| r.scenario == kind).unwrap()
}
