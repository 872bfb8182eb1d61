//! Verification engine for allocation-failure handling
//!
//! This crate drives a storage library under a fault injector:
//! - Retry executor: repeat a call with growing grace windows until it
//!   reaches its expected status
//! - Scenario drivers: OpenClose (with the Step sweep) and Resistance
//! - Reports: one pass/fail verdict per scenario
//!
//! Injected failures are absorbed; broken contracts surface as
//! [`Violation`](oomsweep_core::Violation)s in the reports.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod db_path;
pub mod harness;
pub mod report;
pub mod retry;
pub mod scenarios;

pub use db_path::DatabasePath;
pub use harness::Harness;
pub use report::{ScenarioKind, ScenarioReport};
pub use retry::{Mode, Outcome};
pub use scenarios::{OpenCloseSummary, ResistanceSummary, ScenarioContext, Tally};
