//! oomsweep - allocation-failure verification for embedded storage libraries
//!
//! oomsweep runs a storage library under a fault injector that fails heap
//! allocations on a schedule, retries every call until it gets through,
//! and checks that the library kept its contracts: no leaks, a handle
//! exactly when the call succeeded, and transactions that either commit in
//! full or vanish.
//!
//! # Quick Start
//!
//! ```ignore
//! use oomsweep::{Harness, HarnessConfig, Overthrower, SqliteLibrary};
//!
//! let harness = Harness::new(Overthrower::resolve()?, SqliteLibrary, HarnessConfig::default())?;
//! for report in harness.run_all()? {
//!     println!("{}", report);
//! }
//! ```
//!
//! # Architecture
//!
//! - `oomsweep-core`: statuses, errors, configuration
//! - `oomsweep-injector`: injector control and nested pause/resume sessions
//! - `oomsweep-storage`: the library interface, SQLite and simulated libraries
//! - `oomsweep-engine`: retry executor, scenarios, reports

pub use oomsweep_core::{
    HarnessConfig, HarnessError, HarnessResult, InjectorConfig, PauseDuration, RetryPolicy,
    Status, Violation,
};
pub use oomsweep_engine::{Harness, ScenarioKind, ScenarioReport};
pub use oomsweep_injector::{FaultInjector, FaultInjectorSession, Overthrower, SimulatedInjector};
#[cfg(feature = "sqlite")]
pub use oomsweep_storage::SqliteLibrary;
pub use oomsweep_storage::{Defect, SimulatedLibrary, StorageLibrary};
