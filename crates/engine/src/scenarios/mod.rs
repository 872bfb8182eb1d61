//! Scenario drivers
//!
//! Each driver owns its injector sessions from configuration to leak
//! check. Drivers take a prototype injector and clone it per session, so
//! the same code runs against the preloaded injector and the simulated one.

pub mod open_close;
pub mod resistance;

use crate::DatabasePath;
use oomsweep_core::RetryPolicy;
use oomsweep_injector::FaultInjector;
use oomsweep_storage::StorageLibrary;
use std::ffi::CStr;

pub use open_close::OpenCloseSummary;
pub use resistance::ResistanceSummary;

pub(crate) const CREATE_TABLE: &CStr =
    c"CREATE TABLE test_table(a INTEGER PRIMARY KEY AUTOINCREMENT, b, c)";
pub(crate) const CREATE_INDEX: &CStr = c"CREATE INDEX test_idx ON test_table(a, b, c)";
pub(crate) const DROP_INDEX: &CStr = c"DROP INDEX test_idx";
pub(crate) const DROP_TABLE: &CStr = c"DROP TABLE test_table";
pub(crate) const VACUUM: &CStr = c"VACUUM";

/// What every driver needs
#[derive(Debug, Clone)]
pub struct ScenarioContext<I, L> {
    /// Cloned for every session
    pub injector: I,
    /// Library under test
    pub library: L,
    /// Database the scenarios create and delete
    pub database: DatabasePath,
    /// Retry ceiling for every session
    pub retry: RetryPolicy,
}

impl<I: FaultInjector + Clone, L: StorageLibrary> ScenarioContext<I, L> {
    /// Bundle the collaborators
    pub fn new(injector: I, library: L, database: DatabasePath, retry: RetryPolicy) -> Self {
        ScenarioContext {
            injector,
            library,
            database,
            retry,
        }
    }
}

/// Work done by a scenario, kept up to date as it runs so a failing
/// scenario still reports how far it got
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    /// Injector sessions started
    pub sessions: u64,
    /// Library calls made across all sessions
    pub attempts: u64,
}
