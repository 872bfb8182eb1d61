//! Storage-library side of oomsweep
//!
//! This crate defines what the harness needs from a library under test and
//! provides two implementations:
//! - StorageLibrary / Connection / Statement: the consumed interface
//! - SqliteLibrary: raw SQLite C API (`sqlite` feature)
//! - SimulatedLibrary: in-process engine allocating through the simulated
//!   injector, with optional deliberate defects

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod library;
pub mod simulated;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use library::{Connection, Statement, StorageLibrary};
pub use simulated::{Defect, SimConnection, SimStatement, SimulatedLibrary};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConnection, SqliteLibrary, SqliteStatement};
