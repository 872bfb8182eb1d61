//! Storage-library interface consumed by the harness
//!
//! Three traits mirror the library's C surface: a library that opens
//! connections, connections that execute and prepare SQL, and prepared
//! statements. Every call reports a [`Status`]; nothing here returns
//! `Result`, because an out-of-memory status is an expected outcome under
//! injection rather than an error.
//!
//! SQL and paths are `&CStr` so callers can build them before injection
//! starts; bound text is `&'static str` so the library may reference it
//! without copying.

use oomsweep_core::Status;
use std::ffi::CStr;
use std::io;
use std::path::Path;

/// A storage library that can open database connections
pub trait StorageLibrary {
    /// Connection handle type
    type Connection: Connection;

    /// Open (creating if necessary) the database at `path`.
    ///
    /// Contract: `NoMem` comes with no handle; every other status comes
    /// with one, which the caller must close.
    fn open(&self, path: &CStr) -> (Status, Option<Self::Connection>);

    /// Delete the database at `path` if it exists
    fn remove_database(&self, path: &Path) -> io::Result<()> {
        match std::fs::remove_file(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// An open database connection
pub trait Connection {
    /// Prepared statement type
    type Statement: Statement;

    /// Execute one SQL statement to completion
    fn exec(&mut self, sql: &CStr) -> Status;

    /// Compile one SQL statement.
    ///
    /// Contract: `Ok` comes with a statement; any other status without.
    fn prepare(&mut self, sql: &CStr) -> (Status, Option<Self::Statement>);

    /// `true` outside an explicit transaction
    fn autocommit(&self) -> bool;

    /// Close the connection. Outstanding statements make this fail with a
    /// busy status; the connection is then released once they are
    /// finalized.
    fn close(self) -> Status;
}

/// A prepared statement
pub trait Statement {
    /// Rewind for another execution. Reports the error of the previous
    /// step, if it failed.
    fn reset(&mut self) -> Status;

    /// Bind an integer to the 1-based parameter `index`
    fn bind_int(&mut self, index: i32, value: i64) -> Status;

    /// Bind text to the 1-based parameter `index`
    fn bind_text(&mut self, index: i32, value: &'static str) -> Status;

    /// Advance execution: `Row`, `Done`, or a failure
    fn step(&mut self) -> Status;

    /// Integer value of `column` in the current row
    fn column_int(&self, column: i32) -> i64;

    /// Destroy the statement
    fn finalize(self) -> Status;
}
