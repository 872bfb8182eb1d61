//! Error types for the harness
//!
//! Three kinds of failure exist and they must never be confused:
//!
//! - Injected allocation failures are *not* errors. They surface as
//!   [`Status::NoMem`](crate::Status::NoMem) and are absorbed by retry.
//! - Usage errors (unbalanced pause/resume, double activation) are defects in
//!   the harness itself.
//! - Violations are defects in the library under test. Detecting them is the
//!   reason the harness exists.
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use crate::Status;
use std::io;
use thiserror::Error;

/// Result type alias for harness operations
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

/// A contract the library under test failed to honour
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    /// A handle was returned (or withheld) in contradiction with the status
    #[error("{operation} returned {status} with handle present={handle_present}")]
    HandleMismatch {
        /// Library operation that produced the handle
        operation: &'static str,
        /// Status the operation reported
        status: Status,
        /// Whether a handle came back
        handle_present: bool,
    },

    /// Allocations made while the injector was active were never freed
    #[error("{blocks} block(s) leaked at deactivation")]
    LeakedBlocks {
        /// Leaked block count reported by the injector
        blocks: u32,
    },

    /// The autocommit flag did not match the expected transaction state
    #[error("transaction state mismatch at {context}: expected autocommit={expected}, got {actual}")]
    TransactionState {
        /// Point in the scenario where the check ran
        context: &'static str,
        /// Expected autocommit flag
        expected: bool,
        /// Observed autocommit flag
        actual: bool,
    },

    /// An operation that must not fail returned something else
    #[error("{operation} returned {actual}, expected {expected}")]
    UnexpectedStatus {
        /// Library operation
        operation: &'static str,
        /// Required status
        expected: Status,
        /// Observed status
        actual: Status,
    },

    /// The table holds a different number of rows than committed
    #[error("row count mismatch at {context}: expected {expected}, got {actual}")]
    RowCount {
        /// Point in the scenario where the count was taken
        context: &'static str,
        /// Rows that should be visible
        expected: i64,
        /// Rows actually visible
        actual: i64,
    },
}

/// Error type for harness operations
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Harness-internal protocol misuse (a bug in the harness)
    #[error("Usage error: {0}")]
    Usage(String),

    /// The library under test broke a contract
    #[error("Verification failed: {0}")]
    Violation(#[from] Violation),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An operation never reached its expected status within the retry ceiling
    #[error("Retry budget exhausted after {attempts} attempt(s): expected {expected}, last status {last}")]
    RetryBudgetExhausted {
        /// Attempts made
        attempts: u64,
        /// Status the executor was waiting for
        expected: Status,
        /// Status of the final attempt
        last: Status,
    },

    /// The fault injector's control interface could not be bound
    #[error("Fault injector unavailable: {0}")]
    InjectorUnavailable(String),

    /// I/O error (database file cleanup, config files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl HarnessError {
    /// Create a usage error
    pub fn usage(msg: impl Into<String>) -> Self {
        HarnessError::Usage(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        HarnessError::Configuration(msg.into())
    }

    /// The violation carried by this error, if it is one
    pub fn violation(&self) -> Option<&Violation> {
        match self {
            HarnessError::Violation(v) => Some(v),
            _ => None,
        }
    }

    /// `true` if this error reports a defect in the library under test
    pub fn is_violation(&self) -> bool {
        self.violation().is_some()
    }
}
