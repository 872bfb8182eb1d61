//! Result codes reported by the storage library under test
//!
//! Every library call the harness makes returns one of a closed set of
//! outcomes. The raw integer codes follow the SQLite numbering, which is the
//! library the harness was built against; extended codes are reduced to
//! their primary code by masking the low byte.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw code for a successful call.
pub const CODE_OK: i32 = 0;
/// Raw code for a generic error.
pub const CODE_ERROR: i32 = 1;
/// Raw code for a busy database (e.g. close with outstanding statements).
pub const CODE_BUSY: i32 = 5;
/// Raw code for an out-of-memory failure.
pub const CODE_NOMEM: i32 = 7;
/// Raw code for a violated constraint.
pub const CODE_CONSTRAINT: i32 = 19;
/// Raw code for misuse of the library interface.
pub const CODE_MISUSE: i32 = 21;
/// Raw code for a parameter index out of range.
pub const CODE_RANGE: i32 = 25;
/// Raw code for "a row is available".
pub const CODE_ROW: i32 = 100;
/// Raw code for "statement finished".
pub const CODE_DONE: i32 = 101;

/// Outcome of a single library call
///
/// `NoMem` is the only outcome the harness treats as an expected transient
/// failure. Anything in `Error` is compared literally against the expected
/// status and never retried into success by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// The call succeeded
    Ok,
    /// An allocation inside the call failed
    NoMem,
    /// Any other failure, carrying the primary result code
    Error(i32),
    /// A result row is available
    Row,
    /// The statement ran to completion
    Done,
}

impl Status {
    /// Convert a raw library result code
    pub fn from_code(code: i32) -> Self {
        match code & 0xff {
            CODE_OK => Status::Ok,
            CODE_NOMEM => Status::NoMem,
            CODE_ROW => Status::Row,
            CODE_DONE => Status::Done,
            other => Status::Error(other),
        }
    }

    /// Raw primary result code for this status
    pub fn code(self) -> i32 {
        match self {
            Status::Ok => CODE_OK,
            Status::NoMem => CODE_NOMEM,
            Status::Error(code) => code,
            Status::Row => CODE_ROW,
            Status::Done => CODE_DONE,
        }
    }

    /// `true` for [`Status::Ok`]
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    /// `true` for [`Status::NoMem`]
    pub fn is_nomem(self) -> bool {
        self == Status::NoMem
    }

    /// `true` when the call completed without error (`Ok`, `Row` or `Done`)
    pub fn is_success(self) -> bool {
        matches!(self, Status::Ok | Status::Row | Status::Done)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "OK"),
            Status::NoMem => write!(f, "NOMEM"),
            Status::Error(code) => write!(f, "ERROR({})", code),
            Status::Row => write!(f, "ROW"),
            Status::Done => write!(f, "DONE"),
        }
    }
}
