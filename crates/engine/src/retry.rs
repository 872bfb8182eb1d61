//! Retry-until-success executor
//!
//! An operation is invoked repeatedly until it reports the expected status.
//! Attempt `i` runs inside a pause that shields the next `i` allocation
//! decisions, so the first attempt sees full injection and every later one
//! gets a little more room. Any operation whose allocation count is finite
//! therefore completes eventually; the
//! [`RetryPolicy`](oomsweep_core::RetryPolicy) ceiling turns an
//! operation that never does into an error instead of a hang.
//!
//! Handle-returning calls (`open`, `prepare`) go through [`execute`] with a
//! settle step that checks the status/handle pairing after every attempt.

use crate::DatabasePath;
use oomsweep_core::{HarnessError, HarnessResult, PauseDuration, Status, Violation};
use oomsweep_injector::{FaultInjector, FaultInjectorSession};
use oomsweep_storage::{Connection, Statement, StorageLibrary};
use std::ffi::CStr;
use tracing::debug;

/// How many times an operation is invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Until the expected status is reached, with growing grace windows
    UntilExpected,
    /// Exactly once, without a pause region of its own
    Once,
}

impl Mode {
    /// `Once` when `single` is set
    pub fn single_attempt(single: bool) -> Self {
        if single {
            Mode::Once
        } else {
            Mode::UntilExpected
        }
    }
}

/// Final state of a driven operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// Whether the final status equals the expected one
    pub matched: bool,
    /// Status of the final attempt
    pub status: Status,
    /// Invocations made
    pub attempts: u64,
}

/// Drive `op` according to `mode`.
///
/// `op` runs with injection active (inside the attempt's grace window) and
/// returns a status plus whatever else the call produced; `settle` then
/// receives both outside the window, before the next attempt.
///
/// # Errors
///
/// Whatever `op` or `settle` return, or `RetryBudgetExhausted` once the
/// session's retry ceiling is reached without a match.
pub fn execute<I, T>(
    session: &mut FaultInjectorSession<I>,
    mode: Mode,
    expected: Status,
    mut op: impl FnMut(&mut FaultInjectorSession<I>) -> HarnessResult<(Status, T)>,
    mut settle: impl FnMut(&mut FaultInjectorSession<I>, Status, T) -> HarnessResult<()>,
) -> HarnessResult<Outcome>
where
    I: FaultInjector,
{
    if mode == Mode::Once {
        let (status, output) = op(session)?;
        session.record_attempts(1);
        settle(session, status, output)?;
        return Ok(Outcome {
            matched: status == expected,
            status,
            attempts: 1,
        });
    }

    let ceiling = session.retry_policy().ceiling();
    let mut attempts = 0u64;
    loop {
        let (status, output) = {
            let mut grace = session.pause(PauseDuration::grace(attempts));
            op(&mut *grace)?
        };
        attempts += 1;
        session.record_attempts(1);
        settle(session, status, output)?;

        if status == expected {
            if attempts > 1 {
                session.quietly(|| {
                    debug!(target: "oomsweep::retry", attempts, %expected, "Reached expected status");
                });
            }
            return Ok(Outcome {
                matched: true,
                status,
                attempts,
            });
        }
        if ceiling.is_some_and(|max| attempts >= max) {
            return Err(session.quietly(|| {
                debug!(target: "oomsweep::retry", attempts, %expected, last = %status, "Retry budget exhausted");
                HarnessError::RetryBudgetExhausted {
                    attempts,
                    expected,
                    last: status,
                }
            }));
        }
    }
}

/// Drive a status-only operation according to `mode`
pub fn run<I: FaultInjector>(
    session: &mut FaultInjectorSession<I>,
    mode: Mode,
    expected: Status,
    mut op: impl FnMut() -> Status,
) -> HarnessResult<Outcome> {
    execute(session, mode, expected, |_| Ok((op(), ())), |_, _, ()| Ok(()))
}

/// Invoke `op` until it reports `expected`
pub fn retry<I: FaultInjector>(
    session: &mut FaultInjectorSession<I>,
    expected: Status,
    op: impl FnMut() -> Status,
) -> HarnessResult<Outcome> {
    run(session, Mode::UntilExpected, expected, op)
}

/// Invoke `op` once and report whether it matched
pub fn attempt_once<I: FaultInjector>(
    session: &mut FaultInjectorSession<I>,
    expected: Status,
    op: impl FnMut() -> Status,
) -> HarnessResult<Outcome> {
    run(session, Mode::Once, expected, op)
}

/// Execute `sql` until it succeeds
pub fn retry_exec<I: FaultInjector, C: Connection>(
    session: &mut FaultInjectorSession<I>,
    conn: &mut C,
    sql: &CStr,
) -> HarnessResult<Outcome> {
    retry(session, Status::Ok, || conn.exec(sql))
}

/// Check one handle-returning attempt and release handles that must not
/// be kept. Returns the handle when the attempt succeeded.
fn settle_handle<I: FaultInjector, H>(
    session: &mut FaultInjectorSession<I>,
    operation: &'static str,
    release_operation: &'static str,
    status: Status,
    handle: Option<H>,
    release: impl FnOnce(H) -> Status,
) -> HarnessResult<Option<H>> {
    let present = handle.is_some();
    let paired = match status {
        Status::NoMem => !present,
        Status::Ok => present,
        _ => true,
    };
    session.ensure(paired, || Violation::HandleMismatch {
        operation,
        status,
        handle_present: present,
    })?;

    match handle {
        Some(handle) if status != Status::Ok => {
            let released = session.quietly(|| release(handle));
            session.ensure(released == Status::Ok, || Violation::UnexpectedStatus {
                operation: release_operation,
                expected: Status::Ok,
                actual: released,
            })?;
            Ok(None)
        }
        handle => Ok(handle),
    }
}

/// Open a fresh database until a connection is obtained.
///
/// The database is removed before every attempt, so each attempt starts
/// from nothing.
///
/// # Errors
///
/// `HandleMismatch` if an attempt breaks the open contract, plus the
/// executor's errors.
pub fn retry_open_fresh<I, L>(
    session: &mut FaultInjectorSession<I>,
    library: &L,
    db: &DatabasePath,
) -> HarnessResult<L::Connection>
where
    I: FaultInjector,
    L: StorageLibrary,
{
    let mut opened = None;
    let outcome = execute(
        session,
        Mode::UntilExpected,
        Status::Ok,
        |session| {
            db.remove(session, library)?;
            Ok(library.open(db.as_c_str()))
        },
        |session, status, handle| {
            opened = settle_handle(session, "open", "close", status, handle, |c: L::Connection| {
                c.close()
            })?;
            Ok(())
        },
    )?;
    require_handle(session, "open", outcome.status, opened)
}

/// Prepare `sql` until a statement is obtained
pub fn retry_prepare<I, C>(
    session: &mut FaultInjectorSession<I>,
    conn: &mut C,
    sql: &CStr,
) -> HarnessResult<C::Statement>
where
    I: FaultInjector,
    C: Connection,
{
    let mut prepared = None;
    let outcome = execute(
        session,
        Mode::UntilExpected,
        Status::Ok,
        |_| Ok(conn.prepare(sql)),
        |session, status, handle| {
            prepared = settle_handle(session, "prepare", "finalize", status, handle, |s: C::Statement| {
                s.finalize()
            })?;
            Ok(())
        },
    )?;
    require_handle(session, "prepare", outcome.status, prepared)
}

fn require_handle<I: FaultInjector, H>(
    session: &mut FaultInjectorSession<I>,
    operation: &'static str,
    status: Status,
    handle: Option<H>,
) -> HarnessResult<H> {
    match handle {
        Some(handle) => Ok(handle),
        None => Err(session.violated(|| Violation::HandleMismatch {
            operation,
            status,
            handle_present: false,
        })),
    }
}
