//! Resistance: a long workload under frequent random failure
//!
//! One Random activation covers everything: open, schema creation, seed
//! rows, two passes of a prepared insert, and teardown. Every call is
//! retried until it succeeds, so the scenario always completes; what it
//! verifies is that the library's state stays consistent along the way.
//!
//! The second pass inserts a whole batch inside one explicit transaction.
//! A batch that fails part-way must vanish completely, either because the
//! library rolled it back on its own or because the driver did; the batch
//! is then repeated with a grace window one decision larger. A COMMIT that
//! runs out of memory may also take the batch with it, so the commit
//! belongs to the batch attempt.

use super::{ScenarioContext, Tally, CREATE_INDEX, CREATE_TABLE, DROP_INDEX, DROP_TABLE, VACUUM};
use crate::retry::{self, Mode, Outcome};
use oomsweep_core::{
    HarnessError, HarnessResult, InjectorConfig, PauseDuration, ResistanceConfig, Status,
    Violation,
};
use oomsweep_injector::{FaultInjector, FaultInjectorSession};
use oomsweep_storage::{Connection, Statement, StorageLibrary};
use std::ffi::CStr;
use tracing::{debug, info};

const INSERT_SEED_ROW: &CStr = c"INSERT INTO test_table(b, c) VALUES (1, 2)";
const INSERT_PREPARED: &CStr = c"INSERT INTO test_table(b, c) VALUES (?, ?)";
const COUNT_ROWS: &CStr = c"SELECT count(*) FROM test_table";
const BEGIN: &CStr = c"BEGIN TRANSACTION";
const ROLLBACK: &CStr = c"ROLLBACK TRANSACTION";
const END: &CStr = c"END TRANSACTION";

/// Text bound to the second parameter of every prepared insert
pub const BOUND_TEXT: &str = "AAAAAAAAAAAAAAAA";

/// Result of a passing Resistance scenario
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResistanceSummary {
    /// Rows in the table before teardown
    pub rows: i64,
    /// Attempts at the explicit-transaction batch (1 if the first committed)
    pub batch_attempts: u64,
}

/// Run the whole scenario.
///
/// # Errors
///
/// Any violation, or `RetryBudgetExhausted` if an operation (or the batch)
/// never succeeds within the retry ceiling.
pub fn run<I, L>(
    ctx: &ScenarioContext<I, L>,
    config: &ResistanceConfig,
    tally: &mut Tally,
) -> HarnessResult<ResistanceSummary>
where
    I: FaultInjector + Clone,
    L: StorageLibrary,
{
    let strategy = InjectorConfig::random(config.duty_cycle, config.seed);
    let mut session = FaultInjectorSession::new(ctx.injector.clone(), strategy, ctx.retry)?;
    tally.sessions += 1;
    session.activate()?;
    let result = exercise(ctx, config, &mut session);
    tally.attempts += session.attempts();
    let summary = result?;
    session.finish()?;

    info!(
        target: "oomsweep::scenario",
        rows = summary.rows,
        batch_attempts = summary.batch_attempts,
        attempts = tally.attempts,
        "Resistance passed"
    );
    Ok(summary)
}

fn exercise<I, L>(
    ctx: &ScenarioContext<I, L>,
    config: &ResistanceConfig,
    session: &mut FaultInjectorSession<I>,
) -> HarnessResult<ResistanceSummary>
where
    I: FaultInjector,
    L: StorageLibrary,
{
    let rows = i64::from(config.rows_to_insert);
    let mut conn = retry::retry_open_fresh(session, &ctx.library, &ctx.database)?;

    retry::retry_exec(session, &mut conn, CREATE_TABLE)?;
    retry::retry_exec(session, &mut conn, CREATE_INDEX)?;
    for _ in 0..config.rows_to_insert {
        retry::retry_exec(session, &mut conn, INSERT_SEED_ROW)?;
    }
    verify_row_count(session, &mut conn, "after seed inserts", rows)?;

    let mut stmt = retry::retry_prepare(session, &mut conn, INSERT_PREPARED)?;
    for _ in 0..config.rows_to_insert {
        insert_row(session, &mut stmt, Mode::UntilExpected)?;
    }
    finalize(session, stmt)?;
    verify_row_count(session, &mut conn, "after implicit pass", 2 * rows)?;

    let mut stmt = retry::retry_prepare(session, &mut conn, INSERT_PREPARED)?;
    let batch_attempts = insert_batch(session, &mut conn, &mut stmt, config.rows_to_insert)?;
    finalize(session, stmt)?;
    verify_row_count(session, &mut conn, "after explicit pass", 3 * rows)?;

    retry::retry_exec(session, &mut conn, DROP_INDEX)?;
    retry::retry_exec(session, &mut conn, DROP_TABLE)?;
    retry::retry_exec(session, &mut conn, VACUUM)?;

    let closed = conn.close();
    session.record_attempts(1);
    session.ensure(closed == Status::Ok, || Violation::UnexpectedStatus {
        operation: "close",
        expected: Status::Ok,
        actual: closed,
    })?;

    Ok(ResistanceSummary {
        rows: 3 * rows,
        batch_attempts,
    })
}

/// reset, bind, bind, step; stops at the first call that misses its status
fn insert_row<I: FaultInjector, S: Statement>(
    session: &mut FaultInjectorSession<I>,
    stmt: &mut S,
    mode: Mode,
) -> HarnessResult<Outcome> {
    let outcome = retry::run(session, mode, Status::Ok, || stmt.reset())?;
    if !outcome.matched {
        return Ok(outcome);
    }
    let outcome = retry::run(session, mode, Status::Ok, || stmt.bind_int(1, 1))?;
    if !outcome.matched {
        return Ok(outcome);
    }
    let outcome = retry::run(session, mode, Status::Ok, || stmt.bind_text(2, BOUND_TEXT))?;
    if !outcome.matched {
        return Ok(outcome);
    }
    retry::run(session, mode, Status::Done, || stmt.step())
}

/// Insert and commit `rows` rows in one explicit transaction, repeating the
/// batch until it survives. Returns the number of batch attempts.
fn insert_batch<I, C>(
    session: &mut FaultInjectorSession<I>,
    conn: &mut C,
    stmt: &mut C::Statement,
    rows: u32,
) -> HarnessResult<u64>
where
    I: FaultInjector,
    C: Connection,
{
    let ceiling = session.retry_policy().ceiling();
    let mut index = 0u64;
    loop {
        expect_autocommit(session, conn, "before BEGIN", true)?;
        retry::retry_exec(session, conn, BEGIN)?;
        expect_autocommit(session, conn, "after BEGIN", false)?;

        let mut last = Status::Ok;
        {
            let mut window = session.pause(PauseDuration::grace(index));
            for _ in 0..rows {
                let outcome = insert_row(&mut *window, stmt, Mode::Once)?;
                last = outcome.status;
                if !outcome.matched {
                    break;
                }
            }
        }

        if !matches!(last, Status::Ok | Status::Done) {
            if !conn.autocommit() {
                retry::retry_exec(session, conn, ROLLBACK)?;
                expect_autocommit(session, conn, "after ROLLBACK", true)?;
            }
        } else if !conn.autocommit() {
            match commit(session, conn)? {
                Status::Ok => {
                    expect_autocommit(session, conn, "after END", true)?;
                    return Ok(index + 1);
                }
                status => last = status,
            }
        }
        index += 1;

        let attempts = index;
        session.quietly(|| {
            debug!(target: "oomsweep::scenario", attempts, last = %last, "Batch rolled back");
        });
        if ceiling.is_some_and(|max| index >= max) {
            return Err(session.quietly(|| HarnessError::RetryBudgetExhausted {
                attempts,
                expected: Status::Done,
                last,
            }));
        }
    }
}

/// END the open transaction, retrying while it stays open.
///
/// Returns `Ok` once committed, or the failing status of the attempt that
/// ended the transaction by rolling it back.
fn commit<I: FaultInjector, C: Connection>(
    session: &mut FaultInjectorSession<I>,
    conn: &mut C,
) -> HarnessResult<Status> {
    let ceiling = session.retry_policy().ceiling();
    let mut attempts = 0u64;
    loop {
        let status = {
            let _grace = session.pause(PauseDuration::grace(attempts));
            conn.exec(END)
        };
        attempts += 1;
        session.record_attempts(1);
        if status == Status::Ok || conn.autocommit() {
            return Ok(status);
        }
        if ceiling.is_some_and(|max| attempts >= max) {
            return Err(session.quietly(|| HarnessError::RetryBudgetExhausted {
                attempts,
                expected: Status::Ok,
                last: status,
            }));
        }
    }
}

fn finalize<I: FaultInjector, S: Statement>(
    session: &mut FaultInjectorSession<I>,
    stmt: S,
) -> HarnessResult<()> {
    let status = stmt.finalize();
    session.record_attempts(1);
    session.ensure(status == Status::Ok, || Violation::UnexpectedStatus {
        operation: "finalize",
        expected: Status::Ok,
        actual: status,
    })
}

fn expect_autocommit<I: FaultInjector, C: Connection>(
    session: &mut FaultInjectorSession<I>,
    conn: &C,
    context: &'static str,
    expected: bool,
) -> HarnessResult<()> {
    let actual = conn.autocommit();
    session.ensure(actual == expected, || Violation::TransactionState {
        context,
        expected,
        actual,
    })
}

/// Count the table's rows (retried like any other call) and compare
fn verify_row_count<I: FaultInjector, C: Connection>(
    session: &mut FaultInjectorSession<I>,
    conn: &mut C,
    context: &'static str,
    expected: i64,
) -> HarnessResult<()> {
    let mut stmt = retry::retry_prepare(session, conn, COUNT_ROWS)?;
    retry::retry(session, Status::Row, || stmt.step())?;
    let actual = stmt.column_int(0);
    finalize(session, stmt)?;
    session.ensure(actual == expected, || Violation::RowCount {
        context,
        expected,
        actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DatabasePath;
    use oomsweep_core::RetryPolicy;
    use oomsweep_injector::SimulatedInjector;
    use oomsweep_storage::{Defect, SimConnection, SimStatement, SimulatedLibrary};
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails the first `remaining` ENDs the way SQLite does when the commit
    /// itself runs out of memory: the transaction is rolled back.
    #[derive(Debug, Clone)]
    struct LosingCommits {
        inner: SimulatedLibrary,
        remaining: Arc<AtomicU32>,
    }

    struct LosingConnection {
        inner: SimConnection,
        remaining: Arc<AtomicU32>,
    }

    impl StorageLibrary for LosingCommits {
        type Connection = LosingConnection;

        fn open(&self, path: &CStr) -> (Status, Option<LosingConnection>) {
            let (status, conn) = self.inner.open(path);
            let remaining = Arc::clone(&self.remaining);
            (status, conn.map(|inner| LosingConnection { inner, remaining }))
        }

        fn remove_database(&self, path: &Path) -> std::io::Result<()> {
            self.inner.remove_database(path)
        }
    }

    impl Connection for LosingConnection {
        type Statement = SimStatement;

        fn exec(&mut self, sql: &CStr) -> Status {
            let losing = sql == END
                && self
                    .remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
            if !losing {
                return self.inner.exec(sql);
            }
            while !self.inner.autocommit() {
                self.inner.exec(ROLLBACK);
            }
            Status::NoMem
        }

        fn prepare(&mut self, sql: &CStr) -> (Status, Option<Self::Statement>) {
            self.inner.prepare(sql)
        }

        fn autocommit(&self) -> bool {
            self.inner.autocommit()
        }

        fn close(self) -> Status {
            self.inner.close()
        }
    }

    fn context(library: impl FnOnce(SimulatedLibrary) -> SimulatedLibrary) -> ScenarioContext<SimulatedInjector, SimulatedLibrary> {
        let injector = SimulatedInjector::seeded(17);
        let library = library(SimulatedLibrary::new(injector.gate()));
        ScenarioContext::new(
            injector,
            library,
            DatabasePath::new("resistance.db").unwrap(),
            RetryPolicy::default(),
        )
    }

    fn config(rows: u32) -> ResistanceConfig {
        ResistanceConfig {
            rows_to_insert: rows,
            duty_cycle: 2,
            seed: Some(5),
        }
    }

    #[test]
    fn test_resistance_passes_on_a_correct_library() {
        let ctx = context(|l| l);
        let mut tally = Tally::default();
        let summary = run(&ctx, &config(20), &mut tally).unwrap();
        assert_eq!(summary.rows, 60);
        assert!(summary.batch_attempts >= 1);
        assert_eq!(tally.sessions, 1);
        assert!(tally.attempts > 0);
    }

    #[test]
    fn test_ignored_begin_is_a_transaction_state_violation() {
        let ctx = context(|l| l.with_defect(Defect::IgnoreBegin));
        let err = run(&ctx, &config(5), &mut Tally::default()).unwrap_err();
        assert_eq!(
            err.violation(),
            Some(&Violation::TransactionState {
                context: "after BEGIN",
                expected: false,
                actual: true,
            })
        );
    }

    #[test]
    fn test_commit_that_rolls_back_repeats_the_batch() {
        let injector = SimulatedInjector::seeded(17);
        let library = LosingCommits {
            inner: SimulatedLibrary::new(injector.gate()),
            remaining: Arc::new(AtomicU32::new(2)),
        };
        let ctx = ScenarioContext::new(
            injector,
            library.clone(),
            DatabasePath::new("resistance.db").unwrap(),
            RetryPolicy::bounded(1_000),
        );
        let summary = run(&ctx, &config(20), &mut Tally::default()).unwrap();
        assert_eq!(summary.rows, 60);
        assert!(summary.batch_attempts >= 3);
        assert_eq!(library.remaining.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_ignored_rollback_is_a_transaction_state_violation() {
        let ctx = context(|l| l.with_defect(Defect::IgnoreRollback));
        let err = run(&ctx, &config(20), &mut Tally::default()).unwrap_err();
        assert_eq!(
            err.violation(),
            Some(&Violation::TransactionState {
                context: "after ROLLBACK",
                expected: true,
                actual: false,
            })
        );
    }

    #[test]
    fn test_ignored_commit_is_a_transaction_state_violation() {
        let ctx = context(|l| l.with_defect(Defect::IgnoreCommit));
        let err = run(&ctx, &config(5), &mut Tally::default()).unwrap_err();
        assert_eq!(
            err.violation(),
            Some(&Violation::TransactionState {
                context: "after END",
                expected: true,
                actual: false,
            })
        );
    }

    #[test]
    fn test_leaking_close_is_reported() {
        let ctx = context(|l| l.with_defect(Defect::LeakOnClose));
        let err = run(&ctx, &config(5), &mut Tally::default()).unwrap_err();
        assert!(matches!(err.violation(), Some(Violation::LeakedBlocks { .. })));
    }
}
