//! OpenClose: a full database lifecycle under injection
//!
//! Each run opens a fresh database, walks it through a fixed schema
//! lifecycle and closes it, with no retries: the library must either fail
//! early and cleanly or succeed, and in both cases free everything.
//!
//! The scenario first repeats the run under the injector's default strategy,
//! then sweeps the Step strategy from delay 0 upward. Every delay below the
//! run's total allocation count fails exactly one allocation and everything
//! after it; the first delay at which the run succeeds is reported.

use super::{ScenarioContext, Tally, CREATE_INDEX, CREATE_TABLE, DROP_INDEX, DROP_TABLE, VACUUM};
use oomsweep_core::{
    HarnessError, HarnessResult, InjectorConfig, OpenCloseConfig, Status, Violation,
};
use oomsweep_injector::{FaultInjector, FaultInjectorSession};
use oomsweep_storage::{Connection, StorageLibrary};
use std::ffi::CStr;
use tracing::{debug, info, trace};

/// Statements run on every successfully opened handle, in order
pub const SEQUENCE: [&CStr; 6] = [
    CREATE_TABLE,
    CREATE_INDEX,
    c"INSERT INTO test_table(b, c) VALUES (1, 2), (3, 4), (5, 6)",
    DROP_INDEX,
    DROP_TABLE,
    VACUUM,
];

/// Result of a passing OpenClose scenario
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenCloseSummary {
    /// Runs under the default strategy
    pub repetitions: u32,
    /// First Step delay with a fully successful run, if the sweep ran
    pub step_sweep_delay: Option<u64>,
}

/// Run the whole scenario.
///
/// # Errors
///
/// A violation from any run, or a configuration error when the sweep
/// exceeds `max_step_delay`.
pub fn run<I, L>(
    ctx: &ScenarioContext<I, L>,
    config: &OpenCloseConfig,
    tally: &mut Tally,
) -> HarnessResult<OpenCloseSummary>
where
    I: FaultInjector + Clone,
    L: StorageLibrary,
{
    for repetition in 0..config.iteration_count {
        let status = run_once(ctx, InjectorConfig::default(), tally)?;
        trace!(target: "oomsweep::scenario", repetition, %status, "OpenClose repetition finished");
    }

    let step_sweep_delay = if config.step_sweep {
        Some(sweep(ctx, config.max_step_delay, tally)?)
    } else {
        None
    };

    info!(
        target: "oomsweep::scenario",
        repetitions = config.iteration_count,
        ?step_sweep_delay,
        sessions = tally.sessions,
        "OpenClose passed"
    );
    Ok(OpenCloseSummary {
        repetitions: config.iteration_count,
        step_sweep_delay,
    })
}

/// Step sweep: the smallest delay whose run succeeds
///
/// # Errors
///
/// Configuration error if no delay up to `max_delay` succeeds.
pub fn sweep<I, L>(
    ctx: &ScenarioContext<I, L>,
    max_delay: u64,
    tally: &mut Tally,
) -> HarnessResult<u64>
where
    I: FaultInjector + Clone,
    L: StorageLibrary,
{
    for delay in 0..=max_delay {
        let status = run_step(ctx, delay, tally)?;
        trace!(target: "oomsweep::scenario", delay, %status, "Step run finished");
        if status == Status::Ok {
            debug!(target: "oomsweep::scenario", delay, "Step sweep reached success");
            return Ok(delay);
        }
    }
    Err(HarnessError::config(format!(
        "no OpenClose run succeeded with a step delay up to {}",
        max_delay
    )))
}

/// One run with the Step strategy at `delay`
pub fn run_step<I, L>(ctx: &ScenarioContext<I, L>, delay: u64, tally: &mut Tally) -> HarnessResult<Status>
where
    I: FaultInjector + Clone,
    L: StorageLibrary,
{
    run_once(ctx, InjectorConfig::step(delay), tally)
}

/// One run under `config`: returns the combined status of open and the
/// sequence (`Ok` only if every call succeeded).
///
/// # Errors
///
/// `HandleMismatch` if open breaks its contract, `UnexpectedStatus` if
/// close fails, `LeakedBlocks` if anything was left allocated.
pub fn run_once<I, L>(
    ctx: &ScenarioContext<I, L>,
    config: InjectorConfig,
    tally: &mut Tally,
) -> HarnessResult<Status>
where
    I: FaultInjector + Clone,
    L: StorageLibrary,
{
    let mut session = FaultInjectorSession::new(ctx.injector.clone(), config, ctx.retry)?;
    tally.sessions += 1;
    session.activate()?;
    let result = exercise(ctx, &mut session);
    tally.attempts += session.attempts();
    let status = result?;
    session.finish()?;
    Ok(status)
}

fn exercise<I, L>(ctx: &ScenarioContext<I, L>, session: &mut FaultInjectorSession<I>) -> HarnessResult<Status>
where
    I: FaultInjector,
    L: StorageLibrary,
{
    ctx.database.remove(session, &ctx.library)?;

    let (mut status, conn) = ctx.library.open(ctx.database.as_c_str());
    session.record_attempts(1);
    let present = conn.is_some();
    session.ensure(status.is_nomem() != present, || Violation::HandleMismatch {
        operation: "open",
        status,
        handle_present: present,
    })?;
    let Some(mut conn) = conn else {
        return Ok(status);
    };

    for sql in SEQUENCE {
        if status != Status::Ok {
            break;
        }
        status = conn.exec(sql);
        session.record_attempts(1);
    }

    let closed = conn.close();
    session.record_attempts(1);
    session.ensure(closed == Status::Ok, || Violation::UnexpectedStatus {
        operation: "close",
        expected: Status::Ok,
        actual: closed,
    })?;
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DatabasePath;
    use oomsweep_core::RetryPolicy;
    use oomsweep_injector::testing::RecordingInjector;
    use oomsweep_injector::SimulatedInjector;
    use oomsweep_storage::SimulatedLibrary;

    fn context(injector: SimulatedInjector) -> ScenarioContext<SimulatedInjector, SimulatedLibrary> {
        let library = SimulatedLibrary::new(injector.gate());
        ScenarioContext::new(
            injector,
            library,
            DatabasePath::new("open_close.db").unwrap(),
            RetryPolicy::default(),
        )
    }

    #[test]
    fn test_run_without_failures_is_ok() {
        let ctx = context(SimulatedInjector::seeded(1));
        let mut tally = Tally::default();
        let status = run_step(&ctx, u64::from(u32::MAX), &mut tally).unwrap();
        assert_eq!(status, Status::Ok);
        assert_eq!(tally.sessions, 1);
        // open, six statements, close
        assert_eq!(tally.attempts, 8);
    }

    #[test]
    fn test_step_zero_fails_open_cleanly() {
        let ctx = context(SimulatedInjector::seeded(1));
        let mut tally = Tally::default();
        assert_eq!(run_step(&ctx, 0, &mut tally).unwrap(), Status::NoMem);
        assert_eq!(tally.attempts, 1);
    }

    #[test]
    fn test_sweep_finds_allocation_count() {
        let injector = SimulatedInjector::seeded(1);
        let ctx = context(injector.clone());
        let mut tally = Tally::default();

        run_step(&ctx, u64::from(u32::MAX), &mut tally).unwrap();
        let needed = injector.stats().decisions;

        let delay = sweep(&ctx, 10_000, &mut tally).unwrap();
        assert_eq!(delay, needed);
    }

    #[test]
    fn test_sweep_bound_is_a_configuration_error() {
        let ctx = context(SimulatedInjector::seeded(1));
        let err = sweep(&ctx, 3, &mut Tally::default()).unwrap_err();
        assert!(matches!(err, HarnessError::Configuration(_)));
    }

    #[test]
    fn test_run_forwards_only_forever_pauses() {
        // Without grace windows every pause OpenClose takes is indefinite
        let recorder = RecordingInjector::new();
        let library = SimulatedLibrary::new(SimulatedInjector::new().gate());
        let ctx = ScenarioContext::new(
            recorder.clone(),
            library,
            DatabasePath::new("open_close.db").unwrap(),
            RetryPolicy::default(),
        );
        assert_eq!(run_once(&ctx, InjectorConfig::step(0), &mut Tally::default()).unwrap(), Status::Ok);
        assert!(recorder.finite_pauses().is_empty());
        assert_eq!(recorder.depth(), 0);
    }
}
