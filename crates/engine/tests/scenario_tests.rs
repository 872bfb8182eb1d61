//! Scenario drivers against the simulated library
//!
//! A correct library must pass every scenario; each deliberate defect must
//! be reported as the violation that describes it.

use oomsweep_core::{
    HarnessConfig, HarnessError, InjectorConfig, OpenCloseConfig, ResistanceConfig, RetryPolicy,
    Status, Violation,
};
use oomsweep_engine::scenarios::{open_close, resistance};
use oomsweep_engine::{DatabasePath, Harness, ScenarioContext, ScenarioKind, Tally};
use oomsweep_injector::{FaultInjectorSession, SimulatedInjector};
use oomsweep_storage::{Connection, Defect, SimulatedLibrary, Statement, StorageLibrary};
use proptest::prelude::*;

fn context(defects: &[Defect]) -> (SimulatedInjector, ScenarioContext<SimulatedInjector, SimulatedLibrary>) {
    let injector = SimulatedInjector::seeded(11);
    let library = defects
        .iter()
        .fold(SimulatedLibrary::new(injector.gate()), |lib, &d| lib.with_defect(d));
    let ctx = ScenarioContext::new(
        injector.clone(),
        library,
        DatabasePath::new("scenario.db").unwrap(),
        RetryPolicy::default(),
    );
    (injector, ctx)
}

fn resistance_config(rows: u32, seed: u64) -> ResistanceConfig {
    ResistanceConfig {
        rows_to_insert: rows,
        duty_cycle: 2,
        seed: Some(seed),
    }
}

// ============================================================================
// OpenClose
// ============================================================================

#[test]
fn test_every_single_failure_point_is_clean() {
    let (injector, ctx) = context(&[]);
    let mut tally = Tally::default();
    open_close::run_step(&ctx, u64::from(u32::MAX), &mut tally).unwrap();
    let total = injector.stats().decisions;
    assert!(total > 10);

    for delay in 0..total {
        let status = open_close::run_step(&ctx, delay, &mut tally).unwrap();
        assert_ne!(status, Status::Ok, "delay {} should fail", delay);
    }
    assert_eq!(open_close::run_step(&ctx, total, &mut tally).unwrap(), Status::Ok);
}

#[test]
fn test_step_sweep_is_deterministic() {
    let (injector, ctx) = context(&[]);
    let first = open_close::sweep(&ctx, 10_000, &mut Tally::default()).unwrap();
    let consumed = injector.stats();
    let second = open_close::sweep(&ctx, 10_000, &mut Tally::default()).unwrap();
    assert_eq!(first, second);
    assert_eq!(injector.stats(), consumed);
}

#[test]
fn test_open_close_default_strategy_passes() {
    let (_, ctx) = context(&[]);
    let config = OpenCloseConfig {
        iteration_count: 25,
        step_sweep: false,
        max_step_delay: 0,
    };
    let mut tally = Tally::default();
    let summary = open_close::run(&ctx, &config, &mut tally).unwrap();
    assert_eq!(summary.repetitions, 25);
    assert_eq!(summary.step_sweep_delay, None);
    assert_eq!(tally.sessions, 25);
}

#[test]
fn test_leaking_close_is_detected() {
    let (_, ctx) = context(&[Defect::LeakOnClose]);
    let err = open_close::run_step(&ctx, u64::from(u32::MAX), &mut Tally::default()).unwrap_err();
    assert_eq!(err.violation(), Some(&Violation::LeakedBlocks { blocks: 4 }));
}

#[test]
fn test_handle_on_failed_open_is_detected() {
    let (_, ctx) = context(&[Defect::HandleOnNoMem]);
    let err = open_close::run_step(&ctx, 1, &mut Tally::default()).unwrap_err();
    assert_eq!(
        err.violation(),
        Some(&Violation::HandleMismatch {
            operation: "open",
            status: Status::NoMem,
            handle_present: true,
        })
    );
}

// ============================================================================
// Resistance
// ============================================================================

#[test]
fn test_partial_commit_is_a_row_count_violation() {
    let (_, ctx) = context(&[Defect::PartialCommit]);
    let err = resistance::run(&ctx, &resistance_config(20, 3), &mut Tally::default()).unwrap_err();
    assert!(
        matches!(
            err.violation(),
            Some(Violation::RowCount {
                context: "after explicit pass",
                ..
            })
        ),
        "{:?}",
        err
    );
}

#[test]
fn test_retry_ceiling_stops_resistance() {
    let (_, mut ctx) = context(&[]);
    ctx.retry = RetryPolicy::bounded(2);
    let err = resistance::run(&ctx, &resistance_config(50, 4), &mut Tally::default()).unwrap_err();
    assert!(matches!(err, HarnessError::RetryBudgetExhausted { .. }), "{:?}", err);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_resistance_passes_for_any_seed(seed in any::<u64>(), rows in 1u32..12) {
        let (injector, ctx) = context(&[]);
        let mut tally = Tally::default();
        let summary = resistance::run(&ctx, &resistance_config(rows, seed), &mut tally).unwrap();
        prop_assert_eq!(summary.rows, 3 * i64::from(rows));
        prop_assert!(!injector.is_active());
    }
}

// ============================================================================
// Explicit transaction batch
// ============================================================================

#[test]
fn test_failed_row_rolls_back_the_whole_batch() {
    let injector = SimulatedInjector::seeded(1);
    let library = SimulatedLibrary::new(injector.gate());
    let db = DatabasePath::new("batch.db").unwrap();
    // The row's working block is granted, the row itself is not
    let mut session =
        FaultInjectorSession::new(injector.clone(), InjectorConfig::step(1), RetryPolicy::default())
            .unwrap();
    session.activate().unwrap();

    // Everything up to the last row runs shielded
    let (conn, mut stmt) = {
        let _quiet = session.pause_forever();
        let (status, conn) = library.open(db.as_c_str());
        assert_eq!(status, Status::Ok);
        let mut conn = conn.unwrap();
        assert_eq!(
            conn.exec(c"CREATE TABLE test_table(a INTEGER PRIMARY KEY AUTOINCREMENT, b, c)"),
            Status::Ok
        );
        assert_eq!(conn.exec(c"BEGIN TRANSACTION"), Status::Ok);
        let (status, stmt) = conn.prepare(c"INSERT INTO test_table(b, c) VALUES (?, ?)");
        assert_eq!(status, Status::Ok);
        let mut stmt = stmt.unwrap();
        for _ in 0..999 {
            assert_eq!(stmt.reset(), Status::Ok);
            assert_eq!(stmt.bind_int(1, 1), Status::Ok);
            assert_eq!(stmt.bind_text(2, resistance::BOUND_TEXT), Status::Ok);
            assert_eq!(stmt.step(), Status::Done);
        }
        assert_eq!(stmt.reset(), Status::Ok);
        assert_eq!(stmt.bind_int(1, 1), Status::Ok);
        assert_eq!(stmt.bind_text(2, resistance::BOUND_TEXT), Status::Ok);
        assert!(!conn.autocommit());
        (conn, stmt)
    };

    // Row 1000 meets the injector
    assert_eq!(stmt.step(), Status::NoMem);

    {
        let _quiet = session.pause_forever();
        assert!(conn.autocommit(), "the batch must end with the failure");
        assert_eq!(stmt.finalize(), Status::NoMem);
        assert_eq!(conn.close(), Status::Ok);
    }
    session.finish().unwrap();

    let committed = library.database(db.path()).unwrap();
    assert_eq!(committed.row_count("test_table"), Some(0));
}

// ============================================================================
// Harness
// ============================================================================

#[test]
fn test_ignored_begin_fails_the_resistance_report() {
    let injector = SimulatedInjector::seeded(5);
    let library = SimulatedLibrary::new(injector.gate()).with_defect(Defect::IgnoreBegin);
    let mut config = HarnessConfig::default();
    config.resistance = resistance_config(5, 8);
    let harness = Harness::new(injector, library, config).unwrap();

    let report = harness.run(ScenarioKind::Resistance).unwrap();
    assert!(!report.passed);
    let violation = report.violation.unwrap();
    assert!(violation.contains("after BEGIN"), "{}", violation);
    assert_eq!(report.sessions, 1);
}
