//! Scenarios against the simulated library

use super::*;

#[test]
fn test_correct_library_passes_everything() {
    let harness = simulated_harness(quick_config(), &[]);
    let reports = harness.run_all().unwrap();

    assert_eq!(reports.len(), 2);
    for report in &reports {
        assert!(report.passed, "{}", report);
        assert!(report.attempts > 0);
        assert_eq!(report.violation, None);
    }
    let open_close = report_for(&reports, ScenarioKind::OpenClose);
    // Ten repetitions, then one session per swept delay
    let delay = open_close.step_sweep_delay.unwrap();
    assert_eq!(open_close.sessions, 10 + delay + 1);
}

#[test]
fn test_sweep_delay_is_stable_across_harnesses() {
    let first = simulated_harness(quick_config(), &[])
        .run(ScenarioKind::OpenClose)
        .unwrap();
    let second = simulated_harness(quick_config(), &[])
        .run(ScenarioKind::OpenClose)
        .unwrap();
    assert_eq!(first.step_sweep_delay, second.step_sweep_delay);
}

#[test]
fn test_each_defect_fails_its_scenario() {
    let cases = [
        (Defect::LeakOnClose, ScenarioKind::OpenClose, "leaked"),
        (Defect::HandleOnNoMem, ScenarioKind::OpenClose, "handle present=true"),
        (Defect::PartialCommit, ScenarioKind::Resistance, "row count mismatch"),
        (Defect::IgnoreBegin, ScenarioKind::Resistance, "transaction state mismatch"),
        (Defect::IgnoreRollback, ScenarioKind::Resistance, "after ROLLBACK"),
        (Defect::IgnoreCommit, ScenarioKind::Resistance, "after END"),
    ];
    for (defect, scenario, needle) in cases {
        let report = simulated_harness(quick_config(), &[defect]).run(scenario).unwrap();
        assert!(!report.passed, "{:?} went unnoticed", defect);
        let violation = report.violation.unwrap();
        assert!(violation.contains(needle), "{:?}: {}", defect, violation);
    }
}

#[test]
fn test_failed_scenario_does_not_stop_the_run() {
    let harness = simulated_harness(quick_config(), &[Defect::LeakOnClose]);
    let reports = harness.run_all().unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| !r.passed));
}
