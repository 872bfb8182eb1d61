//! Configuration files driving a run

use super::*;
use oomsweep::HarnessError;
use tempfile::TempDir;

#[test]
fn test_run_from_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("oomsweep.toml");
    std::fs::write(
        &path,
        r#"
database_path = "from_file.db"

[open_close]
iteration_count = 2
step_sweep = false

[resistance]
rows_to_insert = 4
seed = 77
"#,
    )
    .unwrap();

    let config = HarnessConfig::from_file(&path).unwrap();
    assert_eq!(config.resistance.duty_cycle, 2);

    let reports = simulated_harness(config, &[]).run_all().unwrap();
    let open_close = report_for(&reports, ScenarioKind::OpenClose);
    assert!(open_close.passed);
    assert_eq!(open_close.sessions, 2);
    assert_eq!(open_close.step_sweep_delay, None);
    assert!(report_for(&reports, ScenarioKind::Resistance).passed);
}

#[test]
fn test_invalid_config_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("oomsweep.toml");
    std::fs::write(&path, "[resistance]\nduty_cycle = 0\n").unwrap();
    assert!(matches!(
        HarnessConfig::from_file(&path),
        Err(HarnessError::Configuration(_))
    ));
}

#[test]
fn test_sweep_bound_surfaces_as_error() {
    let mut config = quick_config();
    config.open_close.max_step_delay = 2;
    let err = simulated_harness(config, &[]).run(ScenarioKind::OpenClose).unwrap_err();
    assert!(matches!(err, HarnessError::Configuration(_)));
}
