//! The real injector against SQLite
//!
//! Only meaningful with the injector preloaded into the test process.

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::super::*;
    use oomsweep::{Overthrower, SqliteLibrary};
    use tempfile::TempDir;

    #[test]
    #[ignore = "requires the injector in LD_PRELOAD"]
    fn test_sqlite_survives_every_scenario() {
        let dir = TempDir::new().unwrap();
        let mut config = quick_config();
        config.database_path = dir.path().join("preloaded.db");

        let injector = Overthrower::resolve().unwrap();
        let harness = Harness::new(injector, SqliteLibrary, config).unwrap();
        for report in harness.run_all().unwrap() {
            assert!(report.passed, "{}", report);
        }
    }
}

#[test]
fn test_missing_injector_is_reported() {
    // Without LD_PRELOAD the symbols are absent; with it, binding succeeds
    match oomsweep::Overthrower::resolve() {
        Ok(_) => {}
        Err(e) => assert!(matches!(e, oomsweep::HarnessError::InjectorUnavailable(_))),
    }
}
