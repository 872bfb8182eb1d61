//! oomsweep runner
//!
//! Runs the scenarios against the bundled SQLite with the injector that was
//! preloaded into this process:
//!
//! ```text
//! LD_PRELOAD=/path/to/liboverthrower.so oomsweep --scenario all
//! ```
//!
//! Exit status is 0 when every selected scenario passed and 1 otherwise.

use std::path::{Path, PathBuf};
use std::process;

use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use oomsweep::{Harness, HarnessConfig, Overthrower, ScenarioKind, ScenarioReport, SqliteLibrary};
use oomsweep_core::CONFIG_FILE_NAME;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn build_cli() -> Command {
    Command::new("oomsweep")
        .about("Verify a storage library's behavior under allocation failure")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Configuration file (default: ./oomsweep.toml if present)"),
        )
        .arg(
            Arg::new("scenario")
                .long("scenario")
                .value_parser(["open-close", "resistance", "all"])
                .default_value("all")
                .help("Scenario to run"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print reports as JSON")
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("init").about("Write a commented default configuration file"),
        )
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let matches = build_cli().get_matches();
    let code = match run(&matches) {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };
    process::exit(code);
}

/// Returns whether every scenario passed
fn run(matches: &ArgMatches) -> anyhow::Result<bool> {
    let config_path = matches.get_one::<String>("config").map(PathBuf::from);

    if matches.subcommand_name() == Some("init") {
        let path = config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
        HarnessConfig::write_default_if_missing(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "Configuration ready");
        return Ok(true);
    }

    let config = load_config(config_path.as_deref())?;
    let scenarios = match matches.get_one::<String>("scenario").map(String::as_str) {
        Some("open-close") => vec![ScenarioKind::OpenClose],
        Some("resistance") => vec![ScenarioKind::Resistance],
        _ => ScenarioKind::ALL.to_vec(),
    };

    let injector = Overthrower::resolve().context("binding the fault injector")?;
    info!(sqlite = SqliteLibrary::version(), "Injector bound");
    let harness = Harness::new(injector, SqliteLibrary, config)?;
    let reports = harness.run_many(&scenarios)?;

    print_reports(&reports, matches.get_flag("json"))?;
    Ok(reports.iter().all(|r| r.passed))
}

fn load_config(path: Option<&Path>) -> anyhow::Result<HarnessConfig> {
    match path {
        Some(path) => Ok(HarnessConfig::from_file(path)?),
        None => {
            let default = Path::new(CONFIG_FILE_NAME);
            if default.exists() {
                Ok(HarnessConfig::from_file(default)?)
            } else {
                Ok(HarnessConfig::default())
            }
        }
    }
}

fn print_reports(reports: &[ScenarioReport], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(reports)?);
    } else {
        for report in reports {
            println!("{}", report);
        }
    }
    Ok(())
}
