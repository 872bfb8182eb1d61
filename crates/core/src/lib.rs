//! Core types for oomsweep
//!
//! This crate defines the vocabulary shared by every other crate:
//! - Status: closed set of library result codes
//! - Error: usage errors, contract violations, configuration errors
//! - Injection: fault strategies, injector config, pause durations
//! - Config: `oomsweep.toml` harness configuration

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod injection;
pub mod status;

pub use config::{
    HarnessConfig, OpenCloseConfig, ResistanceConfig, RetryPolicy, CONFIG_FILE_NAME,
    DEFAULT_MAX_ATTEMPTS,
};
pub use error::{HarnessError, HarnessResult, Violation};
pub use injection::{
    FaultStrategy, InjectorConfig, PauseDuration, DEFAULT_DUTY_CYCLE, PAUSE_FOREVER,
};
pub use status::Status;
