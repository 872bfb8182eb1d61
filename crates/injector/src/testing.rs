//! Testing utilities for the control protocol
//!
//! [`RecordingInjector`] denies nothing; it logs every control call so tests
//! can assert on exactly what a session forwarded to the injector.

use crate::FaultInjector;
use oomsweep_core::{HarnessResult, InjectorConfig};
use parking_lot::Mutex;
use std::sync::Arc;

/// One control call received by a [`RecordingInjector`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `configure`
    Configure(InjectorConfig),
    /// `clear_configuration`
    ClearConfiguration,
    /// `activate`
    Activate,
    /// `deactivate`
    Deactivate,
    /// `pause(duration)`
    Pause(u32),
    /// `resume`
    Resume,
}

/// Injector double that records its calls
#[derive(Debug, Clone, Default)]
pub struct RecordingInjector {
    calls: Arc<Mutex<Vec<Call>>>,
    leaked: Arc<Mutex<u32>>,
}

impl RecordingInjector {
    /// Recorder reporting zero leaks
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorder whose `deactivate` reports `blocks` leaked blocks
    pub fn leaking(blocks: u32) -> Self {
        let recorder = Self::default();
        *recorder.leaked.lock() = blocks;
        recorder
    }

    /// Calls received so far
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Forget recorded calls
    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    /// Durations of every `pause` other than the forever sentinel
    pub fn finite_pauses(&self) -> Vec<u32> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Pause(d) if *d != 0 => Some(*d),
                _ => None,
            })
            .collect()
    }

    /// Net pause depth (pauses minus resumes)
    pub fn depth(&self) -> i64 {
        self.calls.lock().iter().fold(0, |depth, call| match call {
            Call::Pause(_) => depth + 1,
            Call::Resume => depth - 1,
            _ => depth,
        })
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl FaultInjector for RecordingInjector {
    fn configure(&mut self, config: &InjectorConfig) -> HarnessResult<()> {
        self.record(Call::Configure(config.clone()));
        Ok(())
    }

    fn clear_configuration(&mut self) {
        self.record(Call::ClearConfiguration);
    }

    fn activate(&mut self) {
        self.record(Call::Activate);
    }

    fn deactivate(&mut self) -> u32 {
        self.record(Call::Deactivate);
        *self.leaked.lock()
    }

    fn pause(&mut self, duration: u32) {
        self.record(Call::Pause(duration));
    }

    fn resume(&mut self) {
        self.record(Call::Resume);
    }
}
