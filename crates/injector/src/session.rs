//! Injector sessions and the pause/resume controller
//!
//! A [`FaultInjectorSession`] owns one injector for one scenario: it pushes
//! the configuration, enforces the activate/deactivate protocol, and keeps
//! the stack of outstanding pauses.
//!
//! # Pause frames
//!
//! Every pause pushes a frame. Whether a frame is forwarded to the injector
//! depends on what is already on the stack:
//!
//! | Requested | Stack holds a `Forever` frame | Forwarded |
//! |-----------|-------------------------------|-----------|
//! | `Forever` | no                            | yes (`0`) |
//! | `Decisions(n > 0)` | no                   | yes (`n`) |
//! | `Decisions(0)` | either                   | no        |
//! | anything  | yes                           | no        |
//!
//! So an indefinite region can never be shortened by an inner finite pause,
//! and a zero-length grace window never reaches the injector, where `0`
//! means forever.
//!
//! The controller's own bookkeeping runs under a bracketing forever pause:
//! the frame stack, trace events and error messages all allocate, and
//! those allocations must not be the ones that fail.

use crate::FaultInjector;
use oomsweep_core::{
    HarnessError, HarnessResult, InjectorConfig, PauseDuration, RetryPolicy, Violation,
    PAUSE_FOREVER,
};
use smallvec::SmallVec;
use std::ops::{Deref, DerefMut};
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct PauseFrame {
    duration: PauseDuration,
    forwarded: bool,
}

/// One activation lifecycle of a fault injector
///
/// Created at scenario start, activated, exercised, then finished with
/// [`finish`](Self::finish), which deactivates and requires zero leaked
/// blocks. Dropping a session without finishing it still deactivates the
/// injector and clears its configuration.
pub struct FaultInjectorSession<I: FaultInjector> {
    id: Uuid,
    injector: I,
    config: InjectorConfig,
    retry: RetryPolicy,
    activated: bool,
    frames: SmallVec<[PauseFrame; 8]>,
    attempts: u64,
}

impl<I: FaultInjector> FaultInjectorSession<I> {
    /// Configure `injector` for a new session.
    ///
    /// # Errors
    ///
    /// Configuration errors from validation or from the injector.
    pub fn new(mut injector: I, config: InjectorConfig, retry: RetryPolicy) -> HarnessResult<Self> {
        config.validate()?;
        injector.configure(&config)?;
        let id = Uuid::new_v4();
        debug!(
            target: "oomsweep::session",
            session = %id,
            strategy = ?config.strategy,
            "Session configured"
        );
        Ok(FaultInjectorSession {
            id,
            injector,
            config,
            retry,
            activated: false,
            frames: SmallVec::new(),
            attempts: 0,
        })
    }

    /// Session identifier used in log events
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Configuration pushed at creation
    pub fn config(&self) -> &InjectorConfig {
        &self.config
    }

    /// Retry ceiling for operations run under this session
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Whether the injector is currently active
    pub fn is_activated(&self) -> bool {
        self.activated
    }

    /// Number of outstanding pauses
    pub fn pause_depth(&self) -> usize {
        self.frames.len()
    }

    /// Number of outstanding pauses the injector knows about
    pub fn forwarded_depth(&self) -> usize {
        self.frames.iter().filter(|f| f.forwarded).count()
    }

    /// Whether an indefinite pause is in effect
    pub fn is_paused_forever(&self) -> bool {
        self.frames.iter().any(|f| f.duration.is_forever())
    }

    /// Library calls made under this session
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Add `count` library calls to the session total
    pub fn record_attempts(&mut self, count: u64) {
        self.attempts += count;
    }

    /// The injector this session drives
    pub fn injector(&self) -> &I {
        &self.injector
    }

    /// Start intercepting allocations.
    ///
    /// # Errors
    ///
    /// Usage error if the injector is already active.
    pub fn activate(&mut self) -> HarnessResult<()> {
        if self.activated {
            return Err(HarnessError::usage("activate called on an active injector"));
        }
        trace!(target: "oomsweep::session", session = %self.id, "Activating injector");
        self.injector.activate();
        self.activated = true;
        Ok(())
    }

    /// Stop intercepting and return the leaked block count.
    ///
    /// # Errors
    ///
    /// Usage error if the injector is not active or pauses are outstanding.
    pub fn deactivate(&mut self) -> HarnessResult<u32> {
        if !self.activated {
            return Err(HarnessError::usage("deactivate called on an inactive injector"));
        }
        if !self.frames.is_empty() {
            let depth = self.frames.len();
            return Err(self.bracket(|_| {
                HarnessError::usage(format!("deactivate with {} outstanding pause(s)", depth))
            }));
        }
        let leaked = self.injector.deactivate();
        self.activated = false;
        debug!(
            target: "oomsweep::session",
            session = %self.id,
            leaked,
            attempts = self.attempts,
            "Injector deactivated"
        );
        Ok(leaked)
    }

    /// Deactivate and require that every block was freed.
    ///
    /// # Errors
    ///
    /// `LeakedBlocks` violation, or a usage error from [`deactivate`](Self::deactivate).
    pub fn check_leaks(&mut self) -> HarnessResult<()> {
        match self.deactivate()? {
            0 => Ok(()),
            blocks => {
                error!(target: "oomsweep::session", session = %self.id, blocks, "Blocks leaked");
                Err(Violation::LeakedBlocks { blocks }.into())
            }
        }
    }

    /// End the session: deactivate, check leaks, clear configuration.
    pub fn finish(mut self) -> HarnessResult<()> {
        self.check_leaks()
    }

    /// Push a pause frame. Prefer [`pause`](Self::pause), which pops it
    /// automatically.
    pub fn suspend(&mut self, duration: PauseDuration) {
        let wire = if self.is_paused_forever() {
            None
        } else {
            duration.wire()
        };
        self.bracket(|s| {
            s.frames.push(PauseFrame {
                duration,
                forwarded: wire.is_some(),
            });
            trace!(
                target: "oomsweep::session",
                depth = s.frames.len(),
                ?duration,
                forwarded = wire.is_some(),
                "Injection paused"
            );
        });
        if let Some(wire) = wire {
            self.injector.pause(wire);
        }
    }

    /// Pop the most recent pause frame.
    ///
    /// # Errors
    ///
    /// Usage error if no pause is outstanding.
    pub fn resume(&mut self) -> HarnessResult<()> {
        let frame = self.bracket(|s| {
            let frame = s.frames.pop();
            trace!(target: "oomsweep::session", depth = s.frames.len(), "Injection resumed");
            frame
        });
        match frame {
            Some(frame) => {
                if frame.forwarded {
                    self.injector.resume();
                }
                Ok(())
            }
            None => Err(self.bracket(|_| HarnessError::usage("resume without a matching pause"))),
        }
    }

    /// Pause injection until the returned guard is dropped
    pub fn pause(&mut self, duration: PauseDuration) -> PauseGuard<'_, I> {
        self.suspend(duration);
        PauseGuard { session: self }
    }

    /// Pause injection indefinitely until the returned guard is dropped
    pub fn pause_forever(&mut self) -> PauseGuard<'_, I> {
        self.pause(PauseDuration::Forever)
    }

    /// Run `f` with injection paused indefinitely
    pub fn quietly<R>(&mut self, f: impl FnOnce() -> R) -> R {
        let _quiet = self.pause_forever();
        f()
    }

    /// Verify a condition that was evaluated under injection.
    ///
    /// `holds` is computed by the caller (possibly with injection active);
    /// the verdict and any report are produced with injection paused, so a
    /// failure here always means the library broke `violation`'s contract.
    ///
    /// # Errors
    ///
    /// The violation built by `violation` when `holds` is false.
    pub fn ensure(
        &mut self,
        holds: bool,
        violation: impl FnOnce() -> Violation,
    ) -> HarnessResult<()> {
        if holds {
            return Ok(());
        }
        Err(self.violated(violation))
    }

    /// Build, log and return a violation with injection paused
    pub fn violated(&mut self, violation: impl FnOnce() -> Violation) -> HarnessError {
        let id = self.id;
        self.quietly(|| {
            let violation = violation();
            error!(target: "oomsweep::session", session = %id, %violation, "Contract violated");
            violation.into()
        })
    }

    fn bracket<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.injector.pause(PAUSE_FOREVER);
        let result = f(self);
        self.injector.resume();
        result
    }
}

impl<I: FaultInjector> Drop for FaultInjectorSession<I> {
    fn drop(&mut self) {
        while !self.frames.is_empty() {
            let _ = self.resume();
        }
        if self.activated {
            let leaked = self.injector.deactivate();
            self.activated = false;
            if leaked > 0 {
                warn!(
                    target: "oomsweep::session",
                    session = %self.id,
                    leaked,
                    "Session dropped without finish; blocks leaked"
                );
            }
        }
        self.injector.clear_configuration();
    }
}

/// Scoped pause: injection stays suspended until this guard is dropped.
///
/// The guard dereferences to the session, so nested pauses are taken from
/// the guard and are necessarily released first.
pub struct PauseGuard<'s, I: FaultInjector> {
    session: &'s mut FaultInjectorSession<I>,
}

impl<I: FaultInjector> Deref for PauseGuard<'_, I> {
    type Target = FaultInjectorSession<I>;

    fn deref(&self) -> &Self::Target {
        self.session
    }
}

impl<I: FaultInjector> DerefMut for PauseGuard<'_, I> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session
    }
}

impl<I: FaultInjector> Drop for PauseGuard<'_, I> {
    fn drop(&mut self) {
        // The guard's own frame is always on the stack
        if let Err(e) = self.session.resume() {
            error!(target: "oomsweep::session", error = %e, "Pause guard released without a frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, RecordingInjector};
    use oomsweep_core::Status;

    fn session(recorder: &RecordingInjector) -> FaultInjectorSession<RecordingInjector> {
        FaultInjectorSession::new(
            recorder.clone(),
            InjectorConfig::step(4),
            RetryPolicy::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_new_configures_injector() {
        let recorder = RecordingInjector::new();
        let _session = session(&recorder);
        assert_eq!(
            recorder.calls(),
            vec![Call::Configure(InjectorConfig::step(4))]
        );
    }

    #[test]
    fn test_new_rejects_invalid_strategy() {
        let recorder = RecordingInjector::new();
        let result = FaultInjectorSession::new(
            recorder.clone(),
            InjectorConfig::random(0, None),
            RetryPolicy::default(),
        );
        assert!(matches!(result, Err(HarnessError::Configuration(_))));
        assert!(recorder.calls().is_empty());
    }

    #[test]
    fn test_double_activate_is_usage_error() {
        let recorder = RecordingInjector::new();
        let mut session = session(&recorder);
        session.activate().unwrap();
        assert!(matches!(session.activate(), Err(HarnessError::Usage(_))));
        session.finish().unwrap();
    }

    #[test]
    fn test_deactivate_while_inactive_is_usage_error() {
        let recorder = RecordingInjector::new();
        let mut session = session(&recorder);
        assert!(matches!(session.deactivate(), Err(HarnessError::Usage(_))));
        assert!(!recorder.calls().contains(&Call::Deactivate));
    }

    #[test]
    fn test_finish_reports_leaks() {
        let recorder = RecordingInjector::leaking(2);
        let mut session = session(&recorder);
        session.activate().unwrap();
        let err = session.finish().unwrap_err();
        assert_eq!(
            err.violation(),
            Some(&Violation::LeakedBlocks { blocks: 2 })
        );
        // Dropped after finish: configuration cleared, no second deactivate
        let calls = recorder.calls();
        assert_eq!(calls.iter().filter(|c| **c == Call::Deactivate).count(), 1);
        assert_eq!(calls.last(), Some(&Call::ClearConfiguration));
    }

    #[test]
    fn test_resume_without_pause_is_usage_error() {
        let recorder = RecordingInjector::new();
        let mut session = session(&recorder);
        assert!(matches!(session.resume(), Err(HarnessError::Usage(_))));
        // Only bracketing calls reached the injector
        assert_eq!(recorder.depth(), 0);
    }

    #[test]
    fn test_pause_guard_releases_on_drop() {
        let recorder = RecordingInjector::new();
        let mut session = session(&recorder);
        recorder.clear();
        {
            let guard = session.pause(PauseDuration::Decisions(3));
            assert_eq!(guard.pause_depth(), 1);
            assert_eq!(recorder.depth(), 1);
        }
        assert_eq!(session.pause_depth(), 0);
        assert_eq!(recorder.depth(), 0);
        assert_eq!(recorder.finite_pauses(), vec![3]);
    }

    #[test]
    fn test_zero_decision_pause_is_not_forwarded() {
        let recorder = RecordingInjector::new();
        let mut session = session(&recorder);
        {
            let guard = session.pause(PauseDuration::Decisions(0));
            assert_eq!(guard.pause_depth(), 1);
            assert_eq!(guard.forwarded_depth(), 0);
        }
        assert_eq!(recorder.depth(), 0);
        assert!(recorder.finite_pauses().is_empty());
    }

    #[test]
    fn test_forever_shadows_inner_finite_pause() {
        let recorder = RecordingInjector::new();
        let mut session = session(&recorder);
        {
            let mut outer = session.pause_forever();
            {
                let inner = outer.pause(PauseDuration::Decisions(5));
                assert_eq!(inner.pause_depth(), 2);
                assert_eq!(inner.forwarded_depth(), 1);
                assert!(inner.is_paused_forever());
            }
            assert_eq!(outer.pause_depth(), 1);
        }
        assert!(recorder.finite_pauses().is_empty());
        assert_eq!(recorder.depth(), 0);
    }

    #[test]
    fn test_forever_inside_finite_is_forwarded_and_restored() {
        let recorder = RecordingInjector::new();
        let mut session = session(&recorder);
        recorder.clear();
        {
            let mut outer = session.pause(PauseDuration::Decisions(2));
            {
                let inner = outer.pause_forever();
                assert_eq!(inner.forwarded_depth(), 2);
            }
            assert!(!outer.is_paused_forever());
            assert_eq!(outer.forwarded_depth(), 1);
        }
        assert_eq!(recorder.finite_pauses(), vec![2]);
        assert_eq!(recorder.depth(), 0);
    }

    #[test]
    fn test_bookkeeping_is_bracketed() {
        let recorder = RecordingInjector::new();
        let mut session = session(&recorder);
        recorder.clear();
        session.suspend(PauseDuration::Decisions(7));
        assert_eq!(
            recorder.calls(),
            vec![Call::Pause(0), Call::Resume, Call::Pause(7)]
        );
        recorder.clear();
        session.resume().unwrap();
        assert_eq!(
            recorder.calls(),
            vec![Call::Pause(0), Call::Resume, Call::Resume]
        );
    }

    #[test]
    fn test_ensure_reports_violation_under_pause() {
        let recorder = RecordingInjector::new();
        let mut session = session(&recorder);
        assert!(session
            .ensure(true, || unreachable!("not built when the check holds"))
            .is_ok());

        let err = session
            .ensure(false, || Violation::UnexpectedStatus {
                operation: "close",
                expected: Status::Ok,
                actual: Status::Error(5),
            })
            .unwrap_err();
        assert!(err.is_violation());
        assert_eq!(session.pause_depth(), 0);
        assert_eq!(recorder.depth(), 0);
    }

    #[test]
    fn test_drop_unwinds_manual_pauses_and_deactivates() {
        let recorder = RecordingInjector::new();
        {
            let mut session = session(&recorder);
            session.activate().unwrap();
            session.suspend(PauseDuration::Forever);
            session.suspend(PauseDuration::Decisions(2));
        }
        let calls = recorder.calls();
        assert_eq!(recorder.depth(), 0);
        assert!(calls.contains(&Call::Deactivate));
        assert_eq!(calls.last(), Some(&Call::ClearConfiguration));
    }

    #[test]
    fn test_deactivate_with_outstanding_pause_is_usage_error() {
        let recorder = RecordingInjector::new();
        let mut session = session(&recorder);
        session.activate().unwrap();
        session.suspend(PauseDuration::Forever);
        assert!(matches!(session.deactivate(), Err(HarnessError::Usage(_))));
        session.resume().unwrap();
        session.finish().unwrap();
    }
}
