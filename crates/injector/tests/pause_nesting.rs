//! Property tests for nested pause/resume
//!
//! A random interleaving of pauses and resumes is replayed against a
//! session over the simulated injector. After every step the injector's own
//! stack must mirror the frames the session forwarded, and an outstanding
//! indefinite pause must shield every allocation.

use oomsweep_core::{InjectorConfig, PauseDuration, RetryPolicy};
use oomsweep_injector::{FaultInjectorSession, SimulatedInjector};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Pause(PauseDuration),
    Resume,
    Allocate,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => Just(Op::Pause(PauseDuration::Forever)),
        3 => (0u32..4).prop_map(|n| Op::Pause(PauseDuration::Decisions(n))),
        4 => Just(Op::Resume),
        3 => Just(Op::Allocate),
    ]
}

fn new_session(injector: &SimulatedInjector) -> FaultInjectorSession<SimulatedInjector> {
    FaultInjectorSession::new(
        injector.clone(),
        InjectorConfig::step(0),
        RetryPolicy::default(),
    )
    .unwrap()
}

proptest! {
    #[test]
    fn prop_injector_stack_mirrors_forwarded_frames(ops in prop::collection::vec(op(), 0..64)) {
        let injector = SimulatedInjector::seeded(11);
        let gate = injector.gate();
        let mut session = new_session(&injector);
        session.activate().unwrap();

        let mut blocks = Vec::new();
        for op in ops {
            match op {
                Op::Pause(duration) => session.suspend(duration),
                Op::Resume => {
                    let had_frames = session.pause_depth() > 0;
                    prop_assert_eq!(session.resume().is_ok(), had_frames);
                }
                Op::Allocate => {
                    let block = gate.allocate();
                    if session.is_paused_forever() {
                        prop_assert!(block.is_some());
                    }
                    blocks.extend(block);
                }
            }
            prop_assert_eq!(injector.pause_depth(), session.forwarded_depth());
            prop_assert!(session.forwarded_depth() <= session.pause_depth());
        }

        while session.pause_depth() > 0 {
            session.resume().unwrap();
        }
        prop_assert_eq!(injector.pause_depth(), 0);

        for block in blocks {
            gate.free(block);
        }
        prop_assert!(session.finish().is_ok());
    }

    #[test]
    fn prop_scoped_pauses_always_unwind(depths in prop::collection::vec(0u32..5, 1..12)) {
        let injector = SimulatedInjector::seeded(3);
        let mut session = new_session(&injector);
        session.activate().unwrap();

        fn nest(
            session: &mut FaultInjectorSession<SimulatedInjector>,
            injector: &SimulatedInjector,
            depths: &[u32],
        ) {
            let Some((&first, rest)) = depths.split_first() else {
                return;
            };
            let mut guard = session.pause(PauseDuration::from_wire(first));
            assert_eq!(injector.pause_depth(), guard.forwarded_depth());
            nest(&mut guard, injector, rest);
        }

        nest(&mut session, &injector, &depths);
        prop_assert_eq!(session.pause_depth(), 0);
        prop_assert_eq!(injector.pause_depth(), 0);
        prop_assert!(session.finish().is_ok());
    }
}

#[test]
fn test_grace_window_shields_exactly_its_length() {
    let injector = SimulatedInjector::seeded(5);
    let gate = injector.gate();
    let mut session = new_session(&injector);
    session.activate().unwrap();

    for index in 0..5u64 {
        let guard = session.pause(PauseDuration::grace(index));
        let granted: Vec<_> = (0..index).map(|_| gate.allocate()).collect();
        assert!(granted.iter().all(Option::is_some));
        assert!(gate.allocate().is_none());
        drop(guard);
        for block in granted.into_iter().flatten() {
            gate.free(block);
        }
    }
    session.finish().unwrap();
}
