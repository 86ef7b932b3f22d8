mod test_helpers;

use rayon::prelude::*;
use std::sync::{Arc, Mutex};
use std::thread;
use tether_runtime::{bail_runtime, Instrumentations, InstrumentedState, Op, ProtoBuilder, State, Value};
use test_helpers::{call_each_iteration, counting_loop, test_nonex, wait_for_count};

#[test]
fn interjected_action_runs_before_the_next_iteration() {
    test_nonex(|| {
        let mut state =
            InstrumentedState::new(Instrumentations::INTERRUPTION).expect("state can be created");
        let interjector = state.interjector().expect("state is interruptible");

        state.register("tick", move |_state, args| {
            if args.get(0).and_then(Value::as_integer) == Some(5) {
                let interjector = interjector.clone();
                thread::spawn(move || {
                    interjector
                        .interject(|state: &mut State| {
                            state.set_global("stop", Value::Boolean(true));
                            Ok(())
                        })
                        .expect("interject succeeds")
                })
                .join()
                .expect("host thread completes");
            }
            Ok(vec![])
        });

        let results = state
            .run(call_each_iteration("tick", 100))
            .expect("script runs");
        assert_eq!(results, vec![Value::Integer(5)]);
    })
}

#[test]
fn actions_from_one_producer_run_in_order() {
    test_nonex(|| {
        let mut state =
            InstrumentedState::new(Instrumentations::INTERRUPTION).expect("state can be created");
        let interjector = state.interjector().expect("state is interruptible");
        let seen = Arc::new(Mutex::new(vec![]));

        for i in 0..100 {
            let seen = seen.clone();
            interjector
                .interject(move |_: &mut State| {
                    seen.lock().unwrap().push(i);
                    Ok(())
                })
                .expect("interject succeeds");
        }
        state.run(counting_loop(1)).expect("script runs");

        assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
    })
}

#[test]
fn producers_interleave_but_keep_their_own_order() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 250;

    test_nonex(|| {
        let mut state =
            InstrumentedState::new(Instrumentations::INTERRUPTION).expect("state can be created");
        let interjector = state.interjector().expect("state is interruptible");
        let seen = Arc::new(Mutex::new(vec![]));
        state.set_global("count", Value::Integer(0));

        let producers = {
            let seen = seen.clone();
            thread::spawn(move || {
                (0..PRODUCERS).into_par_iter().for_each(|producer| {
                    for seq in 0..PER_PRODUCER {
                        let seen = seen.clone();
                        interjector
                            .interject(move |state: &mut State| {
                                seen.lock().unwrap().push((producer, seq));
                                let count = state.get_global("count").as_integer().unwrap_or(0);
                                state.set_global("count", Value::Integer(count + 1));
                                Ok(())
                            })
                            .expect("interject succeeds");
                    }
                })
            })
        };

        state
            .run(wait_for_count((PRODUCERS * PER_PRODUCER) as i64))
            .expect("script runs");
        producers.join().expect("producers complete");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
        for producer in 0..PRODUCERS {
            let order: Vec<usize> = seen
                .iter()
                .filter(|(p, _)| *p == producer)
                .map(|(_, seq)| *seq)
                .collect();
            assert_eq!(order, (0..PER_PRODUCER).collect::<Vec<_>>());
        }
    })
}

#[test]
fn action_error_is_catchable_and_keeps_later_actions() {
    test_nonex(|| {
        let mut state =
            InstrumentedState::new(Instrumentations::INTERRUPTION).expect("state can be created");
        let interjector = state.interjector().expect("state is interruptible");

        state.register("arm", move |_state, _args| {
            interjector.interject(|_: &mut State| {
                bail_runtime!("action failed: {}", 42);
            })?;
            interjector.interject(|state: &mut State| {
                state.set_global("after", Value::Boolean(true));
                Ok(())
            })?;
            Ok(vec![])
        });

        // function inner() arm() end
        let inner = ProtoBuilder::new("inner")
            .with_ops(vec![
                Op::get_global("arm"),
                Op::Call(0),
                Op::Pop,
                Op::Return(0),
            ])
            .build()
            .expect("valid proto");
        let inner = state.load(inner);
        state.set_global("inner", inner);

        // local ok, err = pcall(inner); return err
        let outer = ProtoBuilder::new("outer")
            .with_ops(vec![Op::get_global("inner"), Op::PCall(0), Op::Return(1)])
            .build()
            .expect("valid proto");
        let results = state.run(outer).expect("error is caught by the script");

        assert_eq!(
            state.to_string_lossy(&results[0]).as_deref(),
            Some("action failed: 42")
        );
        assert_eq!(state.get_global("after"), Value::Boolean(true));
        assert!(!state.hook_state().armed);
    })
}

#[test]
fn interjector_works_from_many_threads_at_once() {
    test_nonex(|| {
        let mut state =
            InstrumentedState::new(Instrumentations::INTERRUPTION).expect("state can be created");
        let interjector = state.interjector().expect("state is interruptible");
        state.set_global("count", Value::Integer(0));

        (0..64).into_par_iter().for_each(|_| {
            interjector
                .interject(|state: &mut State| {
                    let count = state.get_global("count").as_integer().unwrap_or(0);
                    state.set_global("count", Value::Integer(count + 1));
                    Ok(())
                })
                .expect("interject succeeds");
        });
        state.run(counting_loop(1)).expect("script runs");

        assert_eq!(state.get_global("count"), Value::Integer(64));
        assert_eq!(interjector.pending_actions().unwrap(), 0);
    })
}
