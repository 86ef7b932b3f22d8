//! Each test here stops either the interpreter thread or a host thread at a syncpoint, performs a
//! competing operation from another thread, and then lets the stopped thread continue. The
//! interesting windows are:
//!
//! * between the handler disarming the hook and draining the queue,
//! * between two actions of one drain pass,
//! * between a host queueing an action and arming the hook,
//! * between a host storing a cancellation message and raising the flag, and
//! * between hook entry and the cancellation check.
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tether_runtime::{
    Error, Instrumentations, InstrumentedState, Interjector, Op, Proto, ProtoBuilder, State, Value,
};
use tether_runtime_internals::lock_testpoints::LockTestpoints;

/// An interruptible state running on its own thread.
///
/// The state is created immediately, but `f` does not run until [`Guest::start`], so syncpoints
/// can be armed before the interpreter can reach them.
pub struct Guest<R> {
    pub interjector: Interjector,
    pub lock_testpoints: Arc<LockTestpoints>,
    go: Sender<()>,
    handle: JoinHandle<R>,
}

impl<R> Guest<R> {
    pub fn start(&self) {
        self.go.send(()).expect("guest is waiting to start");
    }

    pub fn join(self) -> R {
        self.handle.join().expect("guest exits without panic")
    }
}

pub fn spawn_guest<F, R>(f: F) -> Guest<R>
where
    F: FnOnce(&mut InstrumentedState) -> R + Send + 'static,
    R: Send + 'static,
{
    let (handles_tx, handles_rx) = mpsc::channel();
    let (go, go_rx) = mpsc::channel();
    let handle = thread::Builder::new()
        .name("guest".to_owned())
        .spawn(move || {
            let mut state = InstrumentedState::new(Instrumentations::all())
                .expect("state can be created");
            let interjector = state.interjector().expect("state is interruptible");
            handles_tx
                .send((interjector, Arc::clone(state.lock_testpoints())))
                .expect("handles can be sent");
            go_rx.recv().expect("test starts the guest");
            f(&mut state)
        })
        .expect("can spawn a thread");
    let (interjector, lock_testpoints) = handles_rx.recv().expect("guest sends its handles");
    Guest {
        interjector,
        lock_testpoints,
        go,
        handle,
    }
}

/// `while count < target do end; return count`
pub fn wait_for_count(target: i64) -> Proto {
    ProtoBuilder::new("wait_for_count")
        .with_ops(vec![
            Op::get_global("count"),
            Op::Int(target),
            Op::Lt,
            Op::JumpIfFalse(5),
            Op::Jump(0),
            Op::get_global("count"),
            Op::Return(1),
        ])
        .build()
        .expect("valid proto")
}

/// Reset `count` and run [`wait_for_count`] on the guest, returning the final count.
///
/// The reset happens before the script starts, so no drained action can be overwritten by it.
pub fn run_until_count(state: &mut InstrumentedState, target: i64) -> Result<i64, Error> {
    state.set_global("count", Value::Integer(0));
    let results = state.run(wait_for_count(target))?;
    Ok(results.get(0).and_then(Value::as_integer).unwrap_or(0))
}

/// An action that increments the `count` global and records `label` with the instruction count
/// it ran at.
pub fn counting_action(
    label: &'static str,
    log: &Arc<Mutex<Vec<(&'static str, u64)>>>,
) -> impl FnOnce(&mut State) -> Result<(), Error> + Send + 'static {
    let log = Arc::clone(log);
    move |state: &mut State| {
        let count = state.get_global("count").as_integer().unwrap_or(0);
        state.set_global("count", Value::Integer(count + 1));
        log.lock().unwrap().push((label, state.instruction_count()));
        Ok(())
    }
}
