use lazy_static::lazy_static;
use std::sync::mpsc;
use std::sync::RwLock;
use std::thread::{self, JoinHandle};
use tether_runtime::{Error, Instrumentations, InstrumentedState, Interjector, Op, Proto, ProtoBuilder};

lazy_static! {
    static ref EXCLUSIVE_TEST: RwLock<()> = RwLock::default();
}

/// Run a test non-exclusively with other `test_nonex` tests.
#[allow(dead_code)]
pub fn test_nonex<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let lock = EXCLUSIVE_TEST.read().unwrap();
    let r = f();
    drop(lock);
    r
}

/// Run a test exclusively, so that no other `test_nonex` or `test_ex` tests will run concurrently.
///
/// This function _must_ wrap any tests that install an allocator with process-wide bookkeeping.
#[allow(dead_code)]
pub fn test_ex<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let lock = EXCLUSIVE_TEST.write().unwrap();
    let r = f();
    drop(lock);
    r
}

/// `while true do end`
#[allow(dead_code)]
pub fn spin_forever() -> Proto {
    ProtoBuilder::new("spin_forever")
        .with_op(Op::Jump(0))
        .build()
        .expect("valid proto")
}

/// `local i = 0; while i < n do i = i + 1 end; return i`
#[allow(dead_code)]
pub fn counting_loop(n: i64) -> Proto {
    ProtoBuilder::new("counting_loop")
        .with_locals(1)
        .with_ops(vec![
            Op::Int(0),
            Op::SetLocal(0),
            Op::GetLocal(0),
            Op::Int(n),
            Op::Lt,
            Op::JumpIfFalse(11),
            Op::GetLocal(0),
            Op::Int(1),
            Op::Add,
            Op::SetLocal(0),
            Op::Jump(2),
            Op::GetLocal(0),
            Op::Return(1),
        ])
        .build()
        .expect("valid proto")
}

/// Call the global native `native` with the loop counter each iteration, stopping early once
/// the global `stop` becomes truthy:
///
/// ```text
/// local i = 0
/// while i < n do
///     native(i)
///     if stop then return i end
///     i = i + 1
/// end
/// return i
/// ```
#[allow(dead_code)]
pub fn call_each_iteration(native: &str, n: i64) -> Proto {
    ProtoBuilder::new("call_each_iteration")
        .with_locals(1)
        .with_ops(vec![
            Op::Int(0),
            Op::SetLocal(0),
            Op::GetLocal(0),
            Op::Int(n),
            Op::Lt,
            Op::JumpIfFalse(19),
            Op::get_global(native),
            Op::GetLocal(0),
            Op::Call(1),
            Op::Pop,
            Op::get_global("stop"),
            Op::JumpIfFalse(14),
            Op::GetLocal(0),
            Op::Return(1),
            Op::GetLocal(0),
            Op::Int(1),
            Op::Add,
            Op::SetLocal(0),
            Op::Jump(2),
            Op::GetLocal(0),
            Op::Return(1),
        ])
        .build()
        .expect("valid proto")
}

/// `while count < target do end`
#[allow(dead_code)]
pub fn wait_for_count(target: i64) -> Proto {
    ProtoBuilder::new("wait_for_count")
        .with_ops(vec![
            Op::get_global("count"),
            Op::Int(target),
            Op::Lt,
            Op::JumpIfFalse(5),
            Op::Jump(0),
            Op::Return(0),
        ])
        .build()
        .expect("valid proto")
}

/// Create an interruptible state on its own thread, hand its interjector back, and run `f` on
/// the state there.
#[allow(dead_code)]
pub fn run_on_thread<F>(f: F) -> (Interjector, JoinHandle<Result<(), Error>>)
where
    F: FnOnce(&mut InstrumentedState) -> Result<(), Error> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let mut state = InstrumentedState::new(Instrumentations::INTERRUPTION)
            .expect("state can be created");
        tx.send(state.interjector().expect("state is interruptible"))
            .expect("interjector can be sent");
        f(&mut state)
    });
    let interjector = rx.recv().expect("interjector is received");
    (interjector, handle)
}
