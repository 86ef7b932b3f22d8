//! Syncpoints compiled into the interjection paths when `concurrent_testpoints` is enabled.
//!
//! Each [`Syncpoint`] is checked unconditionally at one location. By default a check is a no-op.
//! [`Syncpoint::wait_at`] arms it for a single check: the next thread to reach the syncpoint
//! blocks until the test resumes the returned [`SyncWaiter`], and threads arriving after that pass
//! straight through. This lets a test stop the interpreter thread (or one host thread) at an exact
//! point and race against it deterministically.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Default)]
struct Flags {
    armed: AtomicBool,
    arrived: AtomicBool,
    released: AtomicBool,
}

/// The test-side half of an armed `Syncpoint`.
///
/// A waiter is consumed by waiting on it, so each `wait_at` corresponds to exactly one pause.
pub struct SyncWaiter {
    flags: Arc<Flags>,
}

impl SyncWaiter {
    /// Wait until the syncpoint is reached, then let it continue.
    pub fn wait(self) {
        self.wait_and_then(|| {})
    }

    /// Wait until the syncpoint is reached, run `f` while it is held, then let it continue.
    pub fn wait_and_then<U, F: FnOnce() -> U>(self, f: F) -> U {
        let held = self.pause();
        let res = f();
        held.resume();
        res
    }

    /// Wait until the syncpoint is reached and keep it held. *Resume it, or the test deadlocks.*
    #[must_use]
    pub fn pause(self) -> Self {
        while !self.flags.arrived.load(Ordering::SeqCst) {
            thread::sleep(POLL_INTERVAL);
        }
        self
    }

    /// Let the syncpoint continue. Resuming before it is reached disarms it.
    pub fn resume(self) {
        self.flags.armed.store(false, Ordering::SeqCst);
        self.flags.released.store(true, Ordering::SeqCst);
    }
}

pub struct Syncpoint {
    flags: Arc<Flags>,
}

impl Syncpoint {
    pub fn new() -> Self {
        Syncpoint {
            flags: Arc::new(Flags::default()),
        }
    }

    /// Arm this syncpoint: the next `check` blocks until the returned waiter is resumed.
    pub fn wait_at(&self) -> SyncWaiter {
        self.flags.arrived.store(false, Ordering::SeqCst);
        self.flags.released.store(false, Ordering::SeqCst);
        self.flags.armed.store(true, Ordering::SeqCst);
        SyncWaiter {
            flags: Arc::clone(&self.flags),
        }
    }

    pub fn check(&self) {
        if !self.flags.armed.swap(false, Ordering::SeqCst) {
            return;
        }
        self.flags.arrived.store(true, Ordering::SeqCst);
        while !self.flags.released.load(Ordering::SeqCst) {
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Default for Syncpoint {
    fn default() -> Self {
        Self::new()
    }
}

/// Every syncpoint on the interjection paths of one instrumented state.
#[derive(Default)]
pub struct LockTestpoints {
    /// Host thread, after queueing an action and before arming the hook.
    pub interject_after_enqueue: Syncpoint,
    /// Host thread, after storing a cancellation message and before raising the flag.
    pub cancel_after_storing_message: Syncpoint,
    /// Interpreter thread, on hook entry before the cancellation check.
    pub hook_before_cancel_check: Syncpoint,
    /// Interpreter thread, after disarming the hook and before draining.
    pub hook_after_disarm: Syncpoint,
    /// Interpreter thread, after each drained action returns.
    pub drain_after_action: Syncpoint,
}

impl LockTestpoints {
    pub fn new() -> Self {
        Self::default()
    }
}
