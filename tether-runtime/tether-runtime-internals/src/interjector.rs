//! Cross-thread interjection into a running [`State`].
//!
//! An [`Interjector`] lets any host thread queue work to run on the interpreter thread, or
//! request that the running script be cancelled. Neither operation blocks on the interpreter:
//! both record their request in shared state and then arm the state's hook with a single atomic
//! store. The interpreter discovers the request at its next safepoint, where the hook handler
//! either raises the cancellation or drains the pending-action queue.
//!
//! Handles only hold a weak reference to the shared state. The strong reference lives in the
//! hook installed on the `State`, so once the interpreter is dropped every handle operation
//! returns [`Error::InvalidHandle`].
mod queue;

pub use crate::interjector::queue::{Action, PendingActionQueue};

use crate::error::{Error, Message};
use crate::hook::{HookController, HookInfo, HookState};
#[cfg(feature = "concurrent_testpoints")]
use crate::lock_testpoints::LockTestpoints;
use crate::state::{Hook, State};
use encoding_rs::Encoding;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// State shared between an interpreter's hook and the host-side handles.
struct InterjectState {
    queue: PendingActionQueue,
    cancelled: AtomicBool,
    cancel_message: Mutex<Option<Message>>,
    hook: HookController,
    draining: AtomicBool,
    invocations: AtomicU64,
    #[cfg(feature = "concurrent_testpoints")]
    lock_testpoints: Arc<LockTestpoints>,
}

/// Held for the duration of one drain pass.
struct DrainGuard<'a> {
    draining: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
    fn acquire(draining: &'a AtomicBool) -> Result<Self, Error> {
        if draining.swap(true, Ordering::SeqCst) {
            return Err(Error::Configuration(
                "interjection drain re-entered from its own hook".to_owned(),
            ));
        }
        Ok(DrainGuard { draining })
    }
}

impl<'a> Drop for DrainGuard<'a> {
    fn drop(&mut self) {
        self.draining.store(false, Ordering::SeqCst);
    }
}

impl InterjectState {
    /// The flag is a lock-free hint; the message behind the lock decides.
    fn pending_cancellation(&self) -> Option<Message> {
        if !self.cancelled.load(Ordering::SeqCst) {
            return None;
        }
        let message = self.cancel_message.lock().unwrap();
        if message.is_none() {
            // A revert landed between a cancel storing its message and raising the flag. Any
            // cancel still in flight stores its message before its flag, so lowering the flag
            // under the lock cannot hide it.
            self.cancelled.store(false, Ordering::SeqCst);
        }
        message.clone()
    }

    /// The hook handler. Runs on the interpreter thread at an armed safepoint.
    fn on_safepoint(&self, state: &mut State, info: &HookInfo) -> Result<(), Error> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        #[cfg(feature = "concurrent_testpoints")]
        self.lock_testpoints.hook_before_cancel_check.check();

        // The hook stays armed so the cancellation is raised again at every later safepoint.
        if let Some(message) = self.pending_cancellation() {
            tracing::debug!(event = ?info.event, depth = info.depth, "raising cancellation");
            return Err(Error::Cancelled(message));
        }

        // Disarm before draining: an action queued from now on re-arms the hook, so it is either
        // drained by this pass or picked up at the next safepoint.
        self.hook.disable_hook();

        #[cfg(feature = "concurrent_testpoints")]
        self.lock_testpoints.hook_after_disarm.check();

        let _guard = DrainGuard::acquire(&self.draining)?;
        match self.queue.drain_all(state) {
            Ok(ran) => {
                tracing::trace!(event = ?info.event, actions = ran, "drained interjections");
                Ok(())
            }
            Err(e) => {
                let remaining = self.queue.len();
                if remaining > 0 {
                    self.hook.enable_hook();
                }
                tracing::warn!(remaining, "interjected action failed: {}", e);
                Err(e)
            }
        }
    }
}

/// A thread-safe handle for interjecting into one interpreter.
///
/// Handles are cheap to clone and may be sent to any number of host threads. Each operation
/// returns [`Error::InvalidHandle`] once the interpreter has been dropped.
#[derive(Clone)]
pub struct Interjector {
    shared: Weak<InterjectState>,
}

impl Interjector {
    fn upgrade(&self) -> Result<Arc<InterjectState>, Error> {
        self.shared.upgrade().ok_or(Error::InvalidHandle)
    }

    /// Queue `action` to run on the interpreter thread at its next safepoint.
    ///
    /// Actions queued from one thread run in the order they were queued. An action that returns
    /// an error raises that error in the interpreter at the safepoint it ran at; actions still
    /// queued behind it are kept and run at a later safepoint.
    pub fn interject<F>(&self, action: F) -> Result<(), Error>
    where
        F: FnOnce(&mut State) -> Result<(), Error> + Send + 'static,
    {
        let shared = self.upgrade()?;
        shared.queue.enqueue(Box::new(action));

        #[cfg(feature = "concurrent_testpoints")]
        shared.lock_testpoints.interject_after_enqueue.check();

        shared.hook.enable_hook();
        tracing::trace!("action interjected");
        Ok(())
    }

    /// Request cancellation of the running script with `message`.
    ///
    /// `message` is encoded with `encoding`, the encoding the interpreter's strings use. From the
    /// next safepoint on, every safepoint raises [`Error::Cancelled`] with this message until
    /// [`revert_cancel`](#method.revert_cancel) is called. Cancellation takes precedence over
    /// queued actions, which stay queued.
    ///
    /// Calling `cancel` again replaces the message.
    pub fn cancel(&self, message: &str, encoding: &'static Encoding) -> Result<(), Error> {
        let shared = self.upgrade()?;
        *shared.cancel_message.lock().unwrap() = Some(Message::from_str(message, encoding));

        #[cfg(feature = "concurrent_testpoints")]
        shared.lock_testpoints.cancel_after_storing_message.check();

        shared.cancelled.store(true, Ordering::SeqCst);
        shared.hook.enable_hook();
        tracing::debug!(reason = message, "cancellation requested");
        Ok(())
    }

    /// Withdraw a pending cancellation.
    ///
    /// The hook is left armed, so any queued actions still run at the next safepoint.
    pub fn revert_cancel(&self) -> Result<(), Error> {
        let shared = self.upgrade()?;
        shared.cancelled.store(false, Ordering::SeqCst);
        *shared.cancel_message.lock().unwrap() = None;
        tracing::debug!("cancellation reverted");
        Ok(())
    }

    pub fn is_cancel_pending(&self) -> Result<bool, Error> {
        let shared = self.upgrade()?;
        Ok(shared.pending_cancellation().is_some())
    }

    /// Number of actions waiting for the next drain pass.
    pub fn pending_actions(&self) -> Result<usize, Error> {
        let shared = self.upgrade()?;
        Ok(shared.queue.len())
    }

    /// How many times the interpreter has entered the interjection hook.
    pub fn hook_invocations(&self) -> Result<u64, Error> {
        let shared = self.upgrade()?;
        Ok(shared.invocations.load(Ordering::SeqCst))
    }

    pub fn hook_state(&self) -> Result<HookState, Error> {
        let shared = self.upgrade()?;
        Ok(shared.hook.state())
    }

    /// Is the interpreter this handle was bound to still alive?
    pub fn is_valid(&self) -> bool {
        self.shared.strong_count() > 0
    }
}

/// Install the interjection hook on `state` and return the first handle for it.
///
/// A state has a single hook slot, so it can be bound at most once.
pub(crate) fn bind(
    state: &mut State,
    #[cfg(feature = "concurrent_testpoints")] lock_testpoints: Arc<LockTestpoints>,
) -> Result<Interjector, Error> {
    if state.has_hook() {
        return Err(Error::Configuration(
            "state already has a hook installed".to_owned(),
        ));
    }

    let shared = Arc::new(InterjectState {
        #[cfg(not(feature = "concurrent_testpoints"))]
        queue: PendingActionQueue::new(),
        #[cfg(feature = "concurrent_testpoints")]
        queue: PendingActionQueue::new(Arc::clone(&lock_testpoints)),
        cancelled: AtomicBool::new(false),
        cancel_message: Mutex::new(None),
        hook: HookController::for_state(state),
        draining: AtomicBool::new(false),
        invocations: AtomicU64::new(0),
        #[cfg(feature = "concurrent_testpoints")]
        lock_testpoints,
    });
    let interjector = Interjector {
        shared: Arc::downgrade(&shared),
    };

    let handler = Arc::clone(&shared);
    let hook: Hook = Box::new(move |state: &mut State, info: &HookInfo| {
        handler.on_safepoint(state, info)
    });
    shared.hook.preset_hook(state, hook);
    tracing::debug!("interjector bound");

    Ok(interjector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Op, ProtoBuilder, Value};
    use crate::status::Status;

    #[cfg(not(feature = "concurrent_testpoints"))]
    fn bind(state: &mut State) -> Result<Interjector, Error> {
        super::bind(state)
    }

    #[cfg(feature = "concurrent_testpoints")]
    fn bind(state: &mut State) -> Result<Interjector, Error> {
        super::bind(state, Arc::new(LockTestpoints::new()))
    }

    fn spin(iterations: i64) -> crate::state::Proto {
        // local i = 0; while i < n do i = i + 1 end; return i
        ProtoBuilder::new("spin")
            .with_locals(1)
            .with_ops(vec![
                Op::Int(0),
                Op::SetLocal(0),
                Op::GetLocal(0),
                Op::Int(iterations),
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

    #[test]
    fn bind_leaves_the_hook_disarmed() {
        let mut state = State::new().expect("state can be created");
        let interjector = bind(&mut state).expect("bind succeeds");
        assert!(!interjector.hook_state().unwrap().armed);
        assert_eq!(interjector.hook_state().unwrap().instruction_threshold, 1);
    }

    #[test]
    fn binding_twice_is_refused() {
        let mut state = State::new().expect("state can be created");
        bind(&mut state).expect("bind succeeds");
        match bind(&mut state) {
            Err(Error::Configuration(_)) => (),
            _ => panic!("second bind must fail"),
        }
    }

    #[test]
    fn interject_arms_and_drain_disarms() {
        let mut state = State::new().expect("state can be created");
        let interjector = bind(&mut state).expect("bind succeeds");

        interjector
            .interject(|state: &mut State| {
                state.set_global("ran", Value::Boolean(true));
                Ok(())
            })
            .expect("interject succeeds");
        assert!(interjector.hook_state().unwrap().armed);
        assert_eq!(interjector.pending_actions().unwrap(), 1);

        state.run(spin(10)).expect("script runs");
        assert_eq!(state.get_global("ran"), Value::Boolean(true));
        assert!(!interjector.hook_state().unwrap().armed);
        assert_eq!(interjector.pending_actions().unwrap(), 0);
        assert_eq!(interjector.hook_invocations().unwrap(), 1);
    }

    #[test]
    fn failing_action_rearms_for_the_rest() {
        let mut state = State::new().expect("state can be created");
        let interjector = bind(&mut state).expect("bind succeeds");

        interjector
            .interject(|_: &mut State| Err(Error::runtime("boom")))
            .unwrap();
        interjector
            .interject(|state: &mut State| {
                state.set_global("after", Value::Integer(1));
                Ok(())
            })
            .unwrap();

        let err = state.run(spin(10)).expect_err("action error propagates");
        assert_eq!(err.status(), Status::RuntimeError);
        assert!(err.to_string().contains("boom"));
        assert!(interjector.hook_state().unwrap().armed);
        assert_eq!(state.get_global("after"), Value::Nil);

        state.run(spin(10)).expect("script runs");
        assert_eq!(state.get_global("after"), Value::Integer(1));
        assert!(!interjector.hook_state().unwrap().armed);
    }

    #[test]
    fn cancellation_beats_queued_actions() {
        let mut state = State::new().expect("state can be created");
        let interjector = bind(&mut state).expect("bind succeeds");

        interjector
            .interject(|state: &mut State| {
                state.set_global("ran", Value::Boolean(true));
                Ok(())
            })
            .unwrap();
        interjector
            .cancel("stop", encoding_rs::UTF_8)
            .expect("cancel succeeds");

        match state.run(spin(10)) {
            Err(Error::Cancelled(m)) => assert_eq!(m.as_bytes(), b"stop"),
            other => panic!("expected cancellation, got {:?}", other),
        }
        assert_eq!(state.get_global("ran"), Value::Nil);
        assert_eq!(interjector.pending_actions().unwrap(), 1);
        assert!(interjector.hook_state().unwrap().armed);

        interjector.revert_cancel().expect("revert succeeds");
        assert_eq!(state.run(spin(10)).expect("script runs"), vec![Value::Integer(10)]);
        assert_eq!(state.get_global("ran"), Value::Boolean(true));
    }

    #[test]
    fn flag_without_a_message_is_lowered() {
        let mut state = State::new().expect("state can be created");
        let interjector = bind(&mut state).expect("bind succeeds");
        let shared = interjector.shared.upgrade().expect("state is alive");

        // the state a revert leaves when it lands inside a cancel
        shared.cancelled.store(true, Ordering::SeqCst);
        assert!(!interjector.is_cancel_pending().unwrap());
        assert!(!shared.cancelled.load(Ordering::SeqCst));

        interjector.cancel("stop", encoding_rs::UTF_8).unwrap();
        assert!(shared.cancelled.load(Ordering::SeqCst));
        assert!(interjector.is_cancel_pending().unwrap());
    }

    #[test]
    fn handles_are_invalid_after_the_state_is_dropped() {
        let mut state = State::new().expect("state can be created");
        let interjector = bind(&mut state).expect("bind succeeds");
        assert!(interjector.is_valid());
        drop(state);

        assert!(!interjector.is_valid());
        assert!(matches!(
            interjector.interject(|_: &mut State| Ok(())),
            Err(Error::InvalidHandle)
        ));
        assert!(matches!(
            interjector.cancel("late", encoding_rs::UTF_8),
            Err(Error::InvalidHandle)
        ));
        assert!(matches!(interjector.revert_cancel(), Err(Error::InvalidHandle)));
    }

    #[test]
    fn drain_guard_rejects_reentry() {
        let draining = AtomicBool::new(false);
        let guard = DrainGuard::acquire(&draining).expect("first acquire succeeds");
        assert!(matches!(
            DrainGuard::acquire(&draining),
            Err(Error::Configuration(_))
        ));
        drop(guard);
        assert!(DrainGuard::acquire(&draining).is_ok());
    }
}
