use crate::error::Error;
#[cfg(feature = "concurrent_testpoints")]
use crate::lock_testpoints::LockTestpoints;
use crate::state::State;
use std::collections::VecDeque;
#[cfg(feature = "concurrent_testpoints")]
use std::sync::Arc;
use std::sync::Mutex;

/// Work queued by a host thread to run on the interpreter thread.
pub type Action = Box<dyn FnOnce(&mut State) -> Result<(), Error> + Send + 'static>;

/// A multi-producer, single-consumer FIFO of [`Action`]s.
///
/// The lock is held only to push or pop one action, never while an action runs, so producers
/// never wait on interpreter work. Actions from one producer keep that producer's order; actions
/// from different producers interleave arbitrarily.
pub struct PendingActionQueue {
    actions: Mutex<VecDeque<Action>>,
    #[cfg(feature = "concurrent_testpoints")]
    lock_testpoints: Arc<LockTestpoints>,
}

impl PendingActionQueue {
    #[cfg(not(feature = "concurrent_testpoints"))]
    pub fn new() -> Self {
        PendingActionQueue {
            actions: Mutex::new(VecDeque::new()),
        }
    }

    #[cfg(feature = "concurrent_testpoints")]
    pub fn new(lock_testpoints: Arc<LockTestpoints>) -> Self {
        PendingActionQueue {
            actions: Mutex::new(VecDeque::new()),
            lock_testpoints,
        }
    }

    pub fn enqueue(&self, action: Action) {
        self.actions.lock().unwrap().push_back(action);
    }

    fn pop(&self) -> Option<Action> {
        self.actions.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.actions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run actions until the queue is empty, returning how many ran.
    ///
    /// Actions queued while draining run in the same pass. If an action fails, the pass stops
    /// and the error is returned; actions still queued stay queued, in order.
    ///
    /// Must only be called on the interpreter thread that owns `state`.
    pub fn drain_all(&self, state: &mut State) -> Result<usize, Error> {
        let mut ran = 0;
        while let Some(action) = self.pop() {
            let res = action(state);
            ran += 1;

            #[cfg(feature = "concurrent_testpoints")]
            self.lock_testpoints.drain_after_action.check();

            res?;
        }
        Ok(ran)
    }
}
