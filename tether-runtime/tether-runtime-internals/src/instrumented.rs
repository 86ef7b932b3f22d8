//! The factory for interpreters with cross-thread instrumentation.
use crate::alloc::{AllocTracker, Limits};
use crate::error::Error;
use crate::interjector::{self, Interjector};
#[cfg(feature = "concurrent_testpoints")]
use crate::lock_testpoints::LockTestpoints;
use crate::state::State;
use bitflags::bitflags;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

bitflags! {
    /// The facilities an [`InstrumentedState`] is created with.
    pub struct Instrumentations: u32 {
        /// Cross-thread interjection and cancellation through an [`Interjector`].
        const INTERRUPTION = 0b01;
        /// Live tracking of the bytes the interpreter has allocated.
        const MEMORY_MONITORING = 0b10;
    }
}

/// An interpreter together with the facilities it was instrumented with.
///
/// Dereferences to the underlying [`State`]. Every facility accessor returns
/// [`Error::Unsupported`] if the state was created without that facility.
pub struct InstrumentedState {
    state: ManuallyDrop<State>,
    instrumentations: Instrumentations,
    interjector: Option<Interjector>,
    tracker: Option<Arc<AllocTracker>>,
    #[cfg(feature = "concurrent_testpoints")]
    lock_testpoints: Arc<LockTestpoints>,
}

impl InstrumentedState {
    /// Create an instrumented state with default limits.
    pub fn new(instrumentations: Instrumentations) -> Result<Self, Error> {
        Self::with_limits(instrumentations, &Limits::default())
    }

    pub fn with_limits(
        instrumentations: Instrumentations,
        limits: &Limits,
    ) -> Result<Self, Error> {
        let tracker = if instrumentations.contains(Instrumentations::MEMORY_MONITORING) {
            Some(Arc::new(AllocTracker::new()))
        } else {
            None
        };
        let mut state = match tracker {
            Some(ref tracker) => State::with_tracker(Arc::clone(tracker), limits)?,
            None => State::with_limits(limits)?,
        };

        #[cfg(feature = "concurrent_testpoints")]
        let lock_testpoints = Arc::new(LockTestpoints::new());

        let interjector = if instrumentations.contains(Instrumentations::INTERRUPTION) {
            Some(interjector::bind(
                &mut state,
                #[cfg(feature = "concurrent_testpoints")]
                Arc::clone(&lock_testpoints),
            )?)
        } else {
            None
        };

        tracing::debug!(?instrumentations, "instrumented state created");
        Ok(InstrumentedState {
            state: ManuallyDrop::new(state),
            instrumentations,
            interjector,
            tracker,
            #[cfg(feature = "concurrent_testpoints")]
            lock_testpoints,
        })
    }

    pub fn instrumentations(&self) -> Instrumentations {
        self.instrumentations
    }

    /// A new handle for interjecting into this state from other threads.
    pub fn interjector(&self) -> Result<Interjector, Error> {
        self.interjector
            .clone()
            .ok_or_else(|| Error::Unsupported("state was created without interruption".to_owned()))
    }

    /// Request cancellation with a message encoded in the state's own encoding.
    pub fn cancel(&self, message: &str) -> Result<(), Error> {
        self.interjector()?.cancel(message, self.state.encoding())
    }

    /// The outstanding number of bytes allocated through this state's allocator.
    pub fn memory_allocated_size(&self) -> Result<usize, Error> {
        Ok(self.memory_stats()?.allocated())
    }

    /// The live allocation counter, readable from any thread.
    pub fn memory_stats(&self) -> Result<Arc<AllocTracker>, Error> {
        self.tracker.clone().ok_or_else(|| {
            Error::Unsupported("state was created without memory monitoring".to_owned())
        })
    }

    #[cfg(feature = "concurrent_testpoints")]
    pub fn lock_testpoints(&self) -> &Arc<LockTestpoints> {
        &self.lock_testpoints
    }
}

impl Deref for InstrumentedState {
    type Target = State;

    fn deref(&self) -> &State {
        &self.state
    }
}

impl DerefMut for InstrumentedState {
    fn deref_mut(&mut self) -> &mut State {
        &mut self.state
    }
}

impl Drop for InstrumentedState {
    fn drop(&mut self) {
        let heap = self.state.heap_ref();
        // The state must go first: its heap blocks are all returned through the tracker.
        unsafe { ManuallyDrop::drop(&mut self.state) };

        if let Some(ref tracker) = self.tracker {
            let outstanding = tracker.allocated();
            let escaped = heap.strong_count();
            if escaped > 0 {
                // Values held by the host keep their blocks, and the count, until they drop.
                tracing::debug!(outstanding, escaped, "values outlive their state");
            } else if outstanding != 0 {
                tracing::warn!(outstanding, "memory still allocated after state teardown");
                if !std::thread::panicking() {
                    debug_assert_eq!(outstanding, 0, "allocation tracking is unbalanced");
                }
            }
        }
    }
}
