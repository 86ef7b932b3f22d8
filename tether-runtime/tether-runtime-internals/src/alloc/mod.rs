//! Allocator callbacks for a [`State`](../state/struct.State.html), and the runtime limits that
//! govern its stacks.
//!
//! A state obtains every block of interpreter memory through a single [`AllocFn`] registered when
//! it is created. The [`tracking_alloc`] callback keeps a live-byte total in an [`AllocTracker`]
//! that any thread may read, which is the only memory statistic other threads are allowed to see:
//! the state's own bookkeeping belongs to the interpreter thread.
use crate::error::Error;
use libc::c_void;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// The allocator callback signature.
///
/// * `ptr == null`: allocate a fresh block of `nsize` bytes; `osize` carries no meaning.
/// * `nsize == 0`: free the `osize`-byte block at `ptr` and return null.
/// * otherwise: resize the `osize`-byte block at `ptr` to `nsize` bytes.
///
/// Returning null for a non-zero `nsize` reports allocation failure; the block at `ptr` is then
/// left untouched.
pub type AllocFn =
    unsafe extern "C" fn(ud: *mut c_void, ptr: *mut c_void, osize: usize, nsize: usize) -> *mut c_void;

/// The allocator installed on states that are not memory-monitored.
pub unsafe extern "C" fn default_alloc(
    _ud: *mut c_void,
    ptr: *mut c_void,
    _osize: usize,
    nsize: usize,
) -> *mut c_void {
    if nsize == 0 {
        libc::free(ptr);
        ptr::null_mut()
    } else {
        libc::realloc(ptr, nsize)
    }
}

/// A live-byte counter for one state's allocations.
///
/// Only the interpreter thread writes the counter, from inside [`tracking_alloc`]; any thread may
/// read it. Both sides use single word-sized atomic operations, so a reader never sees a torn
/// value.
#[derive(Debug, Default)]
pub struct AllocTracker {
    allocated: AtomicUsize,
}

impl AllocTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently allocated by the tracked state.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    fn account(&self, osize: usize, nsize: usize) {
        if nsize >= osize {
            self.allocated.fetch_add(nsize - osize, Ordering::SeqCst);
        } else {
            self.allocated.fetch_sub(osize - nsize, Ordering::SeqCst);
        }
    }
}

/// An allocator callback that keeps an [`AllocTracker`] current.
///
/// Growth is only counted once the underlying allocator succeeds, so the counter equals the live
/// total after every call. Failures are reported to the caller unchanged.
///
/// # Safety
///
/// `ud` must point to an `AllocTracker` that outlives every block allocated through it, and the
/// usual `realloc`/`free` requirements apply to `ptr` and `osize`.
pub unsafe extern "C" fn tracking_alloc(
    ud: *mut c_void,
    ptr: *mut c_void,
    osize: usize,
    nsize: usize,
) -> *mut c_void {
    let tracker = &*(ud as *const AllocTracker);
    let osize = if ptr.is_null() { 0 } else { osize };

    if nsize == 0 {
        libc::free(ptr);
        tracker.account(osize, 0);
        return ptr::null_mut();
    }

    let block = libc::realloc(ptr, nsize);
    if block.is_null() {
        tracing::error!("allocation of {} bytes failed ({} live)", nsize, tracker.allocated());
        return ptr::null_mut();
    }
    tracker.account(osize, nsize);
    block
}

/// Runtime limits for a [`State`](../state/struct.State.html).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Limits {
    /// Max number of nested calls, including native and protected calls. (default 200)
    pub max_call_depth: usize,
    /// Max number of values on the value stack. (default 1,000,000)
    pub max_stack_size: usize,
}

impl Limits {
    pub const fn default() -> Limits {
        Limits {
            max_call_depth: 200,
            max_stack_size: 1_000_000,
        }
    }

    pub const fn with_max_call_depth(mut self, max_call_depth: usize) -> Self {
        self.max_call_depth = max_call_depth;
        self
    }

    pub const fn with_max_stack_size(mut self, max_stack_size: usize) -> Self {
        self.max_stack_size = max_stack_size;
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.max_call_depth == 0 {
            return Err(Error::InvalidArgument(
                "max call depth must be greater than 0",
            ));
        }
        if self.max_stack_size < 16 {
            return Err(Error::InvalidArgument(
                "max stack size must be at least 16 values",
            ));
        }
        if self.max_call_depth > 10_000 {
            tracing::debug!(
                "max call depth of {} may exhaust the native stack before the limit is reached",
                self.max_call_depth
            );
        }
        Ok(())
    }
}
