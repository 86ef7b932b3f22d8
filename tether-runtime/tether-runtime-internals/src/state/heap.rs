use crate::alloc::{AllocFn, AllocTracker};
use crate::error::Error;
use libc::c_void;
use std::fmt;
use std::ptr::{self, NonNull};
use std::rc::Rc;
use std::sync::Arc;

/// The registered allocator of a state, through which every interpreter block is obtained.
pub(crate) struct Heap {
    alloc: AllocFn,
    ud: *mut c_void,
    /// Keeps a tracker alive for as long as any block allocated through it.
    _tracker: Option<Arc<AllocTracker>>,
}

impl Heap {
    /// # Safety
    ///
    /// `ud` must remain valid for `alloc` until the heap and every block allocated from it are
    /// dropped.
    pub(crate) unsafe fn new(alloc: AllocFn, ud: *mut c_void) -> Self {
        Heap {
            alloc,
            ud,
            _tracker: None,
        }
    }

    pub(crate) fn tracked(tracker: Arc<AllocTracker>) -> Self {
        let ud = Arc::as_ptr(&tracker) as *mut c_void;
        Heap {
            alloc: crate::alloc::tracking_alloc,
            ud,
            _tracker: Some(tracker),
        }
    }

    pub(crate) fn allocate(&self, size: usize) -> Result<NonNull<u8>, Error> {
        debug_assert!(size > 0);
        let block = unsafe { (self.alloc)(self.ud, ptr::null_mut(), 0, size) };
        NonNull::new(block as *mut u8).ok_or(Error::Memory)
    }

    /// Resize a block. On failure the original block is still owned by the caller.
    pub(crate) fn resize(
        &self,
        block: NonNull<u8>,
        osize: usize,
        nsize: usize,
    ) -> Result<NonNull<u8>, Error> {
        debug_assert!(nsize > 0);
        let resized = unsafe { (self.alloc)(self.ud, block.as_ptr() as *mut c_void, osize, nsize) };
        NonNull::new(resized as *mut u8).ok_or(Error::Memory)
    }

    pub(crate) fn free(&self, block: NonNull<u8>, size: usize) {
        unsafe {
            (self.alloc)(self.ud, block.as_ptr() as *mut c_void, size, 0);
        }
    }
}

/// An immutable byte string stored in a heap block, with a trailing NUL.
pub struct Str {
    heap: Rc<Heap>,
    block: NonNull<u8>,
    len: usize,
}

impl Str {
    pub(crate) fn new(heap: &Rc<Heap>, bytes: &[u8]) -> Result<Str, Error> {
        let block = heap.allocate(bytes.len() + 1)?;
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), block.as_ptr(), bytes.len());
            *block.as_ptr().add(bytes.len()) = 0;
        }
        Ok(Str {
            heap: Rc::clone(heap),
            block,
            len: bytes.len(),
        })
    }

    /// Build `a .. b`, growing a copy of `a` in place.
    pub(crate) fn concat(heap: &Rc<Heap>, a: &[u8], b: &[u8]) -> Result<Str, Error> {
        let head = Str::new(heap, a)?;
        let len = a.len() + b.len();
        let block = heap.resize(head.block, head.len + 1, len + 1)?;
        // the old block now belongs to `block`
        std::mem::forget(head);
        unsafe {
            ptr::copy_nonoverlapping(b.as_ptr(), block.as_ptr().add(a.len()), b.len());
            *block.as_ptr().add(len) = 0;
        }
        Ok(Str {
            heap: Rc::clone(heap),
            block,
            len,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.block.as_ptr(), self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for Str {
    fn drop(&mut self) {
        self.heap.free(self.block, self.len + 1);
    }
}

impl PartialEq for Str {
    fn eq(&self, other: &Str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl fmt::Debug for Str {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
    }
}
