//! The embedded interpreter: a single-threaded, cooperatively-scheduled stack machine.
//!
//! A `State` executes [`Proto`]s on the thread that created it. It yields control to its single
//! installed hook only at safepoints:
//!
//! * a `Call` event on entry to any function,
//! * a `Return` event on exit from any function, and
//! * a `Count` event every `instruction_threshold` executed instructions.
//!
//! Each safepoint first polls the shared [`HookSlot`](../hook/struct.HookSlot.html) mask with one
//! atomic load, so an unarmed hook costs nothing more. While the hook runs, further safepoints on
//! the state are suppressed, so a hook is never invoked recursively by the work it does.
//!
//! Errors unwind as `Err` values to the nearest protected call: either a `PCall` instruction in
//! a script, or [`State::pcall`] at the embedding boundary.
mod exec;
pub mod heap;
pub mod proto;
pub mod value;

pub use crate::state::heap::Str;
pub use crate::state::proto::{Op, Proto, ProtoBuilder};
pub use crate::state::value::{Function, Native, NativeFn, Value};

use crate::alloc::{default_alloc, AllocFn, AllocTracker, Limits};
use crate::error::{Error, Message};
use crate::hook::{HookEvent, HookInfo, HookMask, HookSlot, HookState};
use crate::state::heap::Heap;
use encoding_rs::Encoding;
use libc::c_void;
use std::collections::HashMap;
use std::ptr::{self, NonNull};
use std::rc::{Rc, Weak};
use std::sync::Arc;

/// The single safepoint callback of a state.
pub type Hook = Box<dyn FnMut(&mut State, &HookInfo) -> Result<(), Error>>;

/// Size of the block a state allocates for itself when it is created.
pub const STATE_BLOCK_SIZE: usize = 512;

pub struct State {
    heap: Rc<Heap>,
    state_block: NonNull<u8>,
    stack: Vec<Value>,
    globals: HashMap<String, Value>,
    depth: usize,
    limits: Limits,
    encoding: &'static Encoding,
    hook_slot: Arc<HookSlot>,
    hook: Option<Hook>,
    hook_count: u32,
    allow_hook: bool,
    instructions: u64,
    /// Lowest stack height the running frame may pop to: its base plus its locals.
    frame_floor: usize,
}

impl State {
    /// Create a state using the system allocator and default limits.
    pub fn new() -> Result<State, Error> {
        Self::with_limits(&Limits::default())
    }

    pub fn with_limits(limits: &Limits) -> Result<State, Error> {
        unsafe { Self::with_allocator(default_alloc, ptr::null_mut(), limits) }
    }

    /// Create a state whose allocations are counted by `tracker`.
    pub fn with_tracker(tracker: Arc<AllocTracker>, limits: &Limits) -> Result<State, Error> {
        Self::from_heap(Heap::tracked(tracker), limits)
    }

    /// Create a state with a custom allocator callback, registered once for its lifetime.
    ///
    /// # Safety
    ///
    /// `ud` must stay valid for `alloc` until the state and every value it created are dropped.
    pub unsafe fn with_allocator(
        alloc: AllocFn,
        ud: *mut c_void,
        limits: &Limits,
    ) -> Result<State, Error> {
        Self::from_heap(Heap::new(alloc, ud), limits)
    }

    fn from_heap(heap: Heap, limits: &Limits) -> Result<State, Error> {
        limits.validate()?;
        let state_block = heap.allocate(STATE_BLOCK_SIZE)?;
        Ok(State {
            heap: Rc::new(heap),
            state_block,
            stack: Vec::new(),
            globals: HashMap::new(),
            depth: 0,
            limits: limits.clone(),
            encoding: encoding_rs::WINDOWS_1252,
            hook_slot: Arc::new(HookSlot::new()),
            hook: None,
            hook_count: 1,
            allow_hook: true,
            instructions: 0,
            frame_floor: 0,
        })
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// The encoding used to turn host text into interpreter strings and back.
    ///
    /// Defaults to ISO-8859-1 (`windows-1252`).
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn set_encoding(&mut self, encoding: &'static Encoding) {
        self.encoding = encoding;
    }

    /// Create a string value from raw bytes.
    pub fn new_bytes<B: AsRef<[u8]>>(&self, bytes: B) -> Result<Value, Error> {
        Ok(Value::String(Rc::new(Str::new(&self.heap, bytes.as_ref())?)))
    }

    /// Create a string value from text in the state's encoding.
    pub fn new_string(&self, text: &str) -> Result<Value, Error> {
        let (bytes, _, _) = self.encoding.encode(text);
        self.new_bytes(bytes)
    }

    pub(crate) fn message_value(&self, err: &Error) -> Result<Value, Error> {
        match err.message() {
            Some(msg) => self.new_bytes(msg.as_bytes()),
            None => self.new_string(&err.to_string()),
        }
    }

    /// Decode a string value with the state's encoding.
    pub fn to_string_lossy(&self, value: &Value) -> Option<String> {
        value.as_bytes().map(|bytes| {
            let (text, _) = self.encoding.decode_without_bom_handling(bytes);
            text.into_owned()
        })
    }

    /// Build a runtime error message in the state's encoding.
    pub fn runtime_error(&self, text: &str) -> Error {
        Error::Runtime(Message::from_str(text, self.encoding))
    }

    pub fn load(&self, proto: Proto) -> Value {
        Value::Function(Function::Script(Rc::new(proto)))
    }

    /// Register a native function under a global name.
    pub fn register<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&mut State, Vec<Value>) -> Result<Vec<Value>, Error> + 'static,
    {
        let native = Native {
            name: name.to_owned(),
            func: Box::new(func),
        };
        self.set_global(name, Value::Function(Function::Native(Rc::new(native))));
    }

    pub fn get_global(&self, name: &str) -> Value {
        self.globals.get(name).cloned().unwrap_or(Value::Nil)
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        if value.is_nil() {
            self.globals.remove(name);
        } else {
            self.globals.insert(name.to_owned(), value);
        }
    }

    /// Call a function. Errors propagate to the caller's protected call.
    pub fn call(&mut self, func: &Value, args: Vec<Value>) -> Result<Vec<Value>, Error> {
        let func = match func {
            Value::Function(func) => func.clone(),
            other => {
                return Err(self.runtime_error(&format!(
                    "attempt to call a {} value",
                    other.type_name()
                )))
            }
        };
        if self.depth >= self.limits.max_call_depth {
            return Err(self.runtime_error("stack overflow"));
        }
        self.depth += 1;
        let res = self.enter(&func, args);
        self.depth -= 1;
        res
    }

    /// Call a function at the protected-call boundary.
    ///
    /// The value stack is restored to its depth at entry whatever the outcome; the error, if any,
    /// is returned with its [`Status`](../status/enum.Status.html) available from
    /// `Error::status`.
    pub fn pcall(&mut self, func: &Value, args: Vec<Value>) -> Result<Vec<Value>, Error> {
        let top = self.stack.len();
        let depth = self.depth;
        let res = self.call(func, args);
        debug_assert_eq!(self.depth, depth);
        if let Err(ref e) = res {
            self.stack.truncate(top);
            tracing::debug!(status = ?e.status(), "protected call failed: {}", e);
        }
        res
    }

    /// Load and run a prototype in a protected call.
    pub fn run(&mut self, proto: Proto) -> Result<Vec<Value>, Error> {
        let func = self.load(proto);
        self.pcall(&func, vec![])
    }

    /// Number of instructions executed over the state's lifetime.
    pub fn instruction_count(&self) -> u64 {
        self.instructions
    }

    /// Current call depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn hook_state(&self) -> HookState {
        self.hook_slot.snapshot()
    }

    /// Every string value holds the heap, so the heap outlives the state while any value does.
    pub(crate) fn heap_ref(&self) -> Weak<Heap> {
        Rc::downgrade(&self.heap)
    }

    pub(crate) fn hook_slot(&self) -> Arc<HookSlot> {
        Arc::clone(&self.hook_slot)
    }

    pub(crate) fn has_hook(&self) -> bool {
        self.hook.is_some() || !self.allow_hook
    }

    pub(crate) fn install_hook(&mut self, hook: Hook) {
        self.hook = Some(hook);
        self.hook_count = 1;
    }

    /// Poll the hook slot at a safepoint, dispatching to the hook if the event is armed.
    fn safepoint(&mut self, event: HookEvent) -> Result<(), Error> {
        let mask = self.hook_slot.mask();
        if mask.is_empty() {
            return Ok(());
        }
        if event == HookEvent::Count {
            if !mask.contains(HookMask::COUNT) {
                return Ok(());
            }
            self.hook_count = self.hook_count.saturating_sub(1);
            if self.hook_count > 0 {
                return Ok(());
            }
            self.hook_count = self.hook_slot.threshold();
        } else if !mask.contains(event.mask()) {
            return Ok(());
        }
        if !self.allow_hook {
            return Ok(());
        }

        let mut hook = match self.hook.take() {
            Some(hook) => hook,
            None => return Ok(()),
        };
        self.allow_hook = false;
        let info = HookInfo {
            event,
            depth: self.depth,
        };
        let res = hook(self, &info);
        self.allow_hook = true;
        if self.hook.is_none() {
            self.hook = Some(hook);
        }
        res
    }
}

impl Drop for State {
    fn drop(&mut self) {
        self.hook = None;
        self.stack.clear();
        self.globals.clear();
        self.heap.free(self.state_block, STATE_BLOCK_SIZE);
    }
}
