//! `tether-runtime` runs scripts in an embedded, single-threaded interpreter while letting any
//! number of host threads reach into it safely.
//!
//! An [`InstrumentedState`] is created with a set of [`Instrumentations`]:
//!
//! - `INTERRUPTION` binds an [`Interjector`] to the state. Host threads use it to queue
//!   actions that run on the interpreter thread at its next safepoint, or to cancel the running
//!   script with a message.
//! - `MEMORY_MONITORING` routes every interpreter allocation through an [`AllocTracker`] whose
//!   running total can be read from any thread.
//!
//! ```no_run
//! use tether_runtime::{Instrumentations, InstrumentedState, Op, ProtoBuilder, State, Value};
//!
//! let mut state = InstrumentedState::new(Instrumentations::all()).unwrap();
//! let interjector = state.interjector().unwrap();
//!
//! std::thread::spawn(move || {
//!     interjector
//!         .interject(|state: &mut State| {
//!             state.set_global("done", Value::Boolean(true));
//!             Ok(())
//!         })
//!         .unwrap();
//! });
//!
//! // while not done do end
//! let proto = ProtoBuilder::new("wait")
//!     .with_ops(vec![
//!         Op::get_global("done"),
//!         Op::JumpIfFalse(0),
//!         Op::Return(0),
//!     ])
//!     .build()
//!     .unwrap();
//! state.run(proto).unwrap();
//! ```
//!
//! Requests never block on the interpreter. They arm the state's hook with a single atomic
//! store, and the interpreter acts on them when it next reaches a call, a return, or an
//! instruction-count safepoint. Native functions are not interrupted: a long-running native
//! delays interjected work until it returns.

#![deny(bare_trait_objects)]

pub use tether_runtime_internals::alloc::{default_alloc, AllocFn, AllocTracker, Limits};
pub use tether_runtime_internals::error::{Error, Message};
pub use tether_runtime_internals::hook::{HookEvent, HookInfo, HookMask, HookState};
pub use tether_runtime_internals::instrumented::{InstrumentedState, Instrumentations};
pub use tether_runtime_internals::interjector::{Action, Interjector};
pub use tether_runtime_internals::state::{
    self, Function, Op, Proto, ProtoBuilder, State, Value, STATE_BLOCK_SIZE,
};
pub use tether_runtime_internals::status::Status;
pub use tether_runtime_internals::bail_runtime;

/// Encodings for interpreter strings and cancellation messages.
pub use encoding_rs as encoding;
