//! `tether-runtime-internals` holds the moving parts of `tether-runtime`: an embedded,
//! cooperatively-scheduled interpreter, its single safepoint hook slot, and the machinery that
//! lets host threads interject work into it, cancel it, and watch its memory use without ever
//! blocking on the interpreter thread.
//!
//! Most users should depend on `tether-runtime` instead.

#![deny(bare_trait_objects)]

#[macro_use]
pub mod error;

pub mod alloc;
pub mod hook;
pub mod instrumented;
pub mod interjector;
#[cfg(feature = "concurrent_testpoints")]
pub mod lock_testpoints;
pub mod state;
pub mod status;
