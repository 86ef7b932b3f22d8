//! The single safepoint callback slot of a [`State`](../state/struct.State.html).
//!
//! A state has exactly one hook slot. The slot's event mask and instruction threshold live in a
//! [`HookSlot`] shared between the interpreter thread, which polls it at every safepoint, and the
//! [`HookController`] that arms and disarms it. Arming is a single atomic store, so host threads
//! may arm the hook without touching any other interpreter state.
use crate::state::{Hook, State};
use bitflags::bitflags;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

bitflags! {
    /// The events that fire the installed hook.
    pub struct HookMask: u8 {
        /// Entry into any function, script or native.
        const CALL = 1 << 0;
        /// Exit from any function.
        const RETURN = 1 << 1;
        /// Reserved; the embedded interpreter has no line information.
        const LINE = 1 << 2;
        /// Every `instruction_threshold` executed instructions.
        const COUNT = 1 << 3;
        /// The mask installed by [`HookController::enable_hook`].
        const ARMED = Self::CALL.bits | Self::RETURN.bits | Self::COUNT.bits;
    }
}

/// The safepoint that caused a hook invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookEvent {
    Call,
    Return,
    Count,
}

impl HookEvent {
    pub fn mask(self) -> HookMask {
        match self {
            HookEvent::Call => HookMask::CALL,
            HookEvent::Return => HookMask::RETURN,
            HookEvent::Count => HookMask::COUNT,
        }
    }
}

/// Information passed to a hook about the safepoint it fired at.
#[derive(Clone, Copy, Debug)]
pub struct HookInfo {
    pub event: HookEvent,
    /// Call depth of the interpreter when the hook fired.
    pub depth: usize,
}

/// A snapshot of a hook slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HookState {
    pub armed: bool,
    pub event_mask: HookMask,
    pub instruction_threshold: u32,
}

/// Hook bookkeeping shared between a state and its controller.
#[derive(Debug)]
pub struct HookSlot {
    mask: AtomicU8,
    threshold: AtomicU32,
}

impl HookSlot {
    pub(crate) fn new() -> Self {
        HookSlot {
            mask: AtomicU8::new(0),
            threshold: AtomicU32::new(1),
        }
    }

    pub fn mask(&self) -> HookMask {
        HookMask::from_bits_truncate(self.mask.load(Ordering::SeqCst))
    }

    pub fn threshold(&self) -> u32 {
        self.threshold.load(Ordering::SeqCst)
    }

    pub(crate) fn set_mask(&self, mask: HookMask) {
        self.mask.store(mask.bits(), Ordering::SeqCst);
    }

    /// # Panics
    ///
    /// Panics on a zero threshold; a count hook must fire after at least one instruction.
    fn set_threshold(&self, threshold: u32) {
        assert!(threshold >= 1, "instruction threshold must be at least 1");
        self.threshold.store(threshold, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> HookState {
        let event_mask = self.mask();
        HookState {
            armed: !event_mask.is_empty(),
            event_mask,
            instruction_threshold: self.threshold(),
        }
    }
}

/// The only mutator of a state's hook slot once a hook has been preset.
///
/// `enable_hook` and `disable_hook` are single atomic stores; they never block and may be called
/// from any thread holding the controller.
#[derive(Debug)]
pub struct HookController {
    slot: Arc<HookSlot>,
}

impl HookController {
    /// A controller for the hook slot of `state`. Nothing is installed until `preset_hook`.
    pub(crate) fn for_state(state: &State) -> HookController {
        HookController {
            slot: state.hook_slot(),
        }
    }

    /// Install `hook` as the state's single safepoint callback, disarmed, with an instruction
    /// threshold of 1.
    ///
    /// Any previously installed callback is replaced, and the count bookkeeping of the state is
    /// reset so the first armed instruction fires immediately.
    ///
    /// # Panics
    ///
    /// Panics if `state` is not the state this controller was created for.
    pub(crate) fn preset_hook(&self, state: &mut State, hook: Hook) {
        assert!(
            Arc::ptr_eq(&self.slot, &state.hook_slot()),
            "hook controller used with a foreign state"
        );
        self.slot.set_mask(HookMask::empty());
        self.slot.set_threshold(1);
        state.install_hook(hook);
    }

    /// Arm the hook for call, return, and instruction-count events.
    pub fn enable_hook(&self) {
        self.slot.set_mask(HookMask::ARMED);
    }

    /// Disarm the hook. The callback stays installed but inert.
    pub fn disable_hook(&self) {
        self.slot.set_mask(HookMask::empty());
    }

    pub fn state(&self) -> HookState {
        self.slot.snapshot()
    }
}
