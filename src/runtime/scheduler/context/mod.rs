// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Machine-context save/restore primitive.
//!
//! The scheduler consumes exactly two operations from this module:
//! [make_context] prepares a fresh context on a caller-supplied stack region,
//! and [jump_context] atomically saves the running task's state and resumes
//! another's. A context is a single saved stack pointer; the callee-saved
//! register file lives in a frame on the suspended task's own stack, so the
//! per-task bookkeeping outside the stack region is one pointer.
//!
//! Each jump carries a pointer-sized transfer value: it is handed to the
//! resumed side, and the first resumption of a fresh context delivers it as
//! the argument of the context's entry function. The scheduler uses this to
//! pass a new task its own record without any shared staging area.

//==============================================================================
// Exports
//==============================================================================

#[cfg(all(target_arch = "x86_64", unix))]
mod x86_64;
#[cfg(all(target_arch = "x86_64", unix))]
use self::x86_64 as arch;

#[cfg(all(target_arch = "aarch64", unix))]
mod aarch64;
#[cfg(all(target_arch = "aarch64", unix))]
use self::aarch64 as arch;

#[cfg(not(any(all(target_arch = "x86_64", unix), all(target_arch = "aarch64", unix))))]
compile_error!("no context-switch support for this target (unix x86_64 and aarch64 only)");

//==============================================================================
// Structures
//==============================================================================

/// Saved machine context of a suspended task.
///
/// Holds the stack pointer recorded by the last [jump_context] away from the
/// task (or prepared by [make_context] for a task that has never run). The
/// pointed-to frame layout is owned by the architecture module and is opaque
/// to everything else.
#[repr(C)]
#[derive(Debug)]
pub struct MachineContext {
    sp: *mut u8,
}

/// Entry function of a fresh context. Receives the transfer value of the
/// first jump into the context. Must never return: there is no frame below
/// it to return to.
pub type ContextEntry = extern "C" fn(usize) -> !;

//==============================================================================
// Associate Functions
//==============================================================================

impl MachineContext {
    /// A context that has not been captured yet. The scheduler's main
    /// pseudo-task starts in this state; its real context is written by the
    /// first [jump_context] away from it.
    pub const fn uncaptured() -> Self {
        Self {
            sp: ::std::ptr::null_mut(),
        }
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Prepares a fresh context on the given stack region whose first resumption
/// executes `entry` with the jump's transfer value as its argument.
///
/// # Safety
///
/// The region `[base, base + size)` must be valid for writes, must not be in
/// use as a stack by anyone else, and must stay valid until the context is
/// abandoned. `size` must leave room for the initial frame after the top is
/// rounded down to the platform stack alignment; the scheduler's stack-size
/// floor guarantees this by a wide margin.
pub unsafe fn make_context(base: *mut u8, size: usize, entry: ContextEntry) -> MachineContext {
    arch::prepare(base, size, entry)
}

/// Saves the current machine state into `*from` and resumes `*to`, delivering
/// `transfer` to the resumed side. Returns the transfer value passed by
/// whoever later resumes `*from`.
///
/// # Safety
///
/// `from` must be valid for writes and `*to` must hold a context prepared by
/// [make_context] or captured by an earlier jump. Both stacks must still be
/// live. The caller must not hold references it expects to remain unique
/// across the jump: arbitrary other tasks run before this returns.
pub unsafe fn jump_context(from: *mut MachineContext, to: *const MachineContext, transfer: usize) -> usize {
    arch::jump(from, to, transfer)
}

//==============================================================================
// Unit Tests
//==============================================================================
