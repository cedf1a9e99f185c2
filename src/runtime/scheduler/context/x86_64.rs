// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Context switch for x86_64 System V.
//!
//! A suspended task's callee-saved integer registers live in a 6-slot frame
//! pushed on its own stack; the context records only the resulting stack
//! pointer. SSE/AVX state is caller-saved under this ABI, so no vector
//! registers cross a switch.

//==============================================================================
// Imports
//==============================================================================

use super::{
    ContextEntry,
    MachineContext,
};
use crate::runtime::limits::STACK_ALIGNMENT;
use ::std::arch::naked_asm;

//==============================================================================
// Constants
//==============================================================================

// Initial frame, from the prepared stack pointer upward:
//   [sp + 0..48)  r15, r14, r13, r12, rbx, rbp  (pop order of `jump`)
//   [sp + 48)     return target of the first restore (the start thunk)
//   [sp + 56..72) untouched; keeps the thunk's frame at the ABI alignment
const FRESH_FRAME_SLOTS: usize = 9;
const RBX_SLOT: usize = 4;
const RET_SLOT: usize = 6;

//==============================================================================
// Standalone Functions
//==============================================================================

/// Builds the initial frame for a fresh context. The entry function rides in
/// the rbx slot so that the start thunk can reach it after the first restore;
/// rbp starts as zero so that backtraces stop at the thunk.
pub(super) unsafe fn prepare(base: *mut u8, size: usize, entry: ContextEntry) -> MachineContext {
    let top: usize = (base as usize + size) & !(STACK_ALIGNMENT - 1);
    let sp: *mut usize = (top - FRESH_FRAME_SLOTS * 8) as *mut usize;
    for slot in 0..FRESH_FRAME_SLOTS {
        sp.add(slot).write(0);
    }
    sp.add(RBX_SLOT).write(entry as usize);
    sp.add(RET_SLOT).write(start as usize);
    MachineContext { sp: sp as *mut u8 }
}

/// Saves the caller's callee-saved state on its own stack, records the stack
/// pointer in `*from`, and resumes the stack recorded in `*to`. The transfer
/// value travels in rax: it is this function's return value on the resumed
/// side, and the start thunk forwards it as the entry argument on a first
/// resumption.
#[unsafe(naked)]
pub(super) unsafe extern "C" fn jump(_from: *mut MachineContext, _to: *const MachineContext, _transfer: usize) -> usize {
    naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "mov rsp, [rsi]",
        "mov rax, rdx",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    )
}

/// First instruction pointer of every fresh context. Moves the transfer value
/// into the first argument register and tail-calls the entry function that
/// `prepare` parked in rbx. The entry never returns; the trap instruction is
/// the backstop.
#[unsafe(naked)]
extern "C" fn start() -> ! {
    naked_asm!(
        "mov rdi, rax",
        "call rbx",
        "ud2",
    )
}
