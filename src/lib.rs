// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Single-threaded cooperative scheduler for stackful tasks.
//!
//! Tasks run on caller-supplied memory regions used as call stacks and switch
//! by saving and restoring machine context. A task runs until it voluntarily
//! suspends (yield, sleep, join, lock, wait); the scheduler then switches to
//! the head of a FIFO run queue. Sleeps and wait timeouts are driven by a
//! monotonic millisecond clock, and the [Mutex](crate::Mutex) and
//! [Event](crate::Event) primitives are built on the scheduler's wait/wake
//! machinery.

#[macro_use]
extern crate log;

pub mod runtime;

pub use crate::runtime::{
    activity_handle,
    bind_external_wait,
    cancel_wait,
    fail::Fail,
    init,
    join,
    now,
    scheduler::task::{
        Stack,
        TaskHandle,
        TaskState,
    },
    sleep,
    spawn,
    sync::{
        event::Event,
        mutex::Mutex,
    },
    yield_now,
    ActivityHandle,
    ExternalWaitFn,
};

/// Asserts that two expressions are equal, bailing out of the enclosing
/// `Result`-returning test when they are not.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr) => {{
        let left = $left;
        let right = $right;
        if left != right {
            anyhow::bail!(
                "ensure_eq!({}, {}) failed: {:?} != {:?}",
                stringify!($left),
                stringify!($right),
                left,
                right
            );
        }
    }};
}

/// Asserts that two expressions are not equal, bailing out of the enclosing
/// `Result`-returning test when they are.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr) => {{
        let left = $left;
        let right = $right;
        if left == right {
            anyhow::bail!(
                "ensure_neq!({}, {}) failed: both are {:?}",
                stringify!($left),
                stringify!($right),
                left
            );
        }
    }};
}
