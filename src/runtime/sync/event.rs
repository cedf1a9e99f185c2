// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    collections::wait_queue::WaitQueue,
    current_scheduler,
    fail::Fail,
    scheduler::{
        scheduler::SharedScheduler,
        task::{
            SharedTask,
            Task,
        },
    },
    SharedObject,
};
use ::std::{
    ptr::NonNull,
    time::Duration,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Auto-reset event with wake-one semantics.
///
/// [set](Event::set) wakes exactly the head of the wait queue. With no waiter
/// queued the signal latches, so a signaller that runs before the waiter is
/// not lost: the next wait consumes the latch and returns without
/// suspending, clearing it.
#[derive(Clone)]
pub struct Event(SharedObject<EventState>);

struct EventState {
    /// Latched signal, armed only while no waiter is queued.
    set: bool,
    /// Tasks blocked waiting for a signal, in call order.
    waiters: WaitQueue<Task>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Event {
    pub fn new() -> Self {
        Self(SharedObject::new(EventState {
            set: false,
            waiters: WaitQueue::new(),
        }))
    }

    /// Suspends the current task until the event is signalled. Immediate when
    /// a signal is latched.
    pub fn wait(&mut self) -> Result<(), Fail> {
        self.wait_inner(None)
    }

    /// Like [wait](Event::wait), but gives up after `timeout` with
    /// `ETIMEDOUT`. A timed-out or cancelled waiter leaves the queue; a
    /// latched signal always wins over an already-due deadline.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<(), Fail> {
        self.wait_inner(Some(timeout))
    }

    fn wait_inner(&mut self, timeout: Option<Duration>) -> Result<(), Fail> {
        let mut scheduler: SharedScheduler = current_scheduler();
        if self.0.set {
            self.0.set = false;
            trace!("wait(): consumed latched signal (name={:?})", scheduler.current_task().name());
            return Ok(());
        }
        if let Some(duration) = timeout {
            if duration.is_zero() {
                return Err(Fail::new(libc::ETIMEDOUT, "wait deadline already due"));
            }
        }
        trace!(
            "wait(): queueing (name={:?}, timeout={:?})",
            scheduler.current_task().name(),
            timeout
        );
        let queue: NonNull<WaitQueue<Task>> = NonNull::from(&mut self.0.waiters);
        scheduler.block_current(queue, timeout)
    }

    /// Signals the event: wakes exactly the head waiter, or latches when the
    /// queue is empty. The caller keeps running.
    pub fn set(&mut self) {
        let mut scheduler: SharedScheduler = current_scheduler();
        match self.0.waiters.pop_front() {
            Some(head) => {
                let mut head: SharedTask = SharedTask::from_rc(head);
                head.clear_blocked_on();
                scheduler.remove_timer(&head);
                trace!("set(): waking head waiter (name={:?})", head.name());
                scheduler.make_runnable(head, Ok(()));
            },
            None => {
                trace!("set(): latching");
                self.0.set = true;
            },
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventState {
    fn drop(&mut self) {
        debug_assert!(self.waiters.is_empty(), "event dropped with queued waiters");
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
