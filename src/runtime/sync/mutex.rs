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
use ::std::ptr::NonNull;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Mutual exclusion between tasks, with strict FIFO hand-off.
///
/// Contended lockers queue in call order and acquire in that order: the
/// unlock path transfers ownership to the queue head before it runs, so a
/// later `lock` cannot barge past an already-queued waiter. Re-entrant
/// locking is not supported. Because scheduling is cooperative, a mutex is
/// only needed for state touched across suspension points.
#[derive(Clone)]
pub struct Mutex(SharedObject<MutexState>);

struct MutexState {
    /// The task holding this mutex, if any.
    owner: Option<SharedTask>,
    /// Tasks blocked attempting to acquire, in call order.
    waiters: WaitQueue<Task>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Mutex {
    pub fn new() -> Self {
        Self(SharedObject::new(MutexState {
            owner: None,
            waiters: WaitQueue::new(),
        }))
    }

    /// Acquires this mutex, suspending while another task holds it. On a
    /// cancelled wait the caller did not acquire.
    pub fn lock(&mut self) -> Result<(), Fail> {
        let mut scheduler: SharedScheduler = current_scheduler();
        let current: SharedTask = scheduler.current_task();
        if self.0.owner.is_none() {
            trace!("lock(): acquired (name={:?})", current.name());
            self.0.owner = Some(current);
            return Ok(());
        }
        debug_assert!(
            !SharedTask::ptr_eq(self.0.owner.as_ref().expect("owner was checked above"), &current),
            "mutex is not re-entrant"
        );
        trace!("lock(): contended (name={:?})", current.name());
        let queue: NonNull<WaitQueue<Task>> = NonNull::from(&mut self.0.waiters);
        scheduler.block_current(queue, None)?;
        // The unlock path made us owner before waking us.
        debug_assert!(SharedTask::ptr_eq(
            self.0.owner.as_ref().expect("a handed-off mutex has an owner"),
            &current
        ));
        Ok(())
    }

    /// Acquires this mutex only if it is free. Never suspends.
    pub fn try_lock(&mut self) -> bool {
        if self.0.owner.is_none() {
            self.0.owner = Some(current_scheduler().current_task());
            return true;
        }
        false
    }

    /// Releases this mutex. When waiters are queued, ownership transfers to
    /// the head, which moves to the run queue; the caller keeps running.
    pub fn unlock(&mut self) -> Result<(), Fail> {
        let mut scheduler: SharedScheduler = current_scheduler();
        let current: SharedTask = scheduler.current_task();
        match self.0.owner.as_ref() {
            Some(owner) if SharedTask::ptr_eq(owner, &current) => (),
            _ => {
                let cause: String = "mutex is not locked by the current task".to_string();
                error!("unlock(): {}", cause);
                return Err(Fail::new(libc::EPERM, &cause));
            },
        }
        match self.0.waiters.pop_front() {
            Some(head) => {
                let mut head: SharedTask = SharedTask::from_rc(head);
                head.clear_blocked_on();
                trace!("unlock(): handing off (from={:?}, to={:?})", current.name(), head.name());
                self.0.owner = Some(head.clone());
                scheduler.make_runnable(head, Ok(()));
            },
            None => {
                trace!("unlock(): released (name={:?})", current.name());
                self.0.owner = None;
            },
        }
        Ok(())
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MutexState {
    fn drop(&mut self) {
        debug_assert!(self.waiters.is_empty(), "mutex dropped with queued waiters");
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::Mutex;
    use ::anyhow::Result;
    use ::std::thread;

    // Mutex operations need a scheduler on the calling thread; run each case
    // on a dedicated thread so every test gets a fresh one.
    fn run(test: fn() -> Result<()>) -> Result<()> {
        thread::spawn(move || -> Result<()> {
            crate::runtime::init().expect("fresh thread has no scheduler");
            test()
        })
        .join()
        .expect("test thread panicked")
    }

    #[test]
    fn test_mutex_acquire_release() -> Result<()> {
        run(|| {
            let mut mutex: Mutex = Mutex::new();

            // Try to acquire and release the lock.
            crate::ensure_eq!(mutex.try_lock(), true);
            crate::ensure_eq!(mutex.unlock().is_ok(), true);

            Ok(())
        })
    }

    #[test]
    fn test_mutex_release_without_acquire() -> Result<()> {
        run(|| {
            let mut mutex: Mutex = Mutex::new();

            // Try to release the lock without acquiring it.
            crate::ensure_eq!(mutex.unlock().is_err(), true);

            Ok(())
        })
    }

    #[test]
    fn test_mutex_acquire_acquire_release() -> Result<()> {
        run(|| {
            let mut mutex: Mutex = Mutex::new();

            // A held lock cannot be acquired again without suspending.
            crate::ensure_eq!(mutex.try_lock(), true);
            crate::ensure_eq!(mutex.try_lock(), false);
            crate::ensure_eq!(mutex.unlock().is_ok(), true);

            Ok(())
        })
    }

    #[test]
    fn test_mutex_acquire_release_release() -> Result<()> {
        run(|| {
            let mut mutex: Mutex = Mutex::new();

            // A second release must fail.
            crate::ensure_eq!(mutex.try_lock(), true);
            crate::ensure_eq!(mutex.unlock().is_ok(), true);
            crate::ensure_eq!(mutex.unlock().is_err(), true);

            Ok(())
        })
    }

    #[test]
    fn test_mutex_uncontended_lock() -> Result<()> {
        run(|| {
            let mut mutex: Mutex = Mutex::new();

            // Locking a free mutex does not suspend and succeeds.
            crate::ensure_eq!(mutex.lock().is_ok(), true);
            crate::ensure_eq!(mutex.try_lock(), false);
            crate::ensure_eq!(mutex.unlock().is_ok(), true);

            Ok(())
        })
    }
}
