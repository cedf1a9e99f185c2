// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

mod collections;
pub mod fail;
pub mod limits;
pub mod logging;
pub mod scheduler;
pub mod sync;
pub(crate) mod timer;

pub use self::scheduler::scheduler::{
    ActivityHandle,
    ExternalWaitFn,
};

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    scheduler::{
        scheduler::SharedScheduler,
        task::{
            Stack,
            TaskHandle,
        },
    },
};
use ::std::{
    cell::RefCell,
    convert::{
        AsMut,
        AsRef,
    },
    ops::{
        Deref,
        DerefMut,
    },
    rc::Rc,
    time::Duration,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// The SharedObject wraps an object that will be shared across tasks.
pub struct SharedObject<T>(Rc<T>);

//======================================================================================================================
// Thread-Local Variables
//======================================================================================================================

thread_local! {
    /// The scheduler servicing this host thread's tasks. One scheduler per
    /// thread; installed once by [init].
    static SCHEDULER: RefCell<Option<SharedScheduler>> = const { RefCell::new(None) };
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Installs the scheduler on the calling host thread and binds the caller as
/// its main pseudo-task. Fails only on re-initialization.
pub fn init() -> Result<(), Fail> {
    SCHEDULER.with(|slot: &RefCell<Option<SharedScheduler>>| {
        let mut slot = slot.borrow_mut();
        if slot.is_some() {
            let cause: String = "scheduler is already initialized on this thread".to_string();
            error!("init(): {}", cause);
            return Err(Fail::new(libc::EEXIST, &cause));
        }
        *slot = Some(SharedScheduler::new());
        Ok(())
    })
}

/// Returns the calling thread's scheduler. Calling any task operation before
/// [init] is a caller bug.
pub(crate) fn current_scheduler() -> SharedScheduler {
    SCHEDULER.with(|slot: &RefCell<Option<SharedScheduler>>| {
        slot.borrow()
            .clone()
            .expect("scheduler is not initialized on this thread")
    })
}

/// Creates a task running `entry` on the given stack and enqueues it at the
/// run-queue tail. The task first runs when the current task suspends.
pub fn spawn<F: FnOnce() + 'static>(name: &str, stack: Stack, entry: F) -> TaskHandle {
    current_scheduler().spawn(name, stack, Box::new(entry))
}

/// Moves the current task to the run-queue tail and runs the head. Among
/// tasks that yield without blocking, execution order is strict FIFO.
pub fn yield_now() {
    current_scheduler().yield_now()
}

/// Suspends the current task for `duration`. Returns normally once the
/// deadline has passed, or cancelled if [cancel_wait] was applied meanwhile.
/// A zero duration degenerates to [yield_now].
pub fn sleep(duration: Duration) -> Result<(), Fail> {
    current_scheduler().sleep(duration)
}

/// Suspends the current task until `task` is dead. Immediate on an
/// already-dead task. At most one joiner per task.
pub fn join(task: &TaskHandle) -> Result<(), Fail> {
    current_scheduler().join(task)
}

/// Forcibly makes a blocked task runnable; its suspending call reports
/// cancellation. No-op on runnable and dead tasks. Must be called from a
/// task, never from a signal handler; foreign threads marshal wakes through
/// [activity_handle] instead.
pub fn cancel_wait(task: &TaskHandle) {
    current_scheduler().cancel_wait(task)
}

/// Time elapsed since [init] on this thread. Monotonic.
pub fn now() -> Duration {
    current_scheduler().uptime()
}

/// Installs the wait function an external event engine wants the scheduler
/// to idle in, instead of its internal wait. See [ExternalWaitFn].
pub fn bind_external_wait(wait_fn: ExternalWaitFn) {
    current_scheduler().bind_external_wait(wait_fn)
}

/// Returns a cloneable, thread-safe handle whose
/// [notify](ActivityHandle::notify) guarantees the scheduler's idle wait
/// returns. This is the only part of the runtime foreign threads may touch.
pub fn activity_handle() -> ActivityHandle {
    current_scheduler().activity_handle()
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T> SharedObject<T> {
    pub fn new(object: T) -> Self {
        Self(Rc::new(object))
    }

    pub(crate) fn as_ptr(&self) -> *mut T {
        Rc::as_ptr(&self.0) as *mut T
    }

    pub(crate) fn into_rc(self) -> Rc<T> {
        self.0
    }

    pub(crate) fn from_rc(rc: Rc<T>) -> Self {
        Self(rc)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Dereferences a shared object for use.
impl<T> Deref for SharedObject<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

/// Dereferences a mutable reference to a shared object for use. This breaks
/// Rust's ownership model because it allows more than one mutable dereference
/// of a shared object at a time. The runtime requires this because several
/// suspended tasks hold references into shared state at the same time;
/// however, the runtime also ensures that only one task runs at a time. Due
/// to this design the static borrow checker cannot see the exclusion, and we
/// have chosen not to pay for the dynamic one. Shared objects should be used
/// with the understanding that their contents may change whenever the task
/// suspends.
impl<T> DerefMut for SharedObject<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        let ptr: *mut T = Rc::as_ptr(&self.0) as *mut T;
        unsafe { &mut *ptr }
    }
}

/// Returns a reference to the interior object, which is borrowed for directly
/// accessing the value. Generally deref should be used unless you absolutely
/// need to borrow the reference.
impl<T> AsRef<T> for SharedObject<T> {
    fn as_ref(&self) -> &T {
        self.0.as_ref()
    }
}

/// Returns a mutable reference to the interior object. Similar to DerefMut,
/// this is sound if and only if only one task runs at a time.
impl<T> AsMut<T> for SharedObject<T> {
    fn as_mut(&mut self) -> &mut T {
        let ptr: *mut T = Rc::as_ptr(&self.0) as *mut T;
        unsafe { &mut *ptr }
    }
}

impl<T> Clone for SharedObject<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
