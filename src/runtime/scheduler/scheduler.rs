// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Implementation of our single-threaded cooperative task scheduler.
//!
//! Exactly one task executes at any instant. A task runs until it calls a
//! suspending operation; the operation parks the task (run-queue tail for a
//! yield, the timer service for a sleep, a wait queue for a lock or an event
//! wait, a join slot for a join) and switches to the head of the run queue.
//! When the run queue is empty the scheduler waits for the next deadline or
//! for external activity, then expires due timers onto the run queue.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    collections::wait_queue::WaitQueue,
    current_scheduler,
    fail::Fail,
    scheduler::{
        context::{
            self,
            MachineContext,
        },
        task::{
            SharedTask,
            Stack,
            Task,
            TaskEntry,
            TaskHandle,
            TaskState,
        },
    },
    timer::TimerService,
    SharedObject,
};
use ::std::{
    ops::{
        Deref,
        DerefMut,
    },
    panic::{
        catch_unwind,
        AssertUnwindSafe,
    },
    ptr::NonNull,
    sync::{
        Arc,
        Condvar,
        Mutex,
    },
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Function the scheduler calls instead of its internal wait when an external
/// event engine is bound. It must block the calling thread for at most the
/// given timeout (`None` means until activity) and return early when the
/// activity notifier fires.
pub type ExternalWaitFn = Box<dyn FnMut(Option<Duration>)>;

/// Task Scheduler
pub struct Scheduler {
    /// The task currently executing on this thread.
    current: Option<SharedTask>,
    /// Runnable tasks awaiting the CPU, excluding the current one. Strict FIFO.
    run_queue: WaitQueue<Task>,
    /// Armed deadlines of sleeping and timed-waiting tasks.
    timers: TimerService,
    /// Clock origin; all deadlines are milliseconds since this instant.
    origin: Instant,
    /// External wait function, when an event engine is bound.
    external_wait: Option<ExternalWaitFn>,
    /// Wakes the idle wait from other threads.
    activity: ActivityHandle,
    /// Holds the most recently dead task until the next task reaps it, so a
    /// stack is never freed while still executing on it.
    graveyard: Option<SharedTask>,
}

#[derive(Clone)]
pub struct SharedScheduler(SharedObject<Scheduler>);

/// Cross-thread notifier behind the idle wait.
struct ActivityMonitor {
    signalled: Mutex<bool>,
    condvar: Condvar,
}

/// Cloneable handle to the scheduler's activity notifier. This is the one
/// piece of the core that may be touched from other threads: an external
/// agent calls [ActivityHandle::notify] after making work available, which
/// guarantees that an in-progress idle wait returns.
#[derive(Clone)]
pub struct ActivityHandle(Arc<ActivityMonitor>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Associate Functions for Scheduler
impl SharedScheduler {
    pub fn new() -> Self {
        let main: SharedTask = SharedTask::main_task();
        Self(SharedObject::new(Scheduler {
            current: Some(main),
            run_queue: WaitQueue::new(),
            timers: TimerService::new(),
            origin: Instant::now(),
            external_wait: None,
            activity: ActivityHandle::new(),
            graveyard: None,
        }))
    }

    /// Milliseconds of scheduler uptime. Nondecreasing.
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    /// Time since the scheduler was initialized.
    pub fn uptime(&self) -> Duration {
        self.origin.elapsed()
    }

    pub fn current_task(&self) -> SharedTask {
        self.current.clone().expect("scheduler always has a current task")
    }

    /// Creates a task on the given stack and enqueues it at the run-queue
    /// tail. The task first runs when a currently running task suspends.
    pub fn spawn(&mut self, name: &str, stack: Stack, entry: TaskEntry) -> TaskHandle {
        let task: SharedTask = SharedTask::new(name, stack, entry, task_main);
        trace!("spawn(): name={:?}", name);
        self.run_queue.push_back(task.clone().into_rc());
        TaskHandle::new(task)
    }

    /// Moves the current task to the run-queue tail and switches to the head.
    /// Among tasks that yield without blocking, execution order is strict
    /// FIFO; a lone task resumes immediately.
    pub fn yield_now(&mut self) {
        let current: SharedTask = self.current_task();
        trace!("yield_now(): name={:?}", current.name());
        self.run_queue.push_back(current.into_rc());
        // A yielded task stays runnable and nobody arms a wake result for it,
        // so the suspension cannot report cancellation.
        let result: Result<(), Fail> = self.suspend();
        debug_assert!(result.is_ok(), "yield cannot be cancelled");
    }

    /// Parks the current task until `duration` has elapsed. A zero duration
    /// degenerates to a yield.
    pub fn sleep(&mut self, duration: Duration) -> Result<(), Fail> {
        if duration.is_zero() {
            self.yield_now();
            return Ok(());
        }
        let mut current: SharedTask = self.current_task();
        trace!("sleep(): name={:?}, duration={:?}", current.name(), duration);
        current.set_state(TaskState::Sleeping);
        let deadline: u64 = self.deadline_after(duration);
        self.timers.add(current, deadline);
        self.suspend()
    }

    /// Parks the current task until `handle`'s task is dead. Immediate on an
    /// already-dead task. At most one joiner per task.
    pub fn join(&mut self, handle: &TaskHandle) -> Result<(), Fail> {
        let mut target: SharedTask = handle.task().clone();
        if target.state() == TaskState::Dead {
            trace!("join(): target already dead (name={:?})", target.name());
            return Ok(());
        }
        let mut current: SharedTask = self.current_task();
        debug_assert!(!SharedTask::ptr_eq(&target, &current), "a task cannot join itself");
        debug_assert!(!target.has_join_waiter(), "task already has a joiner");
        trace!("join(): name={:?}, target={:?}", current.name(), target.name());
        current.set_state(TaskState::Waiting);
        current.set_joining(Some(target.clone()));
        target.set_join_waiter(Some(current));
        self.suspend()
    }

    /// Forcibly returns a blocked task to the run queue; its pending
    /// suspending call reports cancellation. No-op on runnable and dead
    /// tasks, so repeated cancellation is harmless.
    pub fn cancel_wait(&mut self, handle: &TaskHandle) {
        let mut task: SharedTask = handle.task().clone();
        match task.state() {
            TaskState::Runnable | TaskState::Dead => {
                trace!("cancel_wait(): no-op (name={:?}, state={:?})", task.name(), task.state());
            },
            TaskState::Sleeping => {
                trace!("cancel_wait(): cancelling sleep (name={:?})", task.name());
                self.timers.remove(&task);
                self.make_runnable(task, Err(Fail::new(libc::ECANCELED, "sleep cancelled")));
            },
            TaskState::Waiting => {
                trace!("cancel_wait(): cancelling wait (name={:?})", task.name());
                self.timers.remove(&task);
                task.unlink_from_wait_queue();
                if let Some(mut target) = task.take_joining() {
                    target.take_join_waiter();
                }
                self.make_runnable(task, Err(Fail::new(libc::ECANCELED, "wait cancelled")));
            },
        }
    }

    /// Parks the current task on the given wait queue, optionally arming a
    /// deadline, and switches away. Returns whatever the waker armed:
    /// `Ok` for a hand-off or event wake, cancelled or timed-out otherwise.
    pub(crate) fn block_current(
        &mut self,
        mut queue: NonNull<WaitQueue<Task>>,
        timeout: Option<Duration>,
    ) -> Result<(), Fail> {
        let mut current: SharedTask = self.current_task();
        current.set_state(TaskState::Waiting);
        current.set_blocked_on(Some(queue));
        if let Some(duration) = timeout {
            let deadline: u64 = self.deadline_after(duration);
            self.timers.add(current.clone(), deadline);
        }
        unsafe { queue.as_mut() }.push_back(current.into_rc());
        self.suspend()
    }

    /// Moves a parked task to the run-queue tail with the result its pending
    /// suspension should report. The caller has already unlinked the task
    /// from whatever it was parked on.
    pub(crate) fn make_runnable(&mut self, mut task: SharedTask, result: Result<(), Fail>) {
        debug_assert!(task.state() != TaskState::Dead, "dead tasks cannot run again");
        task.set_state(TaskState::Runnable);
        task.arm_wake(result);
        self.run_queue.push_back(task.into_rc());
    }

    /// Disarms any deadline for `task`.
    pub(crate) fn remove_timer(&mut self, task: &SharedTask) {
        self.timers.remove(task);
    }

    /// Installs the wait function an external event engine wants the
    /// scheduler to idle in. Replaces any previous binding.
    pub fn bind_external_wait(&mut self, wait_fn: ExternalWaitFn) {
        self.external_wait = Some(wait_fn);
    }

    pub fn activity_handle(&self) -> ActivityHandle {
        self.activity.clone()
    }

    /// Switches from the current task to the next runnable one, then reports
    /// the current task's wake result once it is resumed. The caller has
    /// already parked the current task; for a yield the wake result stays
    /// unarmed and the suspension reports plain success.
    fn suspend(&mut self) -> Result<(), Fail> {
        let prev: SharedTask = self.current_task();
        let next: SharedTask = self.next_runnable();
        if !SharedTask::ptr_eq(&prev, &next) {
            trace!("suspend(): switching (from={:?}, to={:?})", prev.name(), next.name());
            let from: *mut MachineContext = prev.context_ptr();
            let to: *const MachineContext = next.context_ptr();
            let transfer: usize = next.as_raw() as usize;
            self.current = Some(next);
            // Arbitrary other tasks run in here. `self` stays valid: the
            // scheduler sits behind a reference count and never moves.
            let _: usize = unsafe { context::jump_context(from, to, transfer) };
            self.reap();
        }
        let mut prev: SharedTask = prev;
        match prev.take_wake_result() {
            Some(result) => result,
            None => Ok(()),
        }
    }

    /// Pops the run-queue head, idling until one exists. The idle wait is
    /// bounded by the next armed deadline; due timers are expired onto the
    /// run queue after every wait.
    fn next_runnable(&mut self) -> SharedTask {
        loop {
            if let Some(task) = self.run_queue.pop_front() {
                return SharedTask::from_rc(task);
            }
            let now: u64 = self.now_ms();
            let timeout: Option<Duration> = match self.timers.peek_min() {
                Some(deadline) if deadline <= now => {
                    self.expire_due_timers();
                    continue;
                },
                Some(deadline) => Some(Duration::from_millis(deadline - now)),
                None => None,
            };
            if timeout.is_none() && self.external_wait.is_none() {
                // Every task is parked with no deadline armed; only an
                // activity notification can make progress now.
                debug!("next_runnable(): all tasks blocked, waiting for external activity");
            }
            self.idle_wait(timeout);
            self.expire_due_timers();
        }
    }

    /// Blocks the scheduler thread until `timeout` elapses or external
    /// activity is signalled, whichever comes first.
    fn idle_wait(&mut self, timeout: Option<Duration>) {
        trace!("idle_wait(): timeout={:?}", timeout);
        let activity: ActivityHandle = self.activity.clone();
        match self.external_wait.as_mut() {
            Some(wait_fn) => {
                wait_fn(timeout);
                // The wait function observed the signal itself.
                activity.consume();
            },
            None => activity.wait(timeout),
        }
    }

    /// Moves every task whose deadline is due onto the run queue, in deadline
    /// order and in insertion order within one deadline. A due sleeper wakes
    /// normally; a due waiter leaves its wait queue and reports a timeout.
    fn expire_due_timers(&mut self) {
        let now: u64 = self.now_ms();
        while let Some(mut task) = self.timers.pop_due(now) {
            match task.state() {
                TaskState::Sleeping => {
                    trace!("expire_due_timers(): waking sleeper (name={:?})", task.name());
                    self.make_runnable(task, Ok(()));
                },
                TaskState::Waiting => {
                    trace!("expire_due_timers(): timing out waiter (name={:?})", task.name());
                    task.unlink_from_wait_queue();
                    self.make_runnable(task, Err(Fail::new(libc::ETIMEDOUT, "wait timed out")));
                },
                state => {
                    debug_assert!(false, "timer fired for task in state {:?}", state);
                },
            }
        }
    }

    /// Drops the task parked in the graveyard, if any. Called on the first
    /// opportunity after every switch, which is the earliest point where the
    /// dead task's stack is guaranteed to no longer be in use.
    pub(crate) fn reap(&mut self) {
        if let Some(dead) = self.graveyard.take() {
            trace!("reap(): name={:?}", dead.name());
            drop(dead);
        }
    }

    /// Terminal path of every spawned task: marks it dead, wakes its joiner,
    /// and switches away for good. The dead task rides in the graveyard until
    /// the next task reaps it.
    fn finish_current(&mut self) -> ! {
        let mut dead: SharedTask = self.current_task();
        trace!("finish_current(): name={:?}", dead.name());
        dead.set_state(TaskState::Dead);
        if let Some(mut joiner) = dead.take_join_waiter() {
            joiner.take_joining();
            self.make_runnable(joiner, Ok(()));
        }
        let next: SharedTask = self.next_runnable();
        let from: *mut MachineContext = dead.context_ptr();
        let to: *const MachineContext = next.context_ptr();
        let transfer: usize = next.as_raw() as usize;
        self.graveyard = Some(dead.clone());
        self.current = Some(next);
        // This frame is never unwound: it must hold no strong task references
        // past this point, or the records would never drop.
        drop(dead);
        unsafe {
            context::jump_context(from, to, transfer);
        }
        unreachable!("dead task resumed");
    }

    fn deadline_after(&self, duration: Duration) -> u64 {
        // Deadlines are whole ticks, rounded up: expiry compares against the
        // rounded-down clock, so a wake may land late by up to one tick but
        // never before the requested duration has fully elapsed.
        let target: u128 = (self.origin.elapsed() + duration).as_nanos();
        target.div_ceil(1_000_000) as u64
    }
}

/// Associate Functions for ActivityHandle
impl ActivityHandle {
    fn new() -> Self {
        Self(Arc::new(ActivityMonitor {
            signalled: Mutex::new(false),
            condvar: Condvar::new(),
        }))
    }

    /// Signals external activity. Any in-progress idle wait returns; a signal
    /// delivered while no wait is in progress is consumed by the next one.
    pub fn notify(&self) {
        let mut signalled = self.0.signalled.lock().expect("activity monitor is never poisoned");
        *signalled = true;
        self.0.condvar.notify_one();
    }

    /// Blocks until notified or until `timeout` elapses, then consumes any
    /// pending signal.
    pub(crate) fn wait(&self, timeout: Option<Duration>) {
        let guard = self.0.signalled.lock().expect("activity monitor is never poisoned");
        let mut signalled = match timeout {
            Some(duration) => {
                let (guard, _) = self
                    .0
                    .condvar
                    .wait_timeout_while(guard, duration, |signalled: &mut bool| !*signalled)
                    .expect("activity monitor is never poisoned");
                guard
            },
            None => self
                .0
                .condvar
                .wait_while(guard, |signalled: &mut bool| !*signalled)
                .expect("activity monitor is never poisoned"),
        };
        *signalled = false;
    }

    /// Consumes any pending signal without blocking. Used after an external
    /// wait function returns, since that function observed the signal itself.
    pub(crate) fn consume(&self) {
        let mut signalled = self.0.signalled.lock().expect("activity monitor is never poisoned");
        *signalled = false;
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// First Rust frame of every spawned task, entered through the context
/// primitive's start thunk with the task's raw pointer as the transfer value.
/// Runs the entry closure and never returns.
pub(crate) extern "C" fn task_main(transfer: usize) -> ! {
    // Scoped so that no strong references survive on this frame when the
    // task switches away for good below.
    {
        let mut scheduler: SharedScheduler = current_scheduler();
        scheduler.reap();
        let entry: TaskEntry = {
            let mut current: SharedTask = scheduler.current_task();
            debug_assert_eq!(current.as_raw() as usize, transfer);
            trace!("task_main(): starting (name={:?})", current.name());
            current.take_entry().expect("a fresh task has an entry closure")
        };
        drop(scheduler);
        // A panic must not unwind off the prepared stack frame; treat it as
        // the task's exit.
        if let Err(cause) = catch_unwind(AssertUnwindSafe(entry)) {
            error!("task_main(): task panicked: {:?}", cause);
        }
    }
    current_scheduler().finish_current()
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Deref for SharedScheduler {
    type Target = Scheduler;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedScheduler {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}
