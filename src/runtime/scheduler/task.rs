// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    collections::wait_queue::{
        IntrusivelyLinked,
        WaitQueue,
    },
    fail::Fail,
    limits,
    scheduler::context::{
        self,
        ContextEntry,
        MachineContext,
    },
    timer::TimerKey,
    SharedObject,
};
use ::std::{
    cell::Cell,
    ops::{
        Deref,
        DerefMut,
    },
    ptr::NonNull,
    rc::Rc,
};

//==============================================================================
// Structures
//==============================================================================

/// Lifecycle state of a task.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TaskState {
    /// On the run queue, or currently executing.
    Runnable,
    /// Parked in the timer service until a deadline.
    Sleeping,
    /// Parked on a wait queue or on another task's join slot.
    Waiting,
    /// The entry function returned. Terminal.
    Dead,
}

/// Entry function of a task.
pub(crate) type TaskEntry = Box<dyn FnOnce()>;

/// A cooperatively scheduled unit of execution with its own stack.
///
/// A task is linked into at most one scheduler queue at a time (run queue or
/// one wait queue), plus at most one timer-service entry; the remaining
/// fields record which, so that wakes and cancellation can unlink it from
/// everything it is parked on.
pub(crate) struct Task {
    /// Task name, used by logging only.
    name: String,
    state: TaskState,
    /// Saved machine context while the task is not running.
    context: MachineContext,
    /// The stack region this task executes on. The main pseudo-task borrows
    /// the host thread's own stack and has none.
    #[allow(dead_code)]
    stack: Option<Stack>,
    /// Entry closure; taken exactly once by the task trampoline.
    entry: Option<TaskEntry>,
    /// Intrusive links for the queue this task is parked on, if any.
    link_next: Cell<Option<NonNull<Task>>>,
    link_prev: Cell<Option<NonNull<Task>>>,
    /// Timer-service key while a deadline is armed.
    timer_key: Option<TimerKey>,
    /// The wait queue this task is blocked on, if any. Used to unlink the
    /// task on cancellation and on wait timeout.
    blocked_on: Option<NonNull<WaitQueue<Task>>>,
    /// Result the next resumption of this task's suspending call returns.
    /// Armed by whoever makes the task runnable; absent for plain yields.
    wake_result: Option<Result<(), Fail>>,
    /// The task blocked in join on this task, if any.
    join_waiter: Option<SharedTask>,
    /// The task this task is blocked joining, if any. Back-reference needed
    /// so that cancelling a joiner clears the target's join slot.
    joining: Option<SharedTask>,
}

/// Reference-counted handle to a [Task], shared between the scheduler's
/// queues and the public [TaskHandle].
#[derive(Clone)]
pub(crate) struct SharedTask(SharedObject<Task>);

/// Public, cloneable reference to a spawned task.
#[derive(Clone)]
pub struct TaskHandle {
    task: SharedTask,
}

/// A stack region for one task.
///
/// The region is either owned (heap-backed, via [Stack::new]) or borrowed
/// from the caller (via [Stack::from_raw_parts]). Either way ownership of the
/// `Stack` value moves into the task at spawn, so the region cannot go away
/// while the task can still run on it.
pub struct Stack {
    base: NonNull<u8>,
    size: usize,
    _storage: Option<Box<[u8]>>,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl SharedTask {
    /// Builds a fresh task. Its first resumption enters `trampoline` with the
    /// task's own raw pointer as the transfer value.
    pub fn new(name: &str, stack: Stack, entry: TaskEntry, trampoline: ContextEntry) -> Self {
        let context: MachineContext = unsafe { context::make_context(stack.base(), stack.size(), trampoline) };
        Self(SharedObject::new(Task {
            name: name.to_string(),
            state: TaskState::Runnable,
            context,
            stack: Some(stack),
            entry: Some(entry),
            link_next: Cell::new(None),
            link_prev: Cell::new(None),
            timer_key: None,
            blocked_on: None,
            wake_result: None,
            join_waiter: None,
            joining: None,
        }))
    }

    /// Builds the pseudo-task representing the thread that initialized the
    /// scheduler. It runs on the host thread's own stack; its context is
    /// captured by the first switch away from it.
    pub fn main_task() -> Self {
        Self(SharedObject::new(Task {
            name: "main".to_string(),
            state: TaskState::Runnable,
            context: MachineContext::uncaptured(),
            stack: None,
            entry: None,
            link_next: Cell::new(None),
            link_prev: Cell::new(None),
            timer_key: None,
            blocked_on: None,
            wake_result: None,
            join_waiter: None,
            joining: None,
        }))
    }

    pub fn name(&self) -> &str {
        &self.deref().name
    }

    pub fn state(&self) -> TaskState {
        self.deref().state
    }

    pub fn set_state(&mut self, state: TaskState) {
        self.deref_mut().state = state;
    }

    /// Location of this task's saved context. Stable for the task's lifetime
    /// because the record sits behind a reference count.
    pub fn context_ptr(&self) -> *mut MachineContext {
        unsafe { ::std::ptr::addr_of_mut!((*self.0.as_ptr()).context) }
    }

    pub fn as_raw(&self) -> *const Task {
        self.0.as_ptr()
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.as_raw() == b.as_raw()
    }

    pub fn into_rc(self) -> Rc<Task> {
        self.0.into_rc()
    }

    pub fn from_rc(rc: Rc<Task>) -> Self {
        Self(SharedObject::from_rc(rc))
    }

    /// Takes the entry closure. Yields once, for the task trampoline.
    pub fn take_entry(&mut self) -> Option<TaskEntry> {
        self.deref_mut().entry.take()
    }

    /// Arms the result the task's pending suspending call returns on resume.
    pub fn arm_wake(&mut self, result: Result<(), Fail>) {
        if let Some(old_result) = self.deref_mut().wake_result.replace(result) {
            debug!("arm_wake(): overwriting a pending wake result (old={:?})", old_result);
        }
    }

    pub fn take_wake_result(&mut self) -> Option<Result<(), Fail>> {
        self.deref_mut().wake_result.take()
    }

    pub fn timer_key(&self) -> Option<TimerKey> {
        self.deref().timer_key
    }

    pub fn set_timer_key(&mut self, key: Option<TimerKey>) {
        self.deref_mut().timer_key = key;
    }

    pub fn set_blocked_on(&mut self, queue: Option<NonNull<WaitQueue<Task>>>) {
        self.deref_mut().blocked_on = queue;
    }

    pub fn clear_blocked_on(&mut self) {
        self.deref_mut().blocked_on = None;
    }

    /// Unlinks this task from the wait queue it is blocked on, if any. The
    /// queue gives up its reference to the task; the caller is expected to
    /// re-queue the task on the run queue.
    pub fn unlink_from_wait_queue(&mut self) {
        if let Some(mut queue) = self.deref_mut().blocked_on.take() {
            let unlinked: Option<Rc<Task>> = unsafe { queue.as_mut() }.remove(unsafe { &*self.as_raw() });
            debug_assert!(unlinked.is_some(), "blocked task was not on its wait queue");
        }
    }

    pub fn has_join_waiter(&self) -> bool {
        self.deref().join_waiter.is_some()
    }

    pub fn set_join_waiter(&mut self, joiner: Option<SharedTask>) {
        self.deref_mut().join_waiter = joiner;
    }

    pub fn take_join_waiter(&mut self) -> Option<SharedTask> {
        self.deref_mut().join_waiter.take()
    }

    pub fn set_joining(&mut self, target: Option<SharedTask>) {
        self.deref_mut().joining = target;
    }

    pub fn take_joining(&mut self) -> Option<SharedTask> {
        self.deref_mut().joining.take()
    }
}

/// Associate Functions for TaskHandle
impl TaskHandle {
    pub(crate) fn new(task: SharedTask) -> Self {
        Self { task }
    }

    pub(crate) fn task(&self) -> &SharedTask {
        &self.task
    }

    /// Returns the task's name.
    pub fn name(&self) -> String {
        self.task.name().to_string()
    }

    /// Returns the task's current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    /// Checks whether the task's entry function has returned.
    pub fn is_dead(&self) -> bool {
        self.task.state() == TaskState::Dead
    }
}

/// Associate Functions for Stack
impl Stack {
    /// Allocates a stack region of `size` bytes.
    pub fn new(size: usize) -> Result<Self, Fail> {
        if size < limits::MIN_STACK_SIZE {
            let cause: String = format!("stack region is too small (size={:?})", size);
            error!("new(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        let mut storage: Box<[u8]> = vec![0u8; size].into_boxed_slice();
        let base: NonNull<u8> = NonNull::new(storage.as_mut_ptr()).expect("boxed slices are never null");
        Ok(Self {
            base,
            size,
            _storage: Some(storage),
        })
    }

    /// Allocates a stack region of [limits::DEFAULT_STACK_SIZE] bytes.
    pub fn with_default_size() -> Result<Self, Fail> {
        Self::new(limits::DEFAULT_STACK_SIZE)
    }

    /// Adopts a caller-owned region as a stack.
    ///
    /// # Safety
    ///
    /// The region `[base, base + size)` must be valid for reads and writes
    /// and must not be used for anything else until the task spawned on it is
    /// dead and its handle dropped.
    pub unsafe fn from_raw_parts(base: *mut u8, size: usize) -> Result<Self, Fail> {
        if size < limits::MIN_STACK_SIZE {
            let cause: String = format!("stack region is too small (size={:?})", size);
            error!("from_raw_parts(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        let base: NonNull<u8> = match NonNull::new(base) {
            Some(base) => base,
            None => {
                let cause: String = "stack region has a null base".to_string();
                error!("from_raw_parts(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        Ok(Self {
            base,
            size,
            _storage: None,
        })
    }

    pub(crate) fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl Deref for SharedTask {
    type Target = Task;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedTask {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}

/// Tasks sit on the scheduler's intrusive queues.
impl IntrusivelyLinked for Task {
    fn get_link_next(&self) -> Option<NonNull<Self>> {
        self.link_next.get()
    }

    fn set_link_next(&self, element: Option<NonNull<Self>>) {
        self.link_next.set(element);
    }

    fn get_link_prev(&self) -> Option<NonNull<Self>> {
        self.link_prev.get()
    }

    fn set_link_prev(&self, element: Option<NonNull<Self>>) {
        self.link_prev.set(element);
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
