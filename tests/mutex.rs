// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//==============================================================================
// Imports
//==============================================================================

use ::std::{
    cell::RefCell,
    rc::Rc,
};

//==============================================================================
// Mutex
//==============================================================================

/// Three tasks enqueue on a held mutex in order A, B, C; they acquire in the
/// same order once the holder releases.
#[test]
fn contended_mutex_hands_off_in_fifo_order() {
    common::run_scenario(|| {
        let events: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let mut mutex: strand::Mutex = strand::Mutex::new();

        mutex.lock().expect("uncontended lock succeeds");

        let mut handles: Vec<strand::TaskHandle> = Vec::new();
        for name in ["a", "b", "c"] {
            let task_events: Rc<RefCell<Vec<String>>> = events.clone();
            let task_mutex: strand::Mutex = mutex.clone();
            handles.push(strand::spawn(name, common::stack(), move || {
                let mut task_mutex: strand::Mutex = task_mutex;
                task_mutex.lock().expect("lock should not be cancelled");
                task_events.borrow_mut().push(format!("{}-acquired", name));
                task_mutex.unlock().expect("owner can unlock");
            }));
        }

        // Let all three run and block on the mutex, in spawn order.
        strand::yield_now();
        assert!(events.borrow().is_empty());

        // Release: ownership hands off down the queue.
        mutex.unlock().expect("owner can unlock");
        for handle in &handles {
            strand::join(handle).expect("join should not be cancelled");
        }

        let expected: Vec<String> = vec!["a-acquired", "b-acquired", "c-acquired"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(*events.borrow(), expected);
    });
}

/// Unlocking with an empty wait queue clears the owner without scheduling.
#[test]
fn unlock_with_empty_queue_clears_owner() {
    common::run_scenario(|| {
        let mut mutex: strand::Mutex = strand::Mutex::new();

        mutex.lock().expect("uncontended lock succeeds");
        mutex.unlock().expect("owner can unlock");

        // The mutex is free again.
        assert!(mutex.try_lock());
        mutex.unlock().expect("owner can unlock");
    });
}

/// Unlock by a task that does not hold the mutex fails and leaves the mutex
/// intact.
#[test]
fn unlock_by_non_owner_fails() {
    common::run_scenario(|| {
        let mut mutex: strand::Mutex = strand::Mutex::new();
        mutex.lock().expect("uncontended lock succeeds");

        let task_mutex: strand::Mutex = mutex.clone();
        let outcome: Rc<RefCell<Option<i32>>> = Rc::new(RefCell::new(None));
        let task_outcome: Rc<RefCell<Option<i32>>> = outcome.clone();
        let task: strand::TaskHandle = strand::spawn("interloper", common::stack(), move || {
            let mut task_mutex: strand::Mutex = task_mutex;
            let error: strand::Fail = task_mutex.unlock().err().expect("non-owner unlock should fail");
            *task_outcome.borrow_mut() = Some(error.errno);
        });

        strand::join(&task).expect("join should not be cancelled");
        assert_eq!(*outcome.borrow(), Some(libc::EPERM));

        // The original holder still owns the mutex.
        mutex.unlock().expect("owner can unlock");
    });
}

/// A locker whose wait is cancelled does not acquire, and the queue stays
/// consistent for later hand-offs.
#[test]
fn cancelled_locker_does_not_acquire() {
    common::run_scenario(|| {
        let outcome: Rc<RefCell<Option<i32>>> = Rc::new(RefCell::new(None));
        let mut mutex: strand::Mutex = strand::Mutex::new();
        mutex.lock().expect("uncontended lock succeeds");

        let task_mutex: strand::Mutex = mutex.clone();
        let task_outcome: Rc<RefCell<Option<i32>>> = outcome.clone();
        let task: strand::TaskHandle = strand::spawn("locker", common::stack(), move || {
            let mut task_mutex: strand::Mutex = task_mutex;
            let error: strand::Fail = task_mutex.lock().err().expect("cancelled lock should fail");
            *task_outcome.borrow_mut() = Some(error.errno);
        });

        // Let the locker block, then cancel its wait.
        strand::yield_now();
        strand::cancel_wait(&task);
        strand::join(&task).expect("join should not be cancelled");
        assert_eq!(*outcome.borrow(), Some(libc::ECANCELED));

        // The cancelled locker left the queue: release finds it empty.
        mutex.unlock().expect("owner can unlock");
        assert!(mutex.try_lock());
        mutex.unlock().expect("owner can unlock");
    });
}
