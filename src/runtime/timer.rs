// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::scheduler::task::SharedTask;
use ::std::collections::BTreeMap;

//==============================================================================
// Structures
//==============================================================================

/// Position of a task in the timer service. The sequence number makes keys
/// unique and orders equal deadlines by insertion, which is what makes timer
/// expiry stable within a tick.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct TimerKey {
    pub deadline: u64,
    seq: u64,
}

/// Timer service: every sleeping task and every waiting task with a timeout
/// holds exactly one entry here, keyed by its absolute deadline in
/// milliseconds of scheduler uptime. The ordered map gives logarithmic
/// insert, removal by task, and pop-min; the key each task stashes makes
/// removal by task a direct lookup.
pub struct TimerService {
    entries: BTreeMap<TimerKey, SharedTask>,
    next_seq: u64,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for TimerService
impl TimerService {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Arms a deadline for `task` and stashes the resulting key in it.
    pub fn add(&mut self, mut task: SharedTask, deadline: u64) {
        debug_assert!(task.timer_key().is_none(), "task already has an armed deadline");
        let key: TimerKey = TimerKey {
            deadline,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        task.set_timer_key(Some(key));
        self.entries.insert(key, task);
    }

    /// Disarms `task`'s deadline, if one is armed.
    pub fn remove(&mut self, task: &SharedTask) -> bool {
        match task.timer_key() {
            Some(key) => {
                let entry: Option<SharedTask> = self.entries.remove(&key);
                debug_assert!(entry.is_some(), "task key does not match a timer entry");
                task.clone().set_timer_key(None);
                true
            },
            None => false,
        }
    }

    /// Returns the earliest armed deadline.
    pub fn peek_min(&self) -> Option<u64> {
        self.entries.keys().next().map(|key: &TimerKey| key.deadline)
    }

    /// Pops the earliest entry if its deadline is due at `now`. Draining due
    /// entries one at a time keeps them in deadline order, and in insertion
    /// order within one deadline.
    pub fn pop_due(&mut self, now: u64) -> Option<SharedTask> {
        let key: TimerKey = *self.entries.keys().next()?;
        if key.deadline > now {
            return None;
        }
        let mut task: SharedTask = self.entries.remove(&key).expect("peeked key should be present");
        task.set_timer_key(None);
        Some(task)
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::TimerService;
    use crate::runtime::scheduler::task::SharedTask;
    use ::anyhow::Result;

    #[test]
    fn deadlines_pop_in_order() -> Result<()> {
        let mut timers: TimerService = TimerService::new();
        let late: SharedTask = SharedTask::main_task();
        let early: SharedTask = SharedTask::main_task();

        timers.add(late.clone(), 20);
        timers.add(early.clone(), 10);
        crate::ensure_eq!(timers.peek_min(), Some(10));

        // Nothing is due before the earliest deadline.
        crate::ensure_eq!(timers.pop_due(9).is_some(), false);

        // Entries come out in deadline order, not insertion order.
        let first: SharedTask = timers.pop_due(25).expect("deadline 10 is due");
        crate::ensure_eq!(SharedTask::ptr_eq(&first, &early), true);
        let second: SharedTask = timers.pop_due(25).expect("deadline 20 is due");
        crate::ensure_eq!(SharedTask::ptr_eq(&second, &late), true);
        crate::ensure_eq!(timers.is_empty(), true);

        Ok(())
    }

    #[test]
    fn equal_deadlines_pop_in_insertion_order() -> Result<()> {
        let mut timers: TimerService = TimerService::new();
        let first_in: SharedTask = SharedTask::main_task();
        let second_in: SharedTask = SharedTask::main_task();

        timers.add(first_in.clone(), 10);
        timers.add(second_in.clone(), 10);

        let first_out: SharedTask = timers.pop_due(10).expect("deadline 10 is due");
        crate::ensure_eq!(SharedTask::ptr_eq(&first_out, &first_in), true);
        let second_out: SharedTask = timers.pop_due(10).expect("deadline 10 is due");
        crate::ensure_eq!(SharedTask::ptr_eq(&second_out, &second_in), true);

        Ok(())
    }

    #[test]
    fn remove_disarms_a_deadline() -> Result<()> {
        let mut timers: TimerService = TimerService::new();
        let task: SharedTask = SharedTask::main_task();

        timers.add(task.clone(), 10);
        crate::ensure_eq!(task.timer_key().is_some(), true);

        crate::ensure_eq!(timers.remove(&task), true);
        crate::ensure_eq!(task.timer_key().is_none(), true);
        crate::ensure_eq!(timers.is_empty(), true);

        // A second removal is a no-op.
        crate::ensure_eq!(timers.remove(&task), false);

        Ok(())
    }
}
