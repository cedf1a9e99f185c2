// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::std::thread;

//==============================================================================
// Standalone Functions
//==============================================================================

/// Runs a scenario on a dedicated host thread with a fresh scheduler. The
/// scheduler is per-thread state, so every scenario gets its own thread; the
/// scenario body is the scheduler's main pseudo-task. Panics propagate.
pub fn run_scenario(scenario: fn()) {
    thread::Builder::new()
        .name("scheduler".to_string())
        .spawn(move || {
            strand::init().expect("fresh thread has no scheduler");
            scenario();
        })
        .expect("cannot spawn scheduler thread")
        .join()
        .expect("scenario panicked");
}

/// Default-sized task stack.
#[allow(dead_code)]
pub fn stack() -> strand::Stack {
    strand::Stack::with_default_size().expect("default stack size is valid")
}
