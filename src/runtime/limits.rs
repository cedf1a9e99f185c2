// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

/// Smallest stack region accepted for a task.
///
/// The trampoline, the entry closure, and any logging call the task makes all
/// run on this region, so regions smaller than this are rejected outright.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Stack size used by [Stack::with_default_size](crate::Stack::with_default_size).
pub const DEFAULT_STACK_SIZE: usize = 128 * 1024;

/// Stack tops are rounded down to this boundary before a context is prepared.
pub const STACK_ALIGNMENT: usize = 16;
