// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel online profiling support.
//!
//! This is intended to help measure the timing of kernel events, duration of
//! syscalls, and the like, as an aid to debugging or optimization work.
//!
//! Any board that wants profiling populates an `EventsTable` and passes it to
//! `kern::profiling::configure_events_table` from its startup routine. A
//! typical implementation toggles GPIOs for a logic analyzer to watch. Keep
//! the handlers fast; they run with interrupts masked.

use core::sync::atomic::{AtomicPtr, Ordering};

/// Hooks that must be provided by the board setup code if it wants to enable
/// kernel profiling.
///
/// If you provide an `EventsTable`, you have to provide every hook. To omit
/// one, use something like:
///
/// ```ignore
///   timer_isr_enter: || (),
/// ```
pub struct EventsTable {
    /// Called on entry to the kernel syscall handler, with the syscall number.
    pub syscall_enter: fn(u32),
    /// Called on exit from the kernel syscall handler back to a task.
    pub syscall_exit: fn(),
    /// Called on entry to the kernel's timer ISR.
    pub timer_isr_enter: fn(),
    /// Called on exit from the kernel's timer ISR.
    pub timer_isr_exit: fn(),
    /// Called just before the current task changes, with the index of the
    /// incoming task.
    pub context_switch: fn(usize),
    /// Called when an exited task's slot is reclaimed, with its index.
    pub task_reaped: fn(usize),
}

/// Supplies the kernel with an events table.
pub fn configure_events_table(table: &'static EventsTable) {
    EVENTS_TABLE.store(table as *const _ as *mut _, Ordering::Relaxed);
}

/// Null until `configure_events_table` is called. Any non-null value came
/// from a `&'static EventsTable`.
static EVENTS_TABLE: AtomicPtr<EventsTable> =
    AtomicPtr::new(core::ptr::null_mut());

fn table() -> Option<&'static EventsTable> {
    let p = EVENTS_TABLE.load(Ordering::Relaxed);
    // Safety: only ever written from a `&'static`, and we only hand out
    // shared references.
    unsafe { p.as_ref() }
}

pub(crate) fn event_syscall_enter(nr: u32) {
    if let Some(t) = table() {
        (t.syscall_enter)(nr)
    }
}

pub(crate) fn event_syscall_exit() {
    if let Some(t) = table() {
        (t.syscall_exit)()
    }
}

pub(crate) fn event_timer_isr_enter() {
    if let Some(t) = table() {
        (t.timer_isr_enter)()
    }
}

pub(crate) fn event_timer_isr_exit() {
    if let Some(t) = table() {
        (t.timer_isr_exit)()
    }
}

pub(crate) fn event_context_switch(idx: usize) {
    if let Some(t) = table() {
        (t.context_switch)(idx)
    }
}

pub(crate) fn event_task_reaped(idx: usize) {
    if let Some(t) = table() {
        (t.task_reaped)(idx)
    }
}
