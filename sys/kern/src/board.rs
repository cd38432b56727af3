// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hooks into the board the kernel is running on.
//!
//! The kernel doesn't know how to drive a UART or program a timer. The board
//! startup code brings those up, and hands the kernel a `Board` with the few
//! operations it needs. Both hooks are called from kernel context with
//! interrupts masked, so they should be quick and must not block.
pub struct Board {
    /// Sends bytes to the console. Fire and forget: there is no way to report
    /// failure, and partial writes are the board's problem.
    pub console_write: fn(&[u8]),
    /// Acknowledges the current timer interrupt and schedules the next one
    /// `interval` timer cycles after the previous deadline.
    pub arm_next_tick: fn(u32),
}
