// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel's mutable state, in one place.
//!
//! Operations on it are spread over the modules that own each concern:
//! lifecycle in `task`, scheduling in `sched`, ticks in `time`, and the
//! syscall entry in `syscalls`.

use abi::Pid;

use crate::board::Board;
use crate::config;
use crate::mm::PageAllocator;
use crate::sched::Scheduler;
use crate::task::{Priority, Task, TaskTable};
use crate::time::Timestamp;
use crate::trace::{Ringbuf, Trace, TRACE_DEPTH};

static_assertions::const_assert!(config::INIT_PRIORITY > 0);

pub struct Kernel<'m> {
    pub(crate) pages: PageAllocator<'m>,
    pub(crate) sched: Scheduler,
    pub(crate) board: &'static Board,
    pub(crate) now: Timestamp,
    pub(crate) trace: Ringbuf<Trace, TRACE_DEPTH>,
}

impl<'m> Kernel<'m> {
    /// Sets up the kernel with only the boot task, which is current.
    ///
    /// # Safety
    ///
    /// Every page in the region managed by `pages` must be RAM that nothing
    /// but this kernel will touch. The kernel writes task headers and trap
    /// frames into pages as it hands them out, and reads them back later.
    pub unsafe fn new(board: &'static Board, pages: PageAllocator<'m>) -> Self {
        let boot = Task::boot(Priority(config::INIT_PRIORITY));
        Self {
            pages,
            sched: Scheduler::new(TaskTable::new(boot)),
            board,
            now: Timestamp::default(),
            trace: Ringbuf::new(Trace::None),
        }
    }

    /// The task that is running (or, from an interrupt, was running).
    pub fn current(&self) -> Pid {
        self.sched.current()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.sched
    }

    pub fn pages(&self) -> &PageAllocator<'m> {
        &self.pages
    }

    /// Ticks since boot.
    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn trace(&self) -> &Ringbuf<Trace, TRACE_DEPTH> {
        &self.trace
    }
}
