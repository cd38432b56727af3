// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixtures for the host test suite.

use std::cell::{Cell, RefCell};

use abi::{Pid, PAGE_SIZE};

use crate::board::Board;
use crate::config;
use crate::kernel::Kernel;
use crate::mm::{PageAllocator, PageState};
use crate::task::Spawn;

#[repr(C, align(4096))]
struct RawPage([u8; PAGE_SIZE]);

static_assertions::const_assert_eq!(core::mem::align_of::<RawPage>(), PAGE_SIZE);

std::thread_local! {
    static CONSOLE: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
    static ARMED: Cell<u32> = const { Cell::new(0) };
}

fn console_write(bytes: &[u8]) {
    CONSOLE.with(|c| c.borrow_mut().extend_from_slice(bytes));
}

fn arm_next_tick(interval: u32) {
    assert_eq!(interval, config::TICK_INTERVAL);
    ARMED.with(|a| a.set(a.get() + 1));
}

static TEST_BOARD: Board = Board {
    console_write,
    arm_next_tick,
};

/// Builds a kernel managing `pages` pages of freshly leaked, zeroed memory.
/// Only the boot task exists.
pub fn kernel(pages: usize) -> Kernel<'static> {
    let arena: &'static mut [RawPage] = (0..pages)
        .map(|_| RawPage([0; PAGE_SIZE]))
        .collect::<Vec<_>>()
        .leak();
    let map = vec![PageState::Free; pages].leak();
    let allocator = PageAllocator::new(arena.as_mut_ptr() as usize, map);
    // Safety: the arena is leaked, so nothing else will ever touch it.
    unsafe { Kernel::new(&TEST_BOARD, allocator) }
}

/// Creates a task the way the first task comes to be on hardware: as a
/// kernel task that gets switched to and then moves to user mode, starting
/// at `pc`. Leaves it current, owning its user stack.
pub fn spawn_user(k: &mut Kernel<'_>, pc: usize) -> Pid {
    let pid = k.create(Spawn::Kernel { entry: 1, arg: 0 }).unwrap();
    k.schedule();
    assert_eq!(k.current(), pid);
    k.move_to_user_mode(pc).unwrap();
    pid
}

/// Everything written to the console by this thread since the last call.
pub fn take_console() -> Vec<u8> {
    CONSOLE.with(|c| c.take())
}

/// Number of times this thread has armed the timer.
pub fn armed_ticks() -> u32 {
    ARMED.with(|a| a.get())
}
