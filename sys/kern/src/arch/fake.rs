// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stand-in architecture for running the kernel logic on a host.
//!
//! Register layouts match the real thing so that the page layout math is the
//! same. Context switches don't move anything; they are only counted, and
//! control comes straight back to the caller. Interrupt masking is a flag.
//! All of the bookkeeping is per-thread so tests can run in parallel.

use core::cell::{Cell, RefCell};

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

macro_rules! uassert {
    ($cond:expr) => {
        assert!($cond)
    };
}

macro_rules! uassert_eq {
    ($cond1:expr, $cond2:expr) => {
        assert_eq!($cond1, $cond2)
    };
}

pub const USER_PSTATE: u64 = 0;

#[derive(Debug, Default, Clone)]
#[repr(C)]
pub struct SavedState {
    callee_saved: [u64; 10],
    fp: u64,
    sp: u64,
    pc: u64,
}

impl crate::task::ArchState for SavedState {
    fn stack_pointer(&self) -> usize {
        self.sp as usize
    }

    fn resume_pc(&self) -> usize {
        self.pc as usize
    }

    fn set_resume(&mut self, pc: usize, sp: usize) {
        self.pc = pc as u64;
        self.sp = sp as u64;
    }

    fn set_kernel_entry(&mut self, entry: usize, arg: usize) {
        self.callee_saved[0] = entry as u64;
        self.callee_saved[1] = arg as u64;
    }

    fn kernel_entry(&self) -> (usize, usize) {
        (self.callee_saved[0] as usize, self.callee_saved[1] as usize)
    }
}

#[derive(Clone, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct TrapFrame {
    regs: [u64; 31],
    sp: u64,
    pc: u64,
    pstate: u64,
}

impl TrapFrame {
    /// Loads the registers a user program would set up before `svc`.
    #[cfg(test)]
    pub fn set_syscall(&mut self, nr: u32, args: [usize; 3]) {
        self.regs[8] = u64::from(nr);
        for (r, a) in self.regs.iter_mut().zip(args) {
            *r = a as u64;
        }
    }
}

impl crate::task::UserFrame for TrapFrame {
    fn syscall_number(&self) -> u32 {
        self.regs[8] as u32
    }

    fn arg0(&self) -> usize {
        self.regs[0] as usize
    }
    fn arg1(&self) -> usize {
        self.regs[1] as usize
    }
    fn arg2(&self) -> usize {
        self.regs[2] as usize
    }

    fn ret0(&self) -> usize {
        self.regs[0] as usize
    }
    fn set_ret0(&mut self, value: usize) {
        self.regs[0] = value as u64;
    }

    fn user_stack_pointer(&self) -> usize {
        self.sp as usize
    }
    fn set_user_stack_pointer(&mut self, sp: usize) {
        self.sp = sp as u64;
    }

    fn user_pc(&self) -> usize {
        self.pc as usize
    }
    fn set_user_entry(&mut self, pc: usize) {
        self.pc = pc as u64;
        self.pstate = USER_PSTATE;
    }
}

/// Things the kernel asked of the machine, for tests to check the order of.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ArchEvent {
    IrqOn,
    IrqOff,
    Switch,
}

std::thread_local! {
    static SWITCHES: Cell<usize> = const { Cell::new(0) };
    static IRQS_ENABLED: Cell<bool> = const { Cell::new(false) };
    static EVENTS: RefCell<Vec<ArchEvent>> = const { RefCell::new(Vec::new()) };
}

fn record(e: ArchEvent) {
    EVENTS.with(|v| v.borrow_mut().push(e));
}

/// Events recorded by this thread since the last call.
pub fn take_events() -> Vec<ArchEvent> {
    EVENTS.with(|v| v.take())
}

/// Records a switch. On the host, "resuming" `next` just means returning.
pub unsafe fn switch_context(_prev: *mut SavedState, _next: *const SavedState) {
    SWITCHES.with(|s| s.set(s.get() + 1));
    record(ArchEvent::Switch);
}

/// Number of calls to `switch_context` made by this thread so far.
pub fn switch_count() -> usize {
    SWITCHES.with(|s| s.get())
}

/// Arbitrary but recognizable stand-in for the trampoline address.
pub fn fork_trampoline() -> usize {
    0xf0f0_0000
}

pub fn enable_irq() {
    IRQS_ENABLED.with(|f| f.set(true));
    record(ArchEvent::IrqOn);
}

pub fn disable_irq() {
    IRQS_ENABLED.with(|f| f.set(false));
    record(ArchEvent::IrqOff);
}

pub fn irqs_enabled() -> bool {
    IRQS_ENABLED.with(|f| f.get())
}
