// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture support for bare-metal AArch64 (EL1 kernel, EL0 tasks).
//!
//! # Stack layout
//!
//! Every task other than the boot task owns one page, which serves as its
//! kernel stack. The `TaskHeader` sits at the base of the page. The top
//! `size_of::<TrapFrame>()` bytes hold the registers of the task's user-mode
//! context, saved there by the platform's exception vectors on entry from EL0
//! and restored by `kern_ret_to_user`. The kernel stack proper grows down from
//! just below the trap frame.
//!
//! # Context switches
//!
//! Switching is cooperative at the machine level: `kern_switch_to` saves the
//! AAPCS64 callee-saved registers, the stack pointer and the link register
//! into the outgoing task's `SavedState`, loads the incoming one's, and
//! returns on the incoming task's stack. Because the caller-saved registers are
//! dead across any call, nothing else needs preserving.
//!
//! A freshly created task's `SavedState` points its link register at
//! `kern_ret_from_fork`, with its stack pointer at its trap frame. For kernel
//! tasks, x19 holds the entry function and x20 its argument. For cloned user
//! tasks, x19 is zero and the trampoline goes straight to user mode.
//!
//! # Interrupt masking
//!
//! Only the I bit of DAIF is managed here. FIQs are not used by the kernel.

use core::arch::{asm, global_asm};
use core::mem::{offset_of, size_of};

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

macro_rules! uassert {
    ($cond : expr) => {
        if !$cond {
            panic!("Assertion failed!");
        }
    };
}

macro_rules! uassert_eq {
    ($cond1 : expr, $cond2 : expr) => {
        if !($cond1 == $cond2) {
            panic!("Assertion failed!");
        }
    };
}

/// `SPSR_EL1` value for returning to EL0 with interrupts unmasked (M = EL0t,
/// DAIF clear).
pub const USER_PSTATE: u64 = 0;

/// Callee-saved machine state of a task that is not currently running.
///
/// Field order is load-bearing: `kern_switch_to` walks it with paired loads
/// and stores.
#[derive(Debug, Default, Clone)]
#[repr(C)]
pub struct SavedState {
    x19: u64,
    x20: u64,
    x21: u64,
    x22: u64,
    x23: u64,
    x24: u64,
    x25: u64,
    x26: u64,
    x27: u64,
    x28: u64,
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
        self.x19 = entry as u64;
        self.x20 = arg as u64;
    }

    fn kernel_entry(&self) -> (usize, usize) {
        (self.x19 as usize, self.x20 as usize)
    }
}

/// User-mode register file, as saved on exception entry from EL0.
#[derive(Clone, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct TrapFrame {
    regs: [u64; 31],
    sp: u64,
    pc: u64,
    pstate: u64,
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

static_assertions::const_assert_eq!(size_of::<TrapFrame>(), 34 * 8);
static_assertions::const_assert_eq!(offset_of!(SavedState, pc), 12 * 8);

global_asm!(
    "
    .section .text.kern_switch_to
    .globl kern_switch_to
    .type kern_switch_to,function
    kern_switch_to:
        mov x10, x0
        mov x9, sp
        stp x19, x20, [x10], #16
        stp x21, x22, [x10], #16
        stp x23, x24, [x10], #16
        stp x25, x26, [x10], #16
        stp x27, x28, [x10], #16
        stp x29, x9, [x10], #16
        str x30, [x10]

        mov x10, x1
        ldp x19, x20, [x10], #16
        ldp x21, x22, [x10], #16
        ldp x23, x24, [x10], #16
        ldp x25, x26, [x10], #16
        ldp x27, x28, [x10], #16
        ldp x29, x9, [x10], #16
        ldr x30, [x10]
        mov sp, x9
        ret

    .section .text.kern_ret_from_fork
    .globl kern_ret_from_fork
    .type kern_ret_from_fork,function
    kern_ret_from_fork:
        bl kern_schedule_tail
        cbz x19, kern_ret_to_user
        mov x0, x20
        blr x19
        bl kern_kthread_return

    .globl kern_ret_to_user
    .type kern_ret_to_user,function
    kern_ret_to_user:
        msr daifset, #2
        ldp x21, x22, [sp, #{sp_off}]
        ldr x23, [sp, #{pstate_off}]
        msr sp_el0, x21
        msr elr_el1, x22
        msr spsr_el1, x23
        ldp x0, x1, [sp, #16 * 0]
        ldp x2, x3, [sp, #16 * 1]
        ldp x4, x5, [sp, #16 * 2]
        ldp x6, x7, [sp, #16 * 3]
        ldp x8, x9, [sp, #16 * 4]
        ldp x10, x11, [sp, #16 * 5]
        ldp x12, x13, [sp, #16 * 6]
        ldp x14, x15, [sp, #16 * 7]
        ldp x16, x17, [sp, #16 * 8]
        ldp x18, x19, [sp, #16 * 9]
        ldp x20, x21, [sp, #16 * 10]
        ldp x22, x23, [sp, #16 * 11]
        ldp x24, x25, [sp, #16 * 12]
        ldp x26, x27, [sp, #16 * 13]
        ldp x28, x29, [sp, #16 * 14]
        ldr x30, [sp, #16 * 15]
        add sp, sp, #{frame_size}
        eret
    ",
    sp_off = const offset_of!(TrapFrame, sp),
    pstate_off = const offset_of!(TrapFrame, pstate),
    frame_size = const size_of::<TrapFrame>(),
);

extern "C" {
    fn kern_switch_to(prev: *mut SavedState, next: *const SavedState);
    fn kern_ret_from_fork();
}

/// Saves the running context into `prev` and resumes `next`.
///
/// Returns when some later switch names `prev` as its `next`.
///
/// # Safety
///
/// `prev` must be the `SavedState` of the task that is actually running, and
/// `next` must have been written by a previous switch away from its task or
/// prepared by task creation. Both must stay valid until they are resumed.
pub unsafe fn switch_context(prev: *mut SavedState, next: *const SavedState) {
    kern_switch_to(prev, next)
}

/// Address at which new tasks begin executing in the kernel.
pub fn fork_trampoline() -> usize {
    kern_ret_from_fork as usize
}

pub fn enable_irq() {
    // Not nomem: this must also order memory accesses, since it ends a
    // section in which the kernel was relying on interrupts being masked.
    unsafe { asm!("msr daifclr, #2", options(nostack, preserves_flags)) }
}

pub fn disable_irq() {
    unsafe { asm!("msr daifset, #2", options(nostack, preserves_flags)) }
}

const DAIF_I: u64 = 1 << 7;

pub fn irqs_enabled() -> bool {
    let daif: u64;
    unsafe {
        asm!("mrs {}, daif", out(reg) daif, options(nomem, nostack));
    }
    daif & DAIF_I == 0
}

struct DaifCriticalSection;
critical_section::set_impl!(DaifCriticalSection);

unsafe impl critical_section::Impl for DaifCriticalSection {
    unsafe fn acquire() -> critical_section::RawRestoreState {
        let was_enabled = irqs_enabled();
        disable_irq();
        was_enabled
    }

    unsafe fn release(was_enabled: critical_section::RawRestoreState) {
        if was_enabled {
            enable_irq();
        }
    }
}
