// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! User program support library.
//!
//! This contains syscall stubs, and re-exports the contents of the `abi`
//! crate that gets shared with the kernel.
//!
//! # Syscall convention
//!
//! The syscall number goes in `x8` and up to three arguments in `x0`-`x2`,
//! then `svc #0`. The result comes back in `x0`: small negative values (see
//! `SysError`) are errors, anything else is success. All other registers are
//! preserved.
//!
//! `clone` needs a stub written in assembly, because the child wakes up on a
//! fresh stack with none of the parent's Rust frames above it. Everything it
//! needs must be in registers: the stub parks the entry point and argument
//! in `x10`/`x11`, which the kernel copies to the child along with the rest
//! of the register file.
//!
//! Outside of AArch64 the stubs exist only so that the workspace builds on
//! the host; calling them panics.

#![no_std]

pub use abi::*;

/// Writes `bytes` to the console.
pub fn sys_write(bytes: &[u8]) -> Result<(), SysError> {
    let raw = syscall(
        Sysnum::Write,
        [bytes.as_ptr() as usize, bytes.len(), 0],
    );
    decode_result(raw).map(|_| ())
}

/// Allocates one page. Returns its base address; the page is `PAGE_SIZE`
/// bytes long and belongs to the caller until it exits or hands it to a child
/// as a stack.
pub fn sys_malloc() -> Result<*mut u8, SysError> {
    decode_result(syscall(Sysnum::Malloc, [0; 3])).map(|a| a as *mut u8)
}

/// Starts a new task running `entry(arg)` on the stack whose top is
/// `stack_top`. When `entry` returns, the new task exits.
///
/// If `stack_top` is the top of a page from `sys_malloc`, ownership of the
/// page passes to the new task and it is freed when that task exits.
///
/// Returns the new task's pid.
pub fn sys_clone(
    entry: extern "C" fn(usize),
    arg: usize,
    stack_top: *mut u8,
) -> Result<Pid, SysError> {
    let raw = clone_stub(entry, arg, stack_top as usize);
    let pid = decode_result(raw)?;
    u16::try_from(pid)
        .map(Pid)
        .map_err(|_| SysError::InvalidArgument)
}

/// Ends the calling task, releasing every page it owns.
pub fn sys_exit() -> ! {
    exit_stub()
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "aarch64")] {
        fn syscall(nr: Sysnum, args: [usize; 3]) -> usize {
            let ret;
            // Safety: the kernel only touches the registers named here, and
            // memory the arguments point to.
            unsafe {
                core::arch::asm!(
                    "svc #0",
                    in("x8") nr as usize,
                    inlateout("x0") args[0] => ret,
                    in("x1") args[1],
                    in("x2") args[2],
                    options(nostack),
                );
            }
            ret
        }

        fn exit_stub() -> ! {
            // Safety: exit doesn't come back.
            unsafe {
                core::arch::asm!(
                    "svc #0",
                    in("x8") Sysnum::Exit as usize,
                    options(noreturn, nostack),
                );
            }
        }

        extern "C" {
            fn __sys_clone(
                entry: extern "C" fn(usize),
                arg: usize,
                stack_top: usize,
            ) -> usize;
        }

        fn clone_stub(
            entry: extern "C" fn(usize),
            arg: usize,
            stack_top: usize,
        ) -> usize {
            // Safety: the stub follows the C ABI on the parent's side.
            unsafe { __sys_clone(entry, arg, stack_top) }
        }

        core::arch::global_asm!(
            "
            .section .text.__sys_clone
            .globl __sys_clone
            .type __sys_clone,function
            __sys_clone:
                mov x10, x0
                mov x11, x1
                mov x8, #{clone}
                svc #0
                cbz x0, 1f
                ret
            1:
                mov x0, x11
                blr x10
                mov x8, #{exit}
                svc #0
            2:
                b 2b
            ",
            clone = const Sysnum::Clone as u32,
            exit = const Sysnum::Exit as u32,
        );
    } else {
        fn syscall(_nr: Sysnum, _args: [usize; 3]) -> usize {
            panic!("syscalls are only available on aarch64");
        }

        fn exit_stub() -> ! {
            panic!("syscalls are only available on aarch64");
        }

        fn clone_stub(
            _entry: extern "C" fn(usize),
            _arg: usize,
            _stack_top: usize,
        ) -> usize {
            panic!("syscalls are only available on aarch64");
        }
    }
}
