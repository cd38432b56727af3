// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Syscall dispatch.
//!
//! # Syscall implementations
//!
//! Syscalls are implemented by functions with the signature:
//!
//! ```ignore
//! fn syscall(k: &mut Kernel<'_>, args: [usize; 3]) -> SyscallResult;
//! ```
//!
//! `args` are the caller's argument registers. On success the handler returns
//! the value for the caller's return register, plus whether the caller can
//! keep running. A `KernelError` becomes the matching negative `SysError`
//! code, and the caller keeps running.
//!
//! The handlers live in `SYSCALL_TABLE`, indexed by syscall number. Numbers
//! past the end of the table get `BadSyscallNumber` rather than an
//! out-of-bounds read.

use abi::{NUM_SYSCALLS, PAGE_SIZE};

use crate::err::KernelError;
use crate::kernel::Kernel;
use crate::mm::{Owner, PageAddr};
use crate::task::{NextTask, Spawn, UserFrame};
use crate::trace::Trace;
use crate::umem::USlice;

pub type SyscallResult = Result<(usize, NextTask), KernelError>;

type Handler = fn(&mut Kernel<'_>, [usize; 3]) -> SyscallResult;

/// Order matches `abi::Sysnum`.
static SYSCALL_TABLE: [Handler; NUM_SYSCALLS] =
    [write, malloc, clone, exit];

impl Kernel<'_> {
    /// Services a syscall from the current task, whose registers are in its
    /// trap frame. The result is written back to the frame, and the kernel
    /// switches away if the call calls for it.
    pub fn handle_syscall(&mut self) {
        let caller = self.sched.current();
        let Some(frame) = self.trap_frame(caller) else {
            panic!("syscall from task without a user context");
        };
        let nr = frame.syscall_number();
        let args = [frame.arg0(), frame.arg1(), frame.arg2()];

        crate::profiling::event_syscall_enter(nr);
        ktrace!(self, Trace::Syscall { pid: caller, nr });

        let (ret, next) = match dispatch(self, nr, args) {
            Ok(r) => r,
            Err(err) => {
                ktrace!(self, Trace::SyscallFailed { pid: caller, err });
                (err.to_sysret(), NextTask::Same)
            }
        };
        // The caller is still in the table even if it just exited; its slot
        // isn't reclaimed until after the switch below.
        if let Some(frame) = self.trap_frame_mut(caller) {
            frame.set_ret0(ret);
        }

        match next {
            NextTask::Same => (),
            NextTask::Other => self.reschedule(),
        }
        crate::profiling::event_syscall_exit();
    }
}

/// Looks up and runs the handler for syscall `nr`.
pub(crate) fn dispatch(
    k: &mut Kernel<'_>,
    nr: u32,
    args: [usize; 3],
) -> SyscallResult {
    let handler = usize::try_from(nr)
        .ok()
        .and_then(|i| SYSCALL_TABLE.get(i))
        .ok_or(KernelError::BadSyscallNumber(nr))?;
    handler(k, args)
}

/// Implementation of the `WRITE` syscall: `(ptr, len)`.
///
/// Hands the bytes to the board console. Returns 0.
fn write(k: &mut Kernel<'_>, [ptr, len, _]: [usize; 3]) -> SyscallResult {
    let buf = USlice::<u8>::from_raw(ptr, len)?;
    if !buf.is_empty() {
        // Safety: there is no memory protection; a task can read any memory
        // it names, and now so can we, for the duration of this call.
        let bytes = unsafe { buf.assume_readable() };
        (k.board.console_write)(bytes);
    }
    Ok((0, NextTask::Same))
}

/// Implementation of the `MALLOC` syscall.
///
/// Allocates one page owned by the caller. Returns its address.
fn malloc(k: &mut Kernel<'_>, _args: [usize; 3]) -> SyscallResult {
    let caller = k.sched.current();
    let page = critical_section::with(|cs| {
        k.pages.allocate(Owner::Task(caller), cs)
    })?;
    Ok((page.base(), NextTask::Same))
}

/// Implementation of the `CLONE` syscall: `(_, _, stack)`.
///
/// Creates a copy of the caller that resumes after the same `svc`, with a
/// return value of 0 and its stack pointer at `stack`. The first two argument
/// registers are left for the user-side stub. If the caller owns the page
/// holding the new stack, the page goes to the child. Returns the child's pid.
fn clone(k: &mut Kernel<'_>, [_, _, stack]: [usize; 3]) -> SyscallResult {
    let parent = k.sched.current();
    let child = k.create(Spawn::User { stack })?;

    // `stack` is the initial (full descending) stack pointer, so the stack
    // occupies the bytes below it. Zero was rejected by `create`.
    let stack_page = PageAddr::containing(stack - 1);
    critical_section::with(|cs| {
        k.pages.transfer(stack_page, parent, child, cs);
    });

    Ok((usize::from(child.0), NextTask::Same))
}

/// Implementation of the `EXIT` syscall. Does not return to the caller.
fn exit(k: &mut Kernel<'_>, _args: [usize; 3]) -> SyscallResult {
    let me = k.sched.current();
    Ok((0, k.exit(me)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::Owner;
    use crate::task::TaskState;
    use crate::testutil;
    use abi::{Pid, SysError, Sysnum};

    /// Issues a syscall as the current task and returns its return register.
    fn call(k: &mut Kernel<'_>, nr: u32, args: [usize; 3]) -> usize {
        let me = k.current();
        k.trap_frame_mut(me).unwrap().set_syscall(nr, args);
        k.handle_syscall();
        k.trap_frame(me).map_or(0, |f| f.ret0())
    }

    #[test]
    fn table_matches_abi() {
        let expected: [Handler; NUM_SYSCALLS] = [
            write as Handler,
            malloc as Handler,
            clone as Handler,
            exit as Handler,
        ];
        for (nr, h) in expected.iter().enumerate() {
            let sysnum = Sysnum::try_from(nr as u32).unwrap();
            assert_eq!(sysnum as usize, nr);
            assert_eq!(SYSCALL_TABLE[nr] as usize, *h as usize);
        }
    }

    #[test]
    fn write_reaches_console() {
        let mut k = testutil::kernel(8);
        testutil::spawn_user(&mut k, 0x9000);
        let msg = b"hello from user\n";
        let ret = call(
            &mut k,
            Sysnum::Write as u32,
            [msg.as_ptr() as usize, msg.len(), 0],
        );
        assert_eq!(ret, 0);
        assert_eq!(testutil::take_console(), msg);
    }

    #[test]
    fn write_rejects_bad_slice() {
        let mut k = testutil::kernel(8);
        testutil::spawn_user(&mut k, 0x9000);
        let ret = call(&mut k, Sysnum::Write as u32, [usize::MAX, 16, 0]);
        assert_eq!(ret, SysError::InvalidArgument.to_raw());
        assert!(testutil::take_console().is_empty());
    }

    #[test]
    fn bad_syscall_number() {
        let mut k = testutil::kernel(8);
        let pid = testutil::spawn_user(&mut k, 0x9000);
        for nr in [NUM_SYSCALLS as u32, 77, u32::MAX] {
            let ret = call(&mut k, nr, [0; 3]);
            assert_eq!(ret, SysError::BadSyscallNumber.to_raw());
        }
        assert_eq!(k.current(), pid);
        assert!(k.trace().contains(&Trace::SyscallFailed {
            pid,
            err: KernelError::BadSyscallNumber(u32::MAX)
        }));
    }

    #[test]
    fn malloc_until_exhausted() {
        // Boot + kernel page + user stack leaves two pages.
        let mut k = testutil::kernel(4);
        let pid = testutil::spawn_user(&mut k, 0x9000);

        let a = call(&mut k, Sysnum::Malloc as u32, [0; 3]);
        let b = call(&mut k, Sysnum::Malloc as u32, [0; 3]);
        assert_ne!(a, b);
        assert_eq!(a % PAGE_SIZE, 0);
        for p in [a, b] {
            assert_eq!(
                k.pages().owner(PageAddr::containing(p)),
                Some(Owner::Task(pid))
            );
        }

        let c = call(&mut k, Sysnum::Malloc as u32, [0; 3]);
        assert_eq!(c, usize::MAX);
        assert_eq!(
            abi::decode_result(c),
            Err(SysError::ResourceExhausted)
        );
    }

    #[test]
    fn malloc_succeeds_while_pages_remain() {
        let mut k = testutil::kernel(32);
        let pid = testutil::spawn_user(&mut k, 0x9000);
        let available = k.pages().free_pages();
        assert_eq!(available, 30);

        for _ in 0..available {
            let r = call(&mut k, Sysnum::Malloc as u32, [0; 3]);
            assert!(abi::decode_result(r).is_ok());
        }
        assert_eq!(k.pages().free_pages(), 0);
        // The user stack plus everything handed out.
        assert_eq!(k.pages().owned_by(pid).len(), available + 1);

        let r = call(&mut k, Sysnum::Malloc as u32, [0; 3]);
        assert_eq!(abi::decode_result(r), Err(SysError::ResourceExhausted));

        // All of it comes back on exit.
        call(&mut k, Sysnum::Exit as u32, [0; 3]);
        assert!(k.trace().contains(&Trace::Exited {
            pid,
            pages: available + 1
        }));
        assert_eq!(k.pages().free_pages(), 32);
    }

    #[test]
    fn clone_hands_over_stack_page() {
        let mut k = testutil::kernel(8);
        let parent = testutil::spawn_user(&mut k, 0x9000);
        let page = call(&mut k, Sysnum::Malloc as u32, [0; 3]);
        let stack = page + PAGE_SIZE;

        let ret = call(&mut k, Sysnum::Clone as u32, [0x7000, 5, stack]);
        let child = Pid(u16::try_from(ret).unwrap());
        assert_ne!(child, parent);
        // Parent keeps running; clone doesn't yield.
        assert_eq!(k.current(), parent);

        let page = PageAddr::containing(page);
        assert_eq!(k.pages().owner(page), Some(Owner::Task(child)));
        assert!(!k.pages().owned_by(parent).contains(&page));

        let frame = k.trap_frame(child).unwrap();
        assert_eq!(frame.ret0(), 0);
        assert_eq!(frame.arg1(), 5);
        assert_eq!(frame.user_stack_pointer(), stack);
    }

    #[test]
    fn clone_with_foreign_stack_keeps_ownership() {
        let mut k = testutil::kernel(8);
        let parent = testutil::spawn_user(&mut k, 0x9000);
        let owned = k.pages().owned_by(parent);
        let ret = call(&mut k, Sysnum::Clone as u32, [0, 0, 0x10_0000]);
        let child = Pid(u16::try_from(ret).unwrap());
        assert_eq!(k.pages().owned_by(parent), owned);
        assert!(k.pages().owned_by(child).is_empty());
    }

    #[test]
    fn clone_rejects_null_stack() {
        let mut k = testutil::kernel(8);
        testutil::spawn_user(&mut k, 0x9000);
        let ret = call(&mut k, Sysnum::Clone as u32, [0, 0, 0]);
        assert_eq!(ret, SysError::InvalidArgument.to_raw());
    }

    #[test]
    fn clone_with_full_table() {
        let mut k = testutil::kernel(crate::config::TASK_CAPACITY + 8);
        testutil::spawn_user(&mut k, 0x9000);
        while k.scheduler().tasks().first_free().is_some() {
            k.create(Spawn::Kernel { entry: 1, arg: 0 }).unwrap();
        }
        let free = k.pages().free_pages();
        let ret = call(&mut k, Sysnum::Clone as u32, [0, 0, 0x10_0000]);
        assert_eq!(ret, usize::MAX);
        assert_eq!(k.pages().free_pages(), free);
    }

    #[test]
    fn exit_switches_away_and_reclaims() {
        let mut k = testutil::kernel(8);
        let pid = testutil::spawn_user(&mut k, 0x9000);
        call(&mut k, Sysnum::Malloc as u32, [0; 3]);
        assert_eq!(k.pages().free_pages(), 5);

        call(&mut k, Sysnum::Exit as u32, [0; 3]);
        assert_eq!(k.current(), Pid::INIT);
        assert!(k.scheduler().tasks().get(pid).is_none());
        assert_eq!(k.pages().free_pages(), 8);
        assert!(k.trace().contains(&Trace::Exited { pid, pages: 2 }));
    }

    /// A typical first program: write, malloc, clone twice, exit, with the
    /// children getting a turn afterwards.
    #[test]
    fn demo_program() {
        let mut k = testutil::kernel(16);
        let parent = testutil::spawn_user(&mut k, 0x9000);

        let msg = b"User process\n\r";
        call(&mut k, 0, [msg.as_ptr() as usize, msg.len(), 0]);
        let stack = call(&mut k, 1, [0; 3]);
        let c1 = call(&mut k, 2, [0x7000, 1, stack + PAGE_SIZE]);
        let stack = call(&mut k, 1, [0; 3]);
        let c2 = call(&mut k, 2, [0x7000, 2, stack + PAGE_SIZE]);
        assert_eq!((c1, c2), (2, 3));

        call(&mut k, 3, [0; 3]);
        assert!(k.scheduler().tasks().get(parent).is_none());
        // The switch went to the first child: fresh slice, lowest pid.
        assert_eq!(k.current(), Pid(2));
        for pid in [Pid(2), Pid(3)] {
            assert_eq!(k.scheduler().task(pid).state(), TaskState::Running);
            assert_eq!(k.pages().owned_by(pid).len(), 1);
        }
        assert_eq!(testutil::take_console(), msg);
    }
}
