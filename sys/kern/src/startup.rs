// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup, and the entry points the assembly and vectors call into.
//!
//! # The kernel guard
//!
//! `KERNEL_IN_USE` is an ad-hoc mutex around the one `Kernel`. Kernel code
//! takes it with `with_kernel`, or `try_with_kernel` from interrupt context.
//!
//! A context switch happens inside some task's `with_kernel` call, so the
//! guard is held across it. The task switched to inherits the guard: either
//! it was itself switched out inside `with_kernel` and will release it on the
//! way out, or it is new and `kern_schedule_tail` releases it.

use core::mem::MaybeUninit;
use core::ptr::addr_of_mut;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};

use crate::arch::{self, TrapFrame};
use crate::board::Board;
use crate::config;
use crate::kernel::Kernel;
use crate::mm::{PageAllocator, PageState};
use crate::task::{NextTask, Spawn};

/// Set while a `&mut Kernel` is live.
///
/// Notice that this begins life initialized to `true`. This prevents use of
/// `with_kernel` et al before the kernel is properly started. We set it to
/// `false` in `start_kernel` once `KERNEL` is written.
static KERNEL_IN_USE: AtomicBool = AtomicBool::new(true);

static mut KERNEL: MaybeUninit<Kernel<'static>> = MaybeUninit::uninit();

static mut PAGE_MAP: [PageState; config::PAGE_COUNT] =
    [PageState::Free; config::PAGE_COUNT];

/// Copy of the board reference, for the timer path that can't get at the
/// kernel.
static BOARD: AtomicPtr<Board> = AtomicPtr::new(core::ptr::null_mut());

/// Timer interrupts that arrived while the kernel was busy.
static DEFERRED_TICKS: AtomicU32 = AtomicU32::new(0);

/// The main kernel entry point.
///
/// The board provides its own `main`-equivalent, which sets up the console,
/// the timer and the exception vectors, and then calls this. The calling
/// context becomes the boot task, which idles whenever nothing else is
/// runnable. `first` runs as a kernel task; it is expected to call
/// `move_to_user_mode` and return into the user program.
///
/// # Safety
///
/// Must be called once, at EL1 with interrupts masked, on a stack outside the
/// configured page region. The region must be RAM that nothing else uses.
pub unsafe fn start_kernel(
    board: &'static Board,
    first: extern "C" fn(usize),
    arg: usize,
) -> ! {
    BOARD.store(board as *const Board as *mut Board, Ordering::Relaxed);

    // Safety: this function runs once per boot, so these are the only
    // references to either static until the guard is released below.
    unsafe {
        let map = &mut *addr_of_mut!(PAGE_MAP);
        let pages = PageAllocator::new(config::LOW_MEMORY, map);
        (*addr_of_mut!(KERNEL)).write(Kernel::new(board, pages));
    }
    KERNEL_IN_USE.store(false, Ordering::Release);

    let created = with_kernel(|k| {
        k.create(Spawn::Kernel {
            entry: first as usize,
            arg,
        })
    });
    if let Err(e) = created {
        crate::fail::die(format_args!("can't create first task: {e:?}"));
    }

    (board.arm_next_tick)(config::TICK_INTERVAL);
    arch::enable_irq();
    loop {
        with_kernel(|k| k.idle());
    }
}

/// Runs `body` with a reference to the kernel.
///
/// To preserve uniqueness of the `&mut` reference passed into `body`, this
/// function will detect any attempts to call it recursively and panic.
pub(crate) fn with_kernel<R>(body: impl FnOnce(&mut Kernel<'static>) -> R) -> R {
    let Some(r) = try_with_kernel(body) else {
        panic!("recursive use of with_kernel");
    };
    r
}

/// Runs `body` with a reference to the kernel, unless someone else has it,
/// in which case this returns `None` without running `body`.
pub(crate) fn try_with_kernel<R>(
    body: impl FnOnce(&mut Kernel<'static>) -> R,
) -> Option<R> {
    if KERNEL_IN_USE.swap(true, Ordering::Acquire) {
        return None;
    }
    // Safety: we have observed `KERNEL_IN_USE` being false, which means the
    // kernel is initialized (at reset the flag starts out true) and nobody
    // else holds a reference to it.
    let k = unsafe { (*addr_of_mut!(KERNEL)).assume_init_mut() };
    let r = body(k);
    KERNEL_IN_USE.store(false, Ordering::Release);
    Some(r)
}

fn board() -> Option<&'static Board> {
    // Safety: only ever written from a `&'static Board`.
    unsafe { BOARD.load(Ordering::Relaxed).as_ref() }
}

/// Called by the synchronous exception vector for an `svc` from EL0, with the
/// trap frame it just pushed.
#[no_mangle]
pub extern "C" fn kern_svc_entry(frame: *mut TrapFrame) {
    with_kernel(|k| {
        // The vector saved onto the current task's kernel stack, or we are
        // badly confused about who is running.
        uassert_eq!(k.pid_for_stack_pointer(frame as usize), Some(k.current()));
        k.handle_syscall();
    })
}

/// Called by the IRQ vector when the timer fires.
#[no_mangle]
pub extern "C" fn kern_timer_irq() {
    let missed = DEFERRED_TICKS.swap(0, Ordering::Relaxed);
    if try_with_kernel(|k| k.timer_interrupt(missed)).is_none() {
        // Interrupted the kernel mid-operation. Count the tick for the next
        // one that gets in, and keep the timer going.
        DEFERRED_TICKS.fetch_add(missed + 1, Ordering::Relaxed);
        if let Some(board) = board() {
            (board.arm_next_tick)(config::TICK_INTERVAL);
        }
    }
}

/// First call made by a new task, from the fork trampoline.
#[no_mangle]
extern "C" fn kern_schedule_tail() {
    uassert!(KERNEL_IN_USE.load(Ordering::Relaxed));
    // Safety: the guard is held on our behalf by the task that switched to
    // us, and that task is parked in `switch_context` until we let go.
    let k = unsafe { (*addr_of_mut!(KERNEL)).assume_init_mut() };
    k.schedule_tail();
    KERNEL_IN_USE.store(false, Ordering::Release);
    arch::enable_irq();
}

/// Called by the fork trampoline when a kernel task's entry function
/// returns. If the task moved to user mode, this returns and the trampoline
/// drops to EL0.
#[no_mangle]
extern "C" fn kern_kthread_return() {
    with_kernel(|k| match k.kernel_entry_returned() {
        NextTask::Same => (),
        NextTask::Other => {
            arch::disable_irq();
            k.reschedule();
        }
    })
}
