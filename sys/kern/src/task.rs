// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of tasks and their lifecycle.
//!
//! A task is a slot in the `TaskTable` plus, for everything but the boot
//! task, one page of RAM used as its kernel stack:
//!
//! ```text
//!   page.top() ->  +--------------------+
//!                  | TrapFrame          |  user registers
//!                  +--------------------+  <- initial kernel sp
//!                  | kernel stack       |
//!                  |        |           |
//!                  |        v           |
//!                  |                    |
//!                  +--------------------+
//!                  | TaskHeader         |  magic + pid
//!   page.base() -> +--------------------+
//! ```
//!
//! Because pages are aligned, the header (and with it the task) can be found
//! from any kernel stack pointer by masking off the low bits.

use core::mem::size_of;

use abi::{Pid, TaskFlags, PAGE_SIZE};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::arch::{self, TrapFrame};
use crate::config::TASK_CAPACITY;
use crate::err::KernelError;
use crate::kernel::Kernel;
use crate::mm::{Owner, PageAddr};
use crate::trace::Trace;

/// Value stored in `TaskHeader::magic` of every live task's page.
pub const TASK_MAGIC: u64 = 0x6b65_726e_7461_736b;

/// Stack space that must remain between the header and the trap frame.
const MIN_KERNEL_STACK: usize = 2048;

static_assertions::const_assert!(
    size_of::<TaskHeader>() + MIN_KERNEL_STACK + size_of::<TrapFrame>()
        <= PAGE_SIZE
);
static_assertions::const_assert!(TASK_CAPACITY <= u16::MAX as usize);

/// Identity record written at the base of a task's kernel page.
#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct TaskHeader {
    pub magic: u64,
    pub pid: u64,
}

/// Interface that must be implemented by the `arch::SavedState` type.
///
/// This is the callee-saved context of a task that is not running, as swapped
/// by `arch::switch_context`.
pub trait ArchState: Default {
    /// Kernel stack pointer the task will resume with.
    fn stack_pointer(&self) -> usize;

    /// Address the task will resume at.
    fn resume_pc(&self) -> usize;

    fn set_resume(&mut self, pc: usize, sp: usize);

    /// Records the function (and its argument) that the fork trampoline
    /// calls for a kernel task. An entry of zero means "go straight to user
    /// mode".
    fn set_kernel_entry(&mut self, entry: usize, arg: usize);

    fn kernel_entry(&self) -> (usize, usize);
}

/// Interface that must be implemented by the `arch::TrapFrame` type: the
/// user-mode register file, and the syscall calling convention on top of it.
pub trait UserFrame {
    /// Reads the syscall number.
    fn syscall_number(&self) -> u32;

    /// Reads syscall argument register 0.
    fn arg0(&self) -> usize;
    /// Reads syscall argument register 1.
    fn arg1(&self) -> usize;
    /// Reads syscall argument register 2.
    fn arg2(&self) -> usize;

    /// Reads the return register. This aliases argument 0.
    fn ret0(&self) -> usize;
    /// Writes the return register.
    fn set_ret0(&mut self, value: usize);

    fn user_stack_pointer(&self) -> usize;
    fn set_user_stack_pointer(&mut self, sp: usize);

    fn user_pc(&self) -> usize;
    /// Sets the user PC and makes the frame return to user mode.
    fn set_user_entry(&mut self, pc: usize);
}

/// Base scheduling weight of a task. Always positive.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct Priority(pub(crate) u8);

impl Priority {
    pub const fn new(p: u8) -> Option<Self> {
        if p == 0 {
            None
        } else {
            Some(Self(p))
        }
    }

    pub fn weight(self) -> i32 {
        i32::from(self.0)
    }
}

/// Lifecycle state of an occupied task slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskState {
    /// Eligible for selection. (Including when it is the one running.)
    Running,
    /// Has exited, and is waiting for its kernel page to be reclaimed by
    /// whichever task runs next.
    Zombie,
}

/// Return value for operations that can have scheduling implications. This is
/// marked `must_use` because forgetting to actually update the scheduler after
/// performing an operation that requires it would be Bad.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[must_use]
pub enum NextTask {
    /// It's fine to keep running whatever task we were just running.
    Same,
    /// The current task can't continue; the scheduler needs to pick another.
    Other,
}

/// Internal representation of a task.
#[repr(C)] // so location of SavedState is predictable
#[derive(Debug)]
pub struct Task {
    /// Saved machine state of the task while it is switched out.
    save: arch::SavedState,
    // NOTE: it is critical that the above field appear first!
    state: TaskState,
    /// Remaining share of the current epoch. Goes negative when charged past
    /// zero; aging brings it back.
    counter: i32,
    priority: Priority,
    /// While nonzero, the scheduler will not take the CPU away from this task.
    preempt_count: u32,
    flags: TaskFlags,
    /// `None` only for the boot task, which runs on the boot stack.
    kernel_page: Option<PageAddr>,
}

impl Task {
    /// Creates the boot task, which is already running when the kernel starts.
    pub(crate) fn boot(priority: Priority) -> Self {
        Self {
            save: arch::SavedState::default(),
            state: TaskState::Running,
            counter: 0,
            priority,
            preempt_count: 0,
            flags: TaskFlags::KTHREAD,
            kernel_page: None,
        }
    }

    /// Creates a task that has not yet run. It starts with a full slice and
    /// with preemption held until `schedule_tail` releases it.
    pub(crate) fn new(
        priority: Priority,
        kernel_page: PageAddr,
        flags: TaskFlags,
    ) -> Self {
        Self {
            save: arch::SavedState::default(),
            state: TaskState::Running,
            counter: priority.weight(),
            priority,
            preempt_count: 1,
            flags,
            kernel_page: Some(kernel_page),
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn is_runnable(&self) -> bool {
        self.state == TaskState::Running
    }

    pub fn counter(&self) -> i32 {
        self.counter
    }

    pub(crate) fn set_counter(&mut self, counter: i32) {
        self.counter = counter;
    }

    /// Charges the task for one timer tick.
    pub(crate) fn charge_tick(&mut self) {
        self.counter = self.counter.saturating_sub(1);
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    #[cfg(test)]
    pub(crate) fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    pub fn preempt_count(&self) -> u32 {
        self.preempt_count
    }

    pub(crate) fn preempt_disable(&mut self) {
        self.preempt_count += 1;
    }

    pub(crate) fn preempt_enable(&mut self) {
        uassert!(self.preempt_count > 0);
        self.preempt_count -= 1;
    }

    pub fn is_kernel_only(&self) -> bool {
        self.flags.contains(TaskFlags::KTHREAD)
    }

    pub fn kernel_page(&self) -> Option<PageAddr> {
        self.kernel_page
    }

    /// Returns a reference to the saved machine state for the task.
    pub fn save(&self) -> &arch::SavedState {
        &self.save
    }

    /// Returns a mutable reference to the saved machine state for the task.
    pub(crate) fn save_mut(&mut self) -> &mut arch::SavedState {
        &mut self.save
    }
}

impl kerncore::Schedulable for Task {
    fn is_runnable(&self) -> bool {
        Task::is_runnable(self)
    }

    fn counter(&self) -> i32 {
        self.counter
    }

    fn set_counter(&mut self, counter: i32) {
        self.counter = counter;
    }

    fn priority(&self) -> i32 {
        self.priority.weight()
    }
}

/// Fixed-capacity registry of tasks, indexed by `Pid`.
///
/// Slot 0 always holds the boot task.
pub struct TaskTable {
    slots: [Option<Task>; TASK_CAPACITY],
}

impl TaskTable {
    pub(crate) fn new(boot: Task) -> Self {
        let mut slots: [Option<Task>; TASK_CAPACITY] =
            core::array::from_fn(|_| None);
        slots[Pid::INIT.index()] = Some(boot);
        Self { slots }
    }

    pub fn get(&self, pid: Pid) -> Option<&Task> {
        self.slots.get(pid.index())?.as_ref()
    }

    pub(crate) fn get_mut(&mut self, pid: Pid) -> Option<&mut Task> {
        self.slots.get_mut(pid.index())?.as_mut()
    }

    /// Lowest-numbered empty slot.
    pub fn first_free(&self) -> Option<Pid> {
        self.slots
            .iter()
            .position(Option::is_none)
            .map(Pid::from_index)
    }

    /// Publishes a fully built task.
    pub(crate) fn insert(
        &mut self,
        pid: Pid,
        task: Task,
        _cs: critical_section::CriticalSection<'_>,
    ) {
        let slot = &mut self.slots[pid.index()];
        uassert!(slot.is_none());
        *slot = Some(task);
    }

    pub(crate) fn remove(
        &mut self,
        pid: Pid,
        _cs: critical_section::CriticalSection<'_>,
    ) -> Task {
        uassert!(pid != Pid::INIT);
        match self.slots[pid.index()].take() {
            Some(t) => t,
            None => panic!("removing empty task slot"),
        }
    }

    /// Number of occupied slots.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|t| t.is_some()).count()
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [Option<Task>] {
        &mut self.slots
    }
}

/// What a new task runs first.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Spawn {
    /// Call `entry(arg)` in the kernel. `entry` is the address of an
    /// `extern "C" fn(usize)`.
    Kernel { entry: usize, arg: usize },
    /// Duplicate the calling task's user context, with the return register
    /// zeroed and the user stack pointer set to `stack`.
    User { stack: usize },
}

/// Where the trap frame of the task owning `page` lives.
pub fn trap_frame_addr(page: PageAddr) -> usize {
    page.top() - size_of::<TrapFrame>()
}

impl Kernel<'_> {
    /// Creates a task, returning its pid.
    ///
    /// The page and the slot are both acquired, and the task fully built,
    /// before anything is published, so a failure leaves no trace other
    /// than a trace entry.
    pub fn create(&mut self, spawn: Spawn) -> Result<Pid, KernelError> {
        let parent = self.sched.current();
        self.sched.preempt_disable();
        let result =
            critical_section::with(|cs| self.create_locked(parent, spawn, cs));
        self.sched.preempt_enable();

        match result {
            Ok(pid) => ktrace!(self, Trace::Created { pid, parent }),
            Err(e) => ktrace!(self, Trace::CreateFailed(e)),
        }
        result
    }

    fn create_locked(
        &mut self,
        parent: Pid,
        spawn: Spawn,
        cs: critical_section::CriticalSection<'_>,
    ) -> Result<Pid, KernelError> {
        // Build the initial user frame first; a bad request shouldn't cost a
        // page even briefly.
        let (frame, flags) = match spawn {
            Spawn::Kernel { .. } => (TrapFrame::new_zeroed(), TaskFlags::KTHREAD),
            Spawn::User { stack } => {
                if stack == 0 {
                    return Err(KernelError::InvalidArgument);
                }
                let mut frame = self
                    .trap_frame(parent)
                    .filter(|_| !self.sched.task(parent).is_kernel_only())
                    .ok_or(KernelError::InvalidArgument)?
                    .clone();
                frame.set_ret0(0);
                frame.set_user_stack_pointer(stack);
                (frame, TaskFlags::empty())
            }
        };

        let page = self.pages.allocate(Owner::Kernel, cs)?;
        let Some(pid) = self.sched.tasks().first_free() else {
            self.pages.free(page, cs);
            return Err(KernelError::ResourceExhausted);
        };

        let mut task =
            Task::new(self.sched.task(parent).priority(), page, flags);
        if let Spawn::Kernel { entry, arg } = spawn {
            task.save_mut().set_kernel_entry(entry, arg);
        }
        task.save_mut()
            .set_resume(arch::fork_trampoline(), trap_frame_addr(page));

        // Safety: the page was just handed to us by the allocator, and every
        // page it manages is RAM reserved for the kernel (see `Kernel::new`).
        unsafe {
            let header = TaskHeader {
                magic: TASK_MAGIC,
                pid: pid.0.into(),
            };
            (page.base() as *mut TaskHeader).write(header);
            (trap_frame_addr(page) as *mut TrapFrame).write(frame);
        }

        self.sched.tasks_mut().insert(pid, task, cs);
        Ok(pid)
    }

    /// Terminates `pid`.
    ///
    /// User pages are released immediately. The task's kernel page can't be
    /// released while the task may still be running on it, so if `pid` is
    /// current this only marks it, and returns `NextTask::Other`; the caller
    /// must then reschedule, and the page is reclaimed by `reap` on the task
    /// that runs next.
    ///
    /// # Panics
    ///
    /// If `pid` is the boot task or doesn't name a running task.
    pub fn exit(&mut self, pid: Pid) -> NextTask {
        uassert!(pid != Pid::INIT);
        let Some(task) = self.sched.tasks_mut().get_mut(pid) else {
            panic!("exit of nonexistent task");
        };
        uassert!(task.state == TaskState::Running);

        let pages = critical_section::with(|cs| {
            task.state = TaskState::Zombie;
            self.pages.free_owned_by(pid, cs)
        });
        ktrace!(self, Trace::Exited { pid, pages });

        if pid == self.sched.current() {
            NextTask::Other
        } else {
            self.reap();
            NextTask::Same
        }
    }

    /// Releases the kernel page and slot of every zombie other than the
    /// current task.
    pub(crate) fn reap(&mut self) {
        let current = self.sched.current();
        for index in 0..TASK_CAPACITY {
            let pid = Pid::from_index(index);
            if pid == current {
                continue;
            }
            let is_zombie = self
                .sched
                .tasks()
                .get(pid)
                .is_some_and(|t| t.state == TaskState::Zombie);
            if !is_zombie {
                continue;
            }

            critical_section::with(|cs| {
                let task = self.sched.tasks_mut().remove(pid, cs);
                if let Some(page) = task.kernel_page {
                    // Safety: the page is still ours until freed just below,
                    // and nothing runs on it anymore. Scrub the header so a
                    // stale stack pointer can't resolve to the reused slot.
                    unsafe {
                        (page.base() as *mut TaskHeader).write_bytes(0, 1);
                    }
                    self.pages.free(page, cs);
                }
            });
            ktrace!(self, Trace::Reaped(pid));
            crate::profiling::event_task_reaped(index);
        }
    }

    /// Gives the current kernel task a user-mode context.
    ///
    /// Allocates a page for the user stack, builds a trap frame that starts
    /// executing at `pc` in user mode on that stack, and marks the task as no
    /// longer kernel-only. The switch to user mode happens when the task's
    /// kernel entry function returns to the fork trampoline.
    pub fn move_to_user_mode(&mut self, pc: usize) -> Result<(), KernelError> {
        let pid = self.sched.current();
        let task = self.sched.task(pid);
        let Some(kpage) = task.kernel_page() else {
            // The boot task has nowhere to keep a trap frame.
            return Err(KernelError::InvalidArgument);
        };
        if !task.is_kernel_only() {
            return Err(KernelError::InvalidArgument);
        }

        let stack = critical_section::with(|cs| {
            self.pages.allocate(Owner::Task(pid), cs)
        })?;

        let mut frame = TrapFrame::new_zeroed();
        frame.set_user_entry(pc);
        frame.set_user_stack_pointer(stack.top());
        // Safety: `kpage` is this task's kernel page, and the trap frame slot
        // at its top is not in use while the task runs in the kernel.
        unsafe {
            (trap_frame_addr(kpage) as *mut TrapFrame).write(frame);
        }
        self.sched.task_mut(pid).flags.remove(TaskFlags::KTHREAD);
        ktrace!(self, Trace::MovedToUser(pid));
        Ok(())
    }

    /// Called when a kernel task's entry function returns. Tasks that never
    /// moved to user mode have nothing to return to, so they exit.
    pub fn kernel_entry_returned(&mut self) -> NextTask {
        let pid = self.sched.current();
        if self.sched.task(pid).is_kernel_only() {
            self.exit(pid)
        } else {
            NextTask::Same
        }
    }

    /// Finds the task whose kernel stack contains `sp`.
    ///
    /// Returns `None` for addresses outside any task's kernel page, including
    /// the boot stack.
    pub fn pid_for_stack_pointer(&self, sp: usize) -> Option<Pid> {
        let page = PageAddr::containing(sp);
        if self.pages.owner(page) != Some(Owner::Kernel) {
            return None;
        }
        // Safety: allocated pages are RAM reserved for the kernel, and every
        // bit pattern is a valid TaskHeader.
        let bytes = unsafe {
            core::slice::from_raw_parts(
                page.base() as *const u8,
                size_of::<TaskHeader>(),
            )
        };
        let header = TaskHeader::read_from_bytes(bytes).ok()?;
        if header.magic != TASK_MAGIC {
            return None;
        }
        let pid = Pid(u16::try_from(header.pid).ok()?);
        let task = self.sched.tasks().get(pid)?;
        (task.kernel_page() == Some(page)).then_some(pid)
    }

    /// The user trap frame of `pid`, if it has a kernel page.
    pub fn trap_frame(&self, pid: Pid) -> Option<&TrapFrame> {
        let page = self.sched.tasks().get(pid)?.kernel_page()?;
        // Safety: the frame was initialized when the task was created and
        // the page stays allocated until the task is reaped.
        Some(unsafe { &*(trap_frame_addr(page) as *const TrapFrame) })
    }

    pub(crate) fn trap_frame_mut(&mut self, pid: Pid) -> Option<&mut TrapFrame> {
        let page = self.sched.tasks().get(pid)?.kernel_page()?;
        // Safety: as above, plus `&mut self` means no one else in the kernel
        // is looking at it.
        Some(unsafe { &mut *(trap_frame_addr(page) as *mut TrapFrame) })
    }
}
