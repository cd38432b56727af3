// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scheduling.
//!
//! The policy is priority-weighted round robin with aging: the runnable task
//! with the largest remaining `counter` runs; when nobody has anything left,
//! every counter becomes `counter / 2 + priority` and we look again. See
//! `kerncore::select`.
//!
//! # Preemption holds
//!
//! Each task has a `preempt_count`. While it is nonzero, ticks don't take the
//! CPU away from the task and voluntary `schedule` calls do nothing. The
//! rescheduling path itself holds the outgoing task's count across the
//! switch, and drops it on whichever task is current once control comes back.
//! A new task starts with a count of one, standing in for the hold it would
//! have taken had it been switched out normally; `schedule_tail` drops it.

use abi::Pid;

use crate::arch;
use crate::kernel::Kernel;
use crate::task::{Task, TaskTable};
use crate::trace::Trace;
use crate::util::index2_distinct;

/// The task table, and which of its tasks is running.
pub struct Scheduler {
    tasks: TaskTable,
    current: Pid,
}

impl Scheduler {
    /// Starts out running the boot task in slot 0.
    pub(crate) fn new(tasks: TaskTable) -> Self {
        uassert!(tasks.get(Pid::INIT).is_some());
        Self {
            tasks,
            current: Pid::INIT,
        }
    }

    pub fn current(&self) -> Pid {
        self.current
    }

    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    pub(crate) fn tasks_mut(&mut self) -> &mut TaskTable {
        &mut self.tasks
    }

    /// Looks up a task that the caller knows exists.
    pub fn task(&self, pid: Pid) -> &Task {
        match self.tasks.get(pid) {
            Some(t) => t,
            None => panic!("no task {}", pid.0),
        }
    }

    pub(crate) fn task_mut(&mut self, pid: Pid) -> &mut Task {
        match self.tasks.get_mut(pid) {
            Some(t) => t,
            None => panic!("no task {}", pid.0),
        }
    }

    pub fn current_task(&self) -> &Task {
        self.task(self.current)
    }

    pub(crate) fn current_task_mut(&mut self) -> &mut Task {
        self.task_mut(self.current)
    }

    pub fn preempt_disable(&mut self) {
        self.current_task_mut().preempt_disable();
    }

    pub fn preempt_enable(&mut self) {
        self.current_task_mut().preempt_enable();
    }

    /// Chooses the next task, aging counters as needed. Returns the choice and
    /// the number of aging passes it took.
    ///
    /// The boot task never exits, so there is always something to run.
    pub(crate) fn select(&mut self) -> (Pid, u32) {
        match kerncore::select(self.tasks.slots_mut()) {
            Some(s) => (Pid::from_index(s.index), s.aging_passes),
            None => panic!("no runnable task"),
        }
    }

    /// Makes `next` the current task and switches the CPU over to it.
    ///
    /// `current` is updated before the switch, so that anything running on
    /// the new task's stack (including interrupts) sees the right answer.
    /// On hardware this returns only when the outgoing task is resumed.
    pub(crate) fn switch_to(&mut self, next: Pid) {
        let prev = self.current;
        if next == prev {
            return;
        }
        self.current = next;

        let (prev_slot, next_slot) =
            index2_distinct(self.tasks.slots_mut(), prev.index(), next.index());
        let (Some(prev_task), Some(next_task)) = (prev_slot, next_slot) else {
            panic!("switch involving empty slot");
        };
        // Safety: `prev_task` is the task whose context is on the CPU right
        // now, and `next_task` was either switched out through this same
        // path or prepared by `create` to enter the fork trampoline.
        unsafe {
            arch::switch_context(prev_task.save_mut(), next_task.save());
        }
    }
}

impl Kernel<'_> {
    /// Voluntarily gives up the CPU.
    ///
    /// Does nothing if the current task holds preemption. Otherwise the task
    /// forfeits the rest of its slice and the scheduler picks again, which may
    /// well pick the same task.
    pub fn schedule(&mut self) {
        let task = self.sched.current_task_mut();
        if task.preempt_count() > 0 {
            return;
        }
        task.set_counter(0);
        ktrace!(self, Trace::Yield(self.sched.current()));
        self.reschedule();
    }

    /// Selects a task and switches to it, without checking whether the
    /// current task is willing.
    ///
    /// On hardware, if a switch happens, the code after it runs much later,
    /// as the outgoing task once more; or, if the outgoing task has exited,
    /// never. Either way it runs as whatever task is then current.
    pub(crate) fn reschedule(&mut self) {
        let next = self.pick_next();
        self.finish_reschedule(next);
    }

    /// First half of `reschedule`: takes the outgoing task's preemption hold
    /// and chooses who runs next. Touches no machine state, so interrupts
    /// may be enabled.
    pub(crate) fn pick_next(&mut self) -> Pid {
        self.sched.preempt_disable();
        let (next, passes) = self.sched.select();
        if passes > 0 {
            ktrace!(self, Trace::Aging { passes });
        }
        next
    }

    /// Second half of `reschedule`: switches to `next`, then drops the hold
    /// on whichever task is current and reaps. Interrupts must be masked.
    pub(crate) fn finish_reschedule(&mut self, next: Pid) {
        let prev = self.sched.current();
        if next != prev {
            ktrace!(self, Trace::Switch { from: prev, to: next });
            crate::profiling::event_context_switch(next.index());
            self.sched.switch_to(next);
        }

        self.sched.preempt_enable();
        self.reap();
    }

    /// One pass of the boot task's idle loop: yields, and comes back with
    /// interrupts enabled.
    ///
    /// The interrupt mask isn't part of a task's saved state, so the boot
    /// task may be resumed from a path that left it masked.
    pub fn idle(&mut self) {
        arch::disable_irq();
        self.schedule();
        arch::enable_irq();
    }

    /// First thing a new task does, from the fork trampoline: drop the
    /// preemption hold it was created with and finish off whoever switched
    /// to it, if that was an exiting task.
    pub fn schedule_tail(&mut self) {
        self.sched.preempt_enable();
        self.reap();
    }

    pub fn preempt_disable(&mut self) {
        self.sched.preempt_disable();
    }

    pub fn preempt_enable(&mut self) {
        self.sched.preempt_enable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Priority, Spawn};
    use crate::testutil;

    fn kernel_task(k: &mut Kernel<'_>) -> Pid {
        k.create(Spawn::Kernel { entry: 1, arg: 0 }).unwrap()
    }

    #[test]
    fn yield_to_new_task() {
        let mut k = testutil::kernel(8);
        let pid = kernel_task(&mut k);
        let switches = arch::switch_count();

        k.schedule();
        assert_eq!(k.current(), pid);
        assert_eq!(arch::switch_count(), switches + 1);
        // Creation hold released on the new task; the boot task is parked
        // with the hold it took on the way out.
        assert_eq!(k.scheduler().task(pid).preempt_count(), 0);
        assert_eq!(k.scheduler().task(Pid::INIT).preempt_count(), 1);
        assert_eq!(
            k.trace().latest().map(|e| e.payload),
            Some(Trace::Switch {
                from: Pid::INIT,
                to: pid
            })
        );
    }

    #[test]
    fn no_switch_when_selected_is_current() {
        let mut k = testutil::kernel(8);
        let switches = arch::switch_count();
        // Only the boot task exists; it gets aged and picked again.
        k.schedule();
        assert_eq!(k.current(), Pid::INIT);
        assert_eq!(arch::switch_count(), switches);
        assert!(k.trace().contains(&Trace::Aging { passes: 1 }));
        assert_eq!(k.scheduler().task(Pid::INIT).preempt_count(), 0);
    }

    #[test]
    fn schedule_respects_preempt_hold() {
        let mut k = testutil::kernel(8);
        let pid = kernel_task(&mut k);
        k.preempt_disable();
        k.schedule();
        assert_eq!(k.current(), Pid::INIT);
        k.preempt_enable();
        k.schedule();
        assert_eq!(k.current(), pid);
    }

    #[test]
    #[should_panic]
    fn preempt_underflow_halts() {
        let mut k = testutil::kernel(8);
        k.preempt_enable();
    }

    #[test]
    fn schedule_tail_releases_creation_hold() {
        let mut k = testutil::kernel(8);
        let pid = kernel_task(&mut k);
        // Pretend we came in through the trampoline rather than `reschedule`.
        k.sched.current = pid;
        assert_eq!(k.scheduler().current_task().preempt_count(), 1);
        k.schedule_tail();
        assert_eq!(k.scheduler().current_task().preempt_count(), 0);
    }

    #[test]
    fn idle_switches_masked_and_returns_unmasked() {
        use arch::ArchEvent::{IrqOff, IrqOn, Switch};

        let mut k = testutil::kernel(8);
        let pid = kernel_task(&mut k);
        arch::take_events();

        k.idle();
        assert_eq!(k.current(), pid);
        assert_eq!(arch::take_events(), [IrqOff, Switch, IrqOn]);
        assert!(arch::irqs_enabled());
    }

    #[test]
    fn idle_unmasks_when_alone() {
        let mut k = testutil::kernel(8);
        arch::disable_irq();
        k.idle();
        assert_eq!(k.current(), Pid::INIT);
        assert!(arch::irqs_enabled());
    }

    #[test]
    fn weighted_round_robin() {
        let mut k = testutil::kernel(8);
        let a = kernel_task(&mut k);
        let b = kernel_task(&mut k);
        let c = kernel_task(&mut k);
        k.sched.task_mut(c).set_priority(Priority(5));
        for pid in [Pid::INIT, a, b, c] {
            k.sched.task_mut(pid).set_counter(0);
        }
        // [1, 1, 1, 5] all at zero: one aging pass, highest priority wins.
        k.reschedule();
        assert_eq!(k.current(), c);
        assert!(k.trace().contains(&Trace::Aging { passes: 1 }));

        // Run c down tick by tick; it keeps the CPU while it's ahead.
        for _ in 0..4 {
            k.timer_tick();
            assert_eq!(k.current(), c);
        }
        // Its slice is spent; the tick preempts it, and the lowest-numbered
        // of the tasks that still have a share goes next.
        k.timer_tick();
        assert_eq!(k.scheduler().task(c).counter(), 0);
        assert_eq!(k.current(), Pid::INIT);
    }
}
