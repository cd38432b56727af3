// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of kernel time, and of preemption on the timer tick.

use crate::arch;
use crate::config;
use crate::kernel::Kernel;
use crate::trace::Trace;

/// In-kernel timestamp representation.
///
/// This is measured in timer ticks since boot, each `TICK_INTERVAL` timer
/// cycles long.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub(crate) fn advance(&mut self, ticks: u64) {
        self.0 = self.0.wrapping_add(ticks);
    }
}

impl From<u64> for Timestamp {
    fn from(v: u64) -> Self {
        Timestamp(v)
    }
}

impl From<Timestamp> for u64 {
    fn from(v: Timestamp) -> Self {
        v.0
    }
}

impl Kernel<'_> {
    /// Handles a timer interrupt.
    ///
    /// `missed` is the number of earlier interrupts that were turned away
    /// because the kernel was busy; they count toward the timestamp but
    /// nobody is charged for them.
    pub fn timer_interrupt(&mut self, missed: u32) {
        crate::profiling::event_timer_isr_enter();
        (self.board.arm_next_tick)(config::TICK_INTERVAL);
        if missed > 0 {
            ktrace!(self, Trace::MissedTicks(missed));
        }
        self.now.advance(u64::from(missed) + 1);
        self.timer_tick();
        crate::profiling::event_timer_isr_exit();
    }

    /// Charges the current task for one tick, and takes the CPU away from it
    /// if it has used up its slice and isn't holding preemption.
    ///
    /// Selection runs with interrupts enabled, as it can take a while when
    /// counters need aging. They are masked again before the switch itself.
    pub fn timer_tick(&mut self) {
        let task = self.sched.current_task_mut();
        task.charge_tick();
        if task.counter() > 0 || task.preempt_count() > 0 {
            return;
        }
        task.set_counter(0);
        ktrace!(self, Trace::Preempted(self.sched.current()));

        arch::enable_irq();
        let next = self.pick_next();
        arch::disable_irq();
        self.finish_reschedule(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Priority, Spawn};
    use crate::testutil;
    use abi::Pid;

    #[test]
    fn tick_rearms_and_counts() {
        let mut k = testutil::kernel(4);
        let armed = testutil::armed_ticks();
        k.timer_interrupt(0);
        k.timer_interrupt(2);
        assert_eq!(testutil::armed_ticks(), armed + 2);
        assert_eq!(u64::from(k.now()), 4);
        assert!(k.trace().contains(&Trace::MissedTicks(2)));
    }

    #[test]
    fn tick_with_slice_left_keeps_running() {
        let mut k = testutil::kernel(4);
        let pid = k.create(Spawn::Kernel { entry: 1, arg: 0 }).unwrap();
        k.schedule();
        assert_eq!(k.current(), pid);
        k.sched.current_task_mut().set_counter(3);

        k.timer_tick();
        assert_eq!(k.current(), pid);
        assert_eq!(k.scheduler().task(pid).counter(), 2);
    }

    #[test]
    fn spent_slice_is_preempted() {
        let mut k = testutil::kernel(4);
        let pid = k.create(Spawn::Kernel { entry: 1, arg: 0 }).unwrap();
        // Boot task has counter 0: the first tick takes it below zero.
        k.timer_tick();
        assert_eq!(k.current(), pid);
        assert_eq!(k.scheduler().task(Pid::INIT).counter(), 0);
        assert!(k.trace().contains(&Trace::Preempted(Pid::INIT)));
        // Interrupts are masked again on the way out.
        assert!(!arch::irqs_enabled());
    }

    #[test]
    fn switch_runs_with_irqs_masked() {
        use arch::ArchEvent::{IrqOff, IrqOn, Switch};

        let mut k = testutil::kernel(4);
        let pid = k.create(Spawn::Kernel { entry: 1, arg: 0 }).unwrap();
        // Both counters spent, so selection has to age them first; the
        // higher priority makes sure it's a real switch afterwards.
        k.sched.task_mut(pid).set_counter(0);
        k.sched.task_mut(pid).set_priority(Priority(2));
        arch::take_events();

        k.timer_tick();
        assert_eq!(k.current(), pid);
        assert!(k.trace().contains(&Trace::Aging { passes: 1 }));
        // Unmasked for selection only; masked again before the switch.
        assert_eq!(arch::take_events(), [IrqOn, IrqOff, Switch]);
    }

    #[test]
    fn preempt_hold_defers_switch() {
        let mut k = testutil::kernel(4);
        k.create(Spawn::Kernel { entry: 1, arg: 0 }).unwrap();
        k.preempt_disable();
        k.timer_tick();
        k.timer_tick();
        assert_eq!(k.current(), Pid::INIT);
        // Charged regardless.
        assert_eq!(k.scheduler().task(Pid::INIT).counter(), -2);

        k.preempt_enable();
        k.timer_tick();
        assert_ne!(k.current(), Pid::INIT);
    }
}
