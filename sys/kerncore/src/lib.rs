// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Allow std-y things to be used in test. Note that this attribute is a bit of a
// trap for the programmer, because rust-analyzer by default seems to build
// things with test set. This means it's easy to introduce code incompatible
// with no_std without your editor hassling you about it. Beware.
#![cfg_attr(not(test), no_std)]
#![forbid(clippy::wildcard_imports)]

//! Portable pieces of the kernel's scheduling policy.
//!
//! Nothing in here touches hardware or kernel-global state, so it can be
//! tested exhaustively on the host.

/// Describes types that the scheduler can choose between.
///
/// The kernel's task control block implements this; tests use a tiny struct.
pub trait Schedulable {
    /// Whether this entry may be picked at all. Entries that are not runnable
    /// still take part in aging.
    fn is_runnable(&self) -> bool;

    /// Remaining share of the current epoch.
    fn counter(&self) -> i32;

    fn set_counter(&mut self, counter: i32);

    /// Base weight added on every aging pass. This must be positive, or
    /// `select` may never find a candidate.
    fn priority(&self) -> i32;
}

/// Outcome of `select`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Selection {
    /// Slot index of the chosen entry.
    pub index: usize,
    /// Number of times every counter was aged before a candidate emerged.
    pub aging_passes: u32,
}

/// Finds the runnable entry with the strictly greatest counter.
///
/// Ties go to the lowest index. Returns the index and its counter, or `None`
/// if nothing is runnable.
pub fn best_candidate<T: Schedulable>(
    slots: &[Option<T>],
) -> Option<(usize, i32)> {
    let mut best: Option<(usize, i32)> = None;
    for (i, slot) in slots.iter().enumerate() {
        let Some(t) = slot else { continue };
        if !t.is_runnable() {
            continue;
        }
        let c = t.counter();
        // Strictly greater, so that the first of several equal counters is
        // the one that sticks.
        if best.map_or(true, |(_, bc)| c > bc) {
            best = Some((i, c));
        }
    }
    best
}

/// Ages every occupied slot: `counter = counter / 2 + priority`.
///
/// Division truncates toward zero. Applied repeatedly, a counter converges
/// toward `2 * priority`, so tasks that have been waiting catch up to tasks
/// that just ran.
pub fn age<T: Schedulable>(slots: &mut [Option<T>]) {
    for t in slots.iter_mut().flatten() {
        let aged = (t.counter() / 2).saturating_add(t.priority());
        t.set_counter(aged);
    }
}

/// Picks the next entry to run.
///
/// Scans for the runnable entry with the greatest counter. If that counter is
/// positive, it wins. Otherwise every entry is aged and the scan repeats. The
/// loop terminates after a bounded number of passes as long as every
/// priority is positive and at least one entry is runnable.
///
/// Returns `None` only if no entry is runnable.
pub fn select<T: Schedulable>(slots: &mut [Option<T>]) -> Option<Selection> {
    let mut aging_passes = 0;
    loop {
        let (index, counter) = best_candidate(slots)?;
        if counter > 0 {
            return Some(Selection {
                index,
                aging_passes,
            });
        }
        age(slots);
        aging_passes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Clone, Debug)]
    struct T {
        runnable: bool,
        counter: i32,
        priority: i32,
    }

    impl Schedulable for T {
        fn is_runnable(&self) -> bool {
            self.runnable
        }
        fn counter(&self) -> i32 {
            self.counter
        }
        fn set_counter(&mut self, counter: i32) {
            self.counter = counter;
        }
        fn priority(&self) -> i32 {
            self.priority
        }
    }

    fn running(counter: i32, priority: i32) -> Option<T> {
        Some(T {
            runnable: true,
            counter,
            priority,
        })
    }

    fn counters(slots: &[Option<T>]) -> Vec<Option<i32>> {
        slots.iter().map(|s| s.as_ref().map(|t| t.counter)).collect()
    }

    #[test]
    fn aging_pass_favors_high_priority() {
        let mut slots = vec![running(0, 1), running(0, 1), running(0, 5)];

        let sel = select(&mut slots).unwrap();
        assert_eq!(sel.index, 2);
        assert_eq!(sel.aging_passes, 1);
        assert_eq!(counters(&slots), [Some(1), Some(1), Some(5)]);

        // Charge the winner for a tick. It is still the largest, so it runs
        // again without any aging.
        slots[2].as_mut().unwrap().counter -= 1;
        let sel = select(&mut slots).unwrap();
        assert_eq!(sel.index, 2);
        assert_eq!(sel.aging_passes, 0);
    }

    #[test]
    fn ties_go_to_lowest_index() {
        let mut slots = vec![None, running(3, 1), running(3, 1), running(2, 9)];
        assert_eq!(
            select(&mut slots),
            Some(Selection {
                index: 1,
                aging_passes: 0
            })
        );
    }

    #[test]
    fn non_runnable_entries_age_but_never_win() {
        let mut slots = vec![
            running(0, 1),
            Some(T {
                runnable: false,
                counter: 100,
                priority: 4,
            }),
        ];
        let sel = select(&mut slots).unwrap();
        assert_eq!(sel.index, 0);
        assert_eq!(sel.aging_passes, 1);
        // The sleeper aged along with everyone else.
        assert_eq!(slots[1].as_ref().unwrap().counter, 54);
    }

    #[test]
    fn nothing_runnable_gives_none() {
        let mut slots: Vec<Option<T>> = vec![None, None];
        assert_eq!(select(&mut slots), None);
    }

    #[test]
    fn negative_counters_recover() {
        let mut slots = vec![running(-7, 2)];
        let sel = select(&mut slots).unwrap();
        // -7/2 = -3 (truncating), +2 = -1; then -1/2 = 0, +2 = 2.
        assert_eq!(sel.aging_passes, 2);
        assert_eq!(counters(&slots), [Some(2)]);
    }

    fn arb_slots() -> impl Strategy<Value = Vec<Option<T>>> {
        proptest::collection::vec(
            proptest::option::of((any::<bool>(), -4i32..20, 1i32..8).prop_map(
                |(runnable, counter, priority)| T {
                    runnable,
                    counter,
                    priority,
                },
            )),
            1..16,
        )
    }

    proptest! {
        #[test]
        fn select_is_deterministic(slots in arb_slots()) {
            let mut a = slots.clone();
            let mut b = slots;
            prop_assert_eq!(select(&mut a), select(&mut b));
            prop_assert_eq!(counters(&a), counters(&b));
        }

        #[test]
        fn selection_is_runnable_and_maximal(slots in arb_slots()) {
            let mut slots = slots;
            let any_runnable = slots.iter().flatten().any(|t| t.runnable);
            match select(&mut slots) {
                None => prop_assert!(!any_runnable),
                Some(sel) => {
                    let chosen = slots[sel.index].as_ref().unwrap();
                    prop_assert!(chosen.runnable);
                    prop_assert!(chosen.counter > 0);
                    for (i, t) in slots.iter().enumerate() {
                        let Some(t) = t else { continue };
                        if !t.runnable {
                            continue;
                        }
                        if i < sel.index {
                            prop_assert!(t.counter < chosen.counter);
                        } else {
                            prop_assert!(t.counter <= chosen.counter);
                        }
                    }
                }
            }
        }

        /// Simulates the kernel loop: select, run for a full slice, repeat.
        /// Every runnable entry must get picked within a bounded number of
        /// rounds.
        #[test]
        fn every_runnable_entry_gets_a_turn(slots in arb_slots()) {
            let mut slots = slots;
            let runnable: Vec<usize> = slots
                .iter()
                .enumerate()
                .filter(|(_, t)| t.as_ref().is_some_and(|t| t.runnable))
                .map(|(i, _)| i)
                .collect();
            let mut seen = vec![false; slots.len()];
            // Counters converge to at most 2 * max priority, so a generous
            // bound of rounds is enough for everyone.
            for _ in 0..slots.len() * 64 {
                let Some(sel) = select(&mut slots) else { break };
                seen[sel.index] = true;
                slots[sel.index].as_mut().unwrap().counter = 0;
            }
            for i in runnable {
                prop_assert!(seen[i], "slot {} never selected", i);
            }
        }
    }
}
