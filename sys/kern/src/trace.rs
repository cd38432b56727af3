// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel event trace.
//!
//! The kernel has no console of its own to log to. Instead, interesting
//! events are recorded into a small ring buffer inside the kernel state,
//! where a debugger can find them. Each entry records the source line that
//! produced it; an event identical to the previous one (same line, same
//! payload) just bumps that entry's count, so a busy loop doesn't wipe out
//! history.
//!
//! Record an event with `ktrace!(kernel, Trace::Whatever)`.

use abi::Pid;

use crate::err::KernelError;

/// Number of entries in the kernel's trace ring.
pub const TRACE_DEPTH: usize = 64;

macro_rules! ktrace {
    ($kernel:expr, $payload:expr) => {
        $kernel.trace.entry(line!() as u16, $payload)
    };
}

/// Things worth recording.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trace {
    None,
    Created { pid: Pid, parent: Pid },
    CreateFailed(KernelError),
    MovedToUser(Pid),
    /// Exit of `pid`, which gave back `pages` user pages on the way.
    Exited { pid: Pid, pages: usize },
    Reaped(Pid),
    Yield(Pid),
    Preempted(Pid),
    /// Counters were aged this many times before a task could be chosen.
    Aging { passes: u32 },
    Switch { from: Pid, to: Pid },
    Syscall { pid: Pid, nr: u32 },
    SyscallFailed { pid: Pid, err: KernelError },
    /// Timer interrupts that arrived while the kernel was busy.
    MissedTicks(u32),
}

#[derive(Copy, Clone, Debug)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    /// Incremented each time the slot is overwritten.
    pub generation: u16,
    /// Number of consecutive identical events this entry stands for. Zero
    /// for slots that were never written.
    pub count: u32,
    pub payload: T,
}

/// A ring buffer of `N` entries of `T`.
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    last: Option<usize>,
    buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    pub const fn new(init: T) -> Self {
        Self {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    pub fn entry(&mut self, line: u16, payload: T) {
        // Treat "never written" as an out-of-range index, so the first entry
        // lands in slot 0 and is never merged with anything.
        let last = self.last.unwrap_or(usize::MAX);

        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                // Only reuse this entry if we don't overflow the count.
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        // usize::MAX wraps to 0 here, which is where we want to start.
        let ndx = {
            let next = last.wrapping_add(1);
            if next >= self.buffer.len() {
                0
            } else {
                next
            }
        };

        let Some(ent) = self.buffer.get_mut(ndx) else {
            // Only possible for N == 0.
            return;
        };
        *ent = RingbufEntry {
            line,
            generation: ent.generation.wrapping_add(1),
            count: 1,
            payload,
        };
        self.last = Some(ndx);
    }

    /// Entries that have been written, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = self.last.map_or(0, |l| l + 1).min(N);
        let (newer, older) = self.buffer.split_at(start);
        older.iter().chain(newer.iter()).filter(|e| e.count > 0)
    }

    /// The most recent entry, if any.
    pub fn latest(&self) -> Option<&RingbufEntry<T>> {
        self.buffer.get(self.last?)
    }

    /// Checks whether `payload` is anywhere in the buffer.
    pub fn contains(&self, payload: &T) -> bool {
        self.iter().any(|e| e.payload == *payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_coalesce() {
        let mut rb: Ringbuf<u8, 4> = Ringbuf::new(0);
        rb.entry(10, 1);
        rb.entry(10, 1);
        rb.entry(10, 1);
        // Same payload, different line: separate entry.
        rb.entry(11, 1);

        let entries: Vec<_> = rb.iter().map(|e| (e.line, e.count)).collect();
        assert_eq!(entries, [(10, 3), (11, 1)]);
    }

    #[test]
    fn wraps_oldest_first() {
        let mut rb: Ringbuf<u8, 3> = Ringbuf::new(0);
        for p in 1..=5 {
            rb.entry(1, p);
        }
        let payloads: Vec<u8> = rb.iter().map(|e| e.payload).collect();
        assert_eq!(payloads, [3, 4, 5]);
        assert_eq!(rb.latest().map(|e| e.payload), Some(5));
        // Slot 0 has been written twice.
        assert_eq!(rb.iter().find(|e| e.payload == 4).unwrap().generation, 2);
        assert!(!rb.contains(&1));
    }

    #[test]
    fn empty() {
        let rb: Ringbuf<u8, 3> = Ringbuf::new(0);
        assert_eq!(rb.iter().count(), 0);
        assert!(rb.latest().is_none());
    }
}
