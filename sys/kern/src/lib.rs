// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A small preemptible kernel for single-core AArch64.
//!
//! The kernel hands out 4 KiB pages from one contiguous region, keeps a fixed
//! table of tasks, and multiplexes the CPU between them with a
//! priority-weighted round robin that is driven by a periodic timer. Tasks
//! talk to it through four syscalls: `write`, `malloc`, `clone` and `exit`.
//!
//! The code outside of `arch` and `startup` doesn't touch hardware. On any
//! target other than bare-metal AArch64, `arch` is a host stand-in, and that
//! is how the test suite runs.
//!
//! # Design principles
//!
//! 1. Static configuration. Memory bounds, table size and tick rate are fixed
//!    at build time (see `config`).
//! 2. No heap in the kernel itself. Everything it owns is in fixed-size
//!    tables; the pages it hands out are the only dynamic memory.
//! 3. A strong preference for safe code where reasonable, and for simple and
//!    clear algorithms over fast and clever ones.

#![cfg_attr(target_os = "none", no_std)]

#[macro_use]
pub mod arch;
#[macro_use]
pub mod trace;

pub mod board;
pub mod config;
pub mod err;
pub mod fail;
pub mod kernel;
pub mod mm;
pub mod profiling;
pub mod sched;
pub mod startup;
pub mod syscalls;
pub mod task;
pub mod time;
pub mod umem;
pub mod util;

#[cfg(test)]
mod testutil;
