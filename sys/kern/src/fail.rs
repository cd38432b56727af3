// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Support for recording kernel crashes/failures such that they can be found by
//! tooling.
//!
//! This module defines the following binary interface to debuggers:
//!
//! - `kern::fail::KERNEL_HAS_FAILED` is a `bool`. It is false at boot, and set
//!   to true if the kernel reaches the `die` function (either explicitly or as
//!   a result of a `panic!`).
//!
//! - `kern::fail::KERNEL_EPITAPH` is an array of `u8`. The `die` routine writes
//!   as much of the failure reason into this buffer (as UTF-8) as fits. For
//!   printing, trim off any trailing NUL bytes.
//!
//! After recording, the kernel masks interrupts and spins. There is no
//! recovery.

use core::fmt::{Display, Write};
use core::sync::atomic::Ordering;

/// Flag that gets set to `true` by all failure reporting functions, giving
/// tools a one-stop-shop for doing kernel triage.
#[used]
static mut KERNEL_HAS_FAILED: bool = false;

const EPITAPH_LEN: usize = 128;

/// Up to `EPITAPH_LEN` bytes describing why the kernel failed, padded with
/// NULs.
#[used]
static mut KERNEL_EPITAPH: [u8; EPITAPH_LEN] = [0; EPITAPH_LEN];

fn begin_epitaph() -> &'static mut [u8; EPITAPH_LEN] {
    // Safety: single core, and the first thing `die` does (below) is mask
    // interrupts, so nothing else can be in here at the same time.
    let previous_fail = unsafe {
        core::ptr::replace(core::ptr::addr_of_mut!(KERNEL_HAS_FAILED), true)
    };
    if previous_fail {
        // Failed while failing. Writing more would only make it worse.
        halt();
    }

    // Safety: only one execution of this function gets past the flag.
    unsafe { &mut *core::ptr::addr_of_mut!(KERNEL_EPITAPH) }
}

fn halt() -> ! {
    loop {
        // Platform-independent NOP
        core::sync::atomic::fence(Ordering::SeqCst);
    }
}

#[inline(always)]
pub fn die(msg: impl Display) -> ! {
    die_impl(&msg)
}

#[inline(never)]
fn die_impl(msg: &dyn Display) -> ! {
    crate::arch::disable_irq();
    let buf = begin_epitaph();
    let mut writer = Epitaph { dest: buf };
    write!(writer, "{msg}").ok();
    halt()
}

/// Writes into the epitaph buffer, silently dropping whatever doesn't fit.
struct Epitaph {
    dest: &'static mut [u8],
}

impl Write for Epitaph {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let s = s.as_bytes();
        let n = s.len().min(self.dest.len());
        let (dest, leftovers) = core::mem::take(&mut self.dest).split_at_mut(n);
        dest.copy_from_slice(&s[..n]);
        self.dest = leftovers;
        Ok(())
    }
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    die(info)
}
