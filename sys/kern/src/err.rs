// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! Kernel operations that can fail for reasons outside the kernel's control
//! (running out of pages, a task passing garbage) return `KernelError`. The
//! syscall layer turns it into one of the negative `abi::SysError` codes.
//!
//! Broken kernel invariants are not errors; they go through `uassert!` and
//! end in `fail::die`.

use abi::SysError;

/// A failure that gets reported to the task that asked for the operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum KernelError {
    /// No free page, or no free task slot.
    ResourceExhausted,
    /// Syscall number outside the dispatch table. Carries the number.
    BadSyscallNumber(u32),
    /// A syscall argument failed validation.
    InvalidArgument,
}

impl From<KernelError> for SysError {
    fn from(e: KernelError) -> Self {
        match e {
            KernelError::ResourceExhausted => Self::ResourceExhausted,
            KernelError::BadSyscallNumber(_) => Self::BadSyscallNumber,
            KernelError::InvalidArgument => Self::InvalidArgument,
        }
    }
}

impl KernelError {
    /// Value to place in the task's return register.
    pub fn to_sysret(self) -> usize {
        SysError::from(self).to_raw()
    }
}
