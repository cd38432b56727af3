// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between kernel and applications.

#![no_std]

/// Log2 of the page size.
pub const PAGE_SHIFT: u32 = 12;

/// Size of the unit of physical memory handed out by the kernel, and of each
/// task's kernel stack.
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Number of entries in the kernel's syscall table. Syscall numbers at or
/// above this are rejected with `SysError::BadSyscallNumber`.
pub const NUM_SYSCALLS: usize = 4;

/// Names a task by its slot in the kernel task table.
///
/// Slot indices are stable for the lifetime of a task and get reused after
/// the task exits; there is no generation number.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct Pid(pub u16);

impl Pid {
    /// The boot task, which is installed before the scheduler first runs and
    /// never exits.
    pub const INIT: Self = Self(0);

    /// Produces the `Pid` for table slot `index`.
    ///
    /// # Panics
    ///
    /// If `index` does not fit in a `Pid`.
    pub fn from_index(index: usize) -> Self {
        match u16::try_from(index) {
            Ok(i) => Self(i),
            Err(_) => panic!(),
        }
    }

    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// Enumeration of syscall numbers.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Sysnum {
    Write = 0,
    Malloc = 1,
    Clone = 2,
    Exit = 3,
}

/// We're using an explicit `TryFrom` impl for `Sysnum` instead of
/// `FromPrimitive` because nothing here depends on `num-traits`.
impl core::convert::TryFrom<u32> for Sysnum {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::Write),
            1 => Ok(Self::Malloc),
            2 => Ok(Self::Clone),
            3 => Ok(Self::Exit),
            _ => Err(()),
        }
    }
}

/// Failure codes returned by syscalls.
///
/// Syscalls return a single machine word. Values that reinterpret as a
/// negative `isize` in the range covered by this enum are failures; anything
/// else is the syscall's successful result.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(isize)]
pub enum SysError {
    /// No free page or no free task slot. This is the `-1` sentinel that
    /// `malloc` and `clone` have always returned.
    ResourceExhausted = -1,
    /// The syscall number was outside the table.
    BadSyscallNumber = -2,
    /// An argument was patently invalid (a slice wrapping the address space,
    /// a null stack, and so on).
    InvalidArgument = -3,
}

impl SysError {
    /// Returns the raw return-register value for this error.
    pub const fn to_raw(self) -> usize {
        self as isize as usize
    }

    /// Interprets a raw return-register value as an error, if it is one.
    pub fn from_raw(raw: usize) -> Option<Self> {
        match raw as isize {
            -1 => Some(Self::ResourceExhausted),
            -2 => Some(Self::BadSyscallNumber),
            -3 => Some(Self::InvalidArgument),
            _ => None,
        }
    }
}

/// Splits a raw syscall return value into success or failure.
pub fn decode_result(raw: usize) -> Result<usize, SysError> {
    match SysError::from_raw(raw) {
        Some(e) => Err(e),
        None => Ok(raw),
    }
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct TaskFlags: u32 {
        /// Task runs only in the kernel and has no user-mode context.
        const KTHREAD = 1 << 1;
    }
}
