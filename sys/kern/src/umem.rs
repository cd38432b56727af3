// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Support for interacting with untrusted/unprivileged/user memory.

use core::marker::PhantomData;

use crate::err::KernelError;

/// A (user, untrusted, unprivileged) slice.
///
/// A `USlice` is passed into the kernel by a task as a base/length pair. The
/// type itself only represents an _allegation_ from the task that a section of
/// address space holds what it says.
///
/// Having a `USlice<T>` tells you the following:
///
/// - The base of the section is correctly aligned for type `T`.
/// - The section does not wrap around the end of the address space.
/// - A non-empty section does not start at address zero.
///
/// This kernel does no memory protection, so tasks can name any memory they
/// like; what the checks above rule out is a slice that can't exist in Rust
/// at all.
pub struct USlice<T> {
    /// Base address of the slice.
    base_address: usize,
    /// Number of `T` elements in the slice.
    length: usize,
    /// since we don't actually use T...
    _marker: PhantomData<*mut [T]>,
}

impl<T> USlice<T> {
    /// Constructs a `USlice` given a base address and length passed from
    /// untrusted code.
    ///
    /// This method will categorically reject zero-sized T.
    pub fn from_raw(
        base_address: usize,
        length: usize,
    ) -> Result<Self, KernelError> {
        // NOTE: the properties checked here are critical for the correctness of
        // this type. Think carefully before loosening any of them, or adding a
        // second way to construct a USlice.

        // ZST check, should resolve at compile time:
        uassert!(core::mem::size_of::<T>() != 0);

        if base_address % core::mem::align_of::<T>() != 0 {
            return Err(KernelError::InvalidArgument);
        }
        if base_address == 0 && length != 0 {
            return Err(KernelError::InvalidArgument);
        }
        let size_in_bytes = length
            .checked_mul(core::mem::size_of::<T>())
            .ok_or(KernelError::InvalidArgument)?;
        // Note: this subtraction cannot underflow. You can subtract any usize
        // from usize::MAX.
        let highest_possible_base = usize::MAX - size_in_bytes;
        if base_address <= highest_possible_base {
            Ok(Self {
                base_address,
                length,
                _marker: PhantomData,
            })
        } else {
            Err(KernelError::InvalidArgument)
        }
    }

    /// Returns `true` if this slice is zero-length, `false` otherwise.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns the number of `T`s in this slice.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns the bottom address of this slice as a `usize`.
    pub fn base_addr(&self) -> usize {
        self.base_address
    }

    /// Returns the end address of the slice, which is the address one past its
    /// final byte -- or its base address if it's empty.
    pub fn end_addr(&self) -> usize {
        // Cannot overflow: checked in `from_raw`.
        self.base_address + self.length * core::mem::size_of::<T>()
    }

    /// Converts this into an _actual_ slice that can be directly read by the
    /// kernel.
    ///
    /// # Safety
    ///
    /// The memory must be readable, hold valid `T`s, and not be written by
    /// anyone for as long as the returned slice is alive.
    pub unsafe fn assume_readable(&self) -> &[T] {
        if self.is_empty() {
            &[]
        } else {
            core::slice::from_raw_parts(
                self.base_address as *const T,
                self.length,
            )
        }
    }
}
