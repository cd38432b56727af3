// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common utility functions used in various places in the kernel.

/// Utility routine for getting `&mut` to _two_ elements of a slice, at indexes
/// `i` and `j`. `i` and `j` must be distinct and in bounds, or this will
/// panic.
#[inline(always)]
pub fn index2_distinct<T>(
    elements: &mut [T],
    i: usize,
    j: usize,
) -> (&mut T, &mut T) {
    uassert!(i != j);
    if i < j {
        let (lo, hi) = elements.split_at_mut(j);
        (&mut lo[i], &mut hi[0])
    } else {
        let (lo, hi) = elements.split_at_mut(i);
        (&mut hi[0], &mut lo[j])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn either_order() {
        let mut v = [1, 2, 3, 4];
        let (a, b) = index2_distinct(&mut v, 3, 1);
        core::mem::swap(a, b);
        assert_eq!(v, [1, 4, 3, 2]);
        let (a, b) = index2_distinct(&mut v, 0, 2);
        *a += *b;
        assert_eq!(v, [4, 4, 3, 2]);
    }

    #[test]
    #[should_panic]
    fn same_index_panics() {
        let mut v = [1, 2];
        let _ = index2_distinct(&mut v, 1, 1);
    }
}
