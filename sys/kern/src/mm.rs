// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Physical page allocation.
//!
//! The kernel manages one contiguous region of RAM, carved into `PAGE_SIZE`
//! pages. Each page is either free or allocated, tracked in a map with one
//! entry per page. Allocation is first-fit from the bottom of the region.
//! There is no coalescing, because every allocation is exactly one page.
//!
//! The map also records who each allocated page belongs to: the kernel (task
//! kernel stacks) or a task (user stacks and `malloc` pages). A task can own
//! any number of pages; they all go back to the pool when it exits.
//!
//! The allocator only does bookkeeping; it never touches the memory it hands
//! out.
//!
//! Both `allocate` and `free` take a `CriticalSection` token, so they can only
//! be called with interrupts masked.

use abi::{Pid, PAGE_SIZE};
use critical_section::CriticalSection;

use crate::err::KernelError;

/// Page-aligned physical address of a page.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct PageAddr(usize);

impl PageAddr {
    /// Returns the page containing `addr`.
    pub const fn containing(addr: usize) -> Self {
        Self(addr & !(PAGE_SIZE - 1))
    }

    /// First byte of the page.
    pub const fn base(self) -> usize {
        self.0
    }

    /// One past the last byte of the page. A full descending stack in this
    /// page starts here.
    pub const fn top(self) -> usize {
        self.0 + PAGE_SIZE
    }
}

/// Who an allocated page belongs to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Owner {
    /// Kernel stack of a task; released when the task is reaped.
    Kernel,
    /// User memory of a task; released when the task exits.
    Task(Pid),
}

/// State of one page in the allocator map.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PageState {
    Free,
    Allocated(Owner),
}

/// First-fit allocator over a fixed region.
pub struct PageAllocator<'m> {
    /// Address of page 0.
    base: usize,
    /// One entry per page, indexed from `base`.
    map: &'m mut [PageState],
    free: usize,
}

impl<'m> PageAllocator<'m> {
    /// Creates an allocator for `map.len()` pages starting at `base`. Every
    /// page starts out free, regardless of what `map` contained.
    ///
    /// # Panics
    ///
    /// If `base` is not page aligned, or the region would wrap the address
    /// space.
    pub fn new(base: usize, map: &'m mut [PageState]) -> Self {
        uassert!(base % PAGE_SIZE == 0);
        uassert!(map
            .len()
            .checked_mul(PAGE_SIZE)
            .and_then(|size| base.checked_add(size))
            .is_some());
        map.fill(PageState::Free);
        let free = map.len();
        Self { base, map, free }
    }

    /// Takes the lowest free page, on behalf of `owner`.
    pub fn allocate(
        &mut self,
        owner: Owner,
        _cs: CriticalSection<'_>,
    ) -> Result<PageAddr, KernelError> {
        let index = self
            .map
            .iter()
            .position(|&p| p == PageState::Free)
            .ok_or(KernelError::ResourceExhausted)?;
        self.map[index] = PageState::Allocated(owner);
        self.free -= 1;
        Ok(PageAddr(self.base + index * PAGE_SIZE))
    }

    /// Returns `page` to the free pool.
    ///
    /// Freeing a page that this allocator did not hand out, or freeing it
    /// twice, is a kernel bug and halts.
    pub fn free(&mut self, page: PageAddr, _cs: CriticalSection<'_>) {
        let Some(index) = self.index_of(page.base()) else {
            panic!("free of page outside region");
        };
        uassert!(self.map[index] != PageState::Free);
        self.map[index] = PageState::Free;
        self.free += 1;
    }

    /// Frees every page owned by task `pid`. Returns how many there were.
    pub fn free_owned_by(
        &mut self,
        pid: Pid,
        _cs: CriticalSection<'_>,
    ) -> usize {
        let mut n = 0;
        for state in self.map.iter_mut() {
            if *state == PageState::Allocated(Owner::Task(pid)) {
                *state = PageState::Free;
                n += 1;
            }
        }
        self.free += n;
        n
    }

    /// Moves `page` from task `from` to task `to`. Returns `false`, changing
    /// nothing, if `from` doesn't own it.
    pub fn transfer(
        &mut self,
        page: PageAddr,
        from: Pid,
        to: Pid,
        _cs: CriticalSection<'_>,
    ) -> bool {
        let Some(i) = self.index_of(page.base()) else {
            return false;
        };
        if self.map[i] != PageState::Allocated(Owner::Task(from)) {
            return false;
        }
        self.map[i] = PageState::Allocated(Owner::Task(to));
        true
    }

    /// Who `page` is allocated to, or `None` if it is free or outside the
    /// region.
    pub fn owner(&self, page: PageAddr) -> Option<Owner> {
        match self.map[self.index_of(page.base())?] {
            PageState::Free => None,
            PageState::Allocated(owner) => Some(owner),
        }
    }

    /// Pages currently owned by task `pid`, lowest first.
    #[cfg(test)]
    pub fn owned_by(&self, pid: Pid) -> Vec<PageAddr> {
        self.map
            .iter()
            .enumerate()
            .filter(|&(_, s)| *s == PageState::Allocated(Owner::Task(pid)))
            .map(|(i, _)| PageAddr(self.base + i * PAGE_SIZE))
            .collect()
    }

    pub fn capacity(&self) -> usize {
        self.map.len()
    }

    pub fn free_pages(&self) -> usize {
        self.free
    }

    fn index_of(&self, page_base: usize) -> Option<usize> {
        let offset = page_base.checked_sub(self.base)?;
        let index = offset / PAGE_SIZE;
        (index < self.map.len()).then_some(index)
    }
}
