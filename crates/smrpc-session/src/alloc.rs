//! Allocator contract: session buffer reservations.
//!
//! The general-purpose huge-page allocator lives outside this crate. The
//! session manager only needs to reserve and release fixed-size buffers and
//! to read the outstanding total.

use std::collections::HashMap;

/// A granted reservation. Returned to the allocator on release; never cloned.
#[derive(Debug, PartialEq, Eq)]
pub struct Reservation {
    size: usize,
    numa_node: usize,
}

impl Reservation {
    pub fn new(size: usize, numa_node: usize) -> Self {
        Self { size, numa_node }
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

pub trait Allocator {
    /// Reserve `size` bytes on `numa_node`. `None` when out of memory.
    fn reserve(&mut self, size: usize, numa_node: usize) -> Option<Reservation>;

    fn release(&mut self, reservation: Reservation);

    /// Bytes currently handed out across all NUMA nodes.
    fn outstanding_allocation_total(&self) -> usize;
}

/// Allocator with a fixed byte budget per NUMA node. Budget 0 = unlimited.
#[derive(Debug, Default)]
pub struct BudgetAllocator {
    budget: usize,
    outstanding: HashMap<usize, usize>,
}

impl BudgetAllocator {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            outstanding: HashMap::new(),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Bytes still available on `numa_node`. `usize::MAX` when unlimited.
    pub fn headroom(&self, numa_node: usize) -> usize {
        if self.budget == 0 {
            return usize::MAX;
        }
        let used = self.outstanding.get(&numa_node).copied().unwrap_or(0);
        self.budget.saturating_sub(used)
    }
}

impl Allocator for BudgetAllocator {
    fn reserve(&mut self, size: usize, numa_node: usize) -> Option<Reservation> {
        if size > self.headroom(numa_node) {
            return None;
        }
        *self.outstanding.entry(numa_node).or_insert(0) += size;
        Some(Reservation::new(size, numa_node))
    }

    fn release(&mut self, reservation: Reservation) {
        if let Some(used) = self.outstanding.get_mut(&reservation.numa_node) {
            *used = used.saturating_sub(reservation.size);
        }
    }

    fn outstanding_allocation_total(&self) -> usize {
        self.outstanding.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_per_numa_node() {
        let mut alloc = BudgetAllocator::new(100);
        let a = alloc.reserve(80, 0).unwrap();
        assert!(alloc.reserve(30, 0).is_none());
        let b = alloc.reserve(30, 1).unwrap();
        assert_eq!(alloc.outstanding_allocation_total(), 110);

        alloc.release(a);
        alloc.release(b);
        assert_eq!(alloc.outstanding_allocation_total(), 0);
        assert_eq!(alloc.headroom(0), 100);
    }

    #[test]
    fn unlimited_never_fails() {
        let mut alloc = BudgetAllocator::unlimited();
        for _ in 0..1000 {
            assert!(alloc.reserve(1 << 20, 0).is_some());
        }
        assert_eq!(alloc.outstanding_allocation_total(), 1000 << 20);
    }
}
