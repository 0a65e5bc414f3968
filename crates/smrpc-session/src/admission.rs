//! Admission control: the resource checks a session must pass before it is
//! created.
//!
//! Checks run in a fixed order and the first failure wins:
//!   1. receive credits   → RecvsExhausted
//!   2. table capacity    → TooManySessions
//!   3. peer routing info → RoutingResolutionFailure
//!   4. buffer memory     → OutOfMemory
//!
//! The order decides which error a request failing several checks reports,
//! so it is part of the protocol contract. No check mutates the counters it
//! reads; on failure any buffers reserved by step 4 are released again.

use smrpc_core::wire::SmErrType;

use crate::alloc::{Allocator, Reservation};
use crate::table::SessionTable;

#[derive(Debug, Clone, Copy)]
pub struct Admission {
    /// Credits one session takes from the receive pool.
    pub session_credits: usize,
    /// Size of one session buffer.
    pub buf_size: usize,
    pub numa_node: usize,
}

impl Admission {
    pub fn new(session_credits: usize, buf_size: usize, numa_node: usize) -> Self {
        Self {
            session_credits,
            buf_size,
            numa_node,
        }
    }

    pub fn check_credits(&self, recvs_available: usize) -> Result<(), SmErrType> {
        if recvs_available < self.session_credits {
            return Err(SmErrType::RecvsExhausted);
        }
        Ok(())
    }

    pub fn check_table(&self, table: &SessionTable) -> Result<(), SmErrType> {
        if table.is_full() {
            return Err(SmErrType::TooManySessions);
        }
        Ok(())
    }

    /// Reserve one buffer per credit. All or nothing.
    pub fn reserve_buffers<A: Allocator>(
        &self,
        allocator: &mut A,
    ) -> Result<Vec<Reservation>, SmErrType> {
        let mut buffers = Vec::with_capacity(self.session_credits);
        for _ in 0..self.session_credits {
            match allocator.reserve(self.buf_size, self.numa_node) {
                Some(r) => buffers.push(r),
                None => {
                    for r in buffers.drain(..) {
                        allocator.release(r);
                    }
                    return Err(SmErrType::OutOfMemory);
                }
            }
        }
        Ok(buffers)
    }

    /// Run every check in order. `resolve_routing` is only called once the
    /// credit and table checks have passed.
    pub fn admit<A, F>(
        &self,
        recvs_available: usize,
        table: &SessionTable,
        resolve_routing: F,
        allocator: &mut A,
    ) -> Result<Vec<Reservation>, SmErrType>
    where
        A: Allocator,
        F: FnOnce() -> bool,
    {
        self.check_credits(recvs_available)?;
        self.check_table(table)?;
        if !resolve_routing() {
            return Err(SmErrType::RoutingResolutionFailure);
        }
        self.reserve_buffers(allocator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::BudgetAllocator;

    #[test]
    fn credits_checked_before_everything() {
        let admission = Admission::new(4, 1024, 0);
        let table = SessionTable::new(0);
        let mut alloc = BudgetAllocator::new(1);
        let mut resolved = false;

        let resolve = || {
            resolved = true;
            false
        };
        let err = admission.admit(3, &table, resolve, &mut alloc).unwrap_err();
        assert_eq!(err, SmErrType::RecvsExhausted);
        assert!(!resolved, "routing must not be resolved after a failed credit check");
    }

    #[test]
    fn table_checked_before_routing() {
        let admission = Admission::new(4, 1024, 0);
        let table = SessionTable::new(0);
        let mut alloc = BudgetAllocator::unlimited();
        let err = admission.admit(4, &table, || false, &mut alloc).unwrap_err();
        assert_eq!(err, SmErrType::TooManySessions);
    }

    #[test]
    fn routing_checked_before_memory() {
        let admission = Admission::new(4, 1024, 0);
        let table = SessionTable::new(1);
        let mut alloc = BudgetAllocator::new(1);
        let err = admission.admit(4, &table, || false, &mut alloc).unwrap_err();
        assert_eq!(err, SmErrType::RoutingResolutionFailure);
    }

    #[test]
    fn partial_reservation_is_rolled_back() {
        let admission = Admission::new(4, 1024, 0);
        let table = SessionTable::new(1);
        // Room for three buffers, not four.
        let mut alloc = BudgetAllocator::new(3 * 1024);
        let err = admission.admit(4, &table, || true, &mut alloc).unwrap_err();
        assert_eq!(err, SmErrType::OutOfMemory);
        assert_eq!(alloc.outstanding_allocation_total(), 0);
    }

    #[test]
    fn success_returns_one_buffer_per_credit() {
        let admission = Admission::new(4, 1024, 0);
        let table = SessionTable::new(1);
        let mut alloc = BudgetAllocator::unlimited();
        let buffers = admission.admit(4, &table, || true, &mut alloc).unwrap();
        assert_eq!(buffers.len(), 4);
        assert_eq!(alloc.outstanding_allocation_total(), 4096);
    }
}
