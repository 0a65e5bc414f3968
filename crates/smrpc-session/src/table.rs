//! Session table: slots indexed by session number.
//!
//! A slot is never-used, a tombstone left by a buried session, or live.
//! Tombstones are only handed out again once no never-used slot remains and
//! the table has reached its slot limit.

use crate::session::{Session, SessionRole};

#[derive(Debug, Default)]
pub enum Slot {
    #[default]
    Empty,
    Tombstone,
    Live(Session),
}

impl Slot {
    pub fn is_live(&self) -> bool {
        matches!(self, Slot::Live(_))
    }
}

#[derive(Debug)]
pub struct SessionTable {
    slots: Vec<Slot>,
    max_sessions: usize,
    live: usize,
}

impl SessionTable {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            slots: Vec::new(),
            max_sessions,
            live: 0,
        }
    }

    /// Number of live sessions.
    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn tombstone_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Tombstone))
            .count()
    }

    /// Number of slots ever used, live or not.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.live >= self.max_sessions
    }

    /// Slot state for `session_num`. Out-of-range numbers read as `Empty`.
    pub fn slot(&self, session_num: u16) -> &Slot {
        const EMPTY: &Slot = &Slot::Empty;
        self.slots.get(session_num as usize).unwrap_or(EMPTY)
    }

    pub fn get(&self, session_num: u16) -> Option<&Session> {
        match self.slots.get(session_num as usize) {
            Some(Slot::Live(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, session_num: u16) -> Option<&mut Session> {
        match self.slots.get_mut(session_num as usize) {
            Some(Slot::Live(s)) => Some(s),
            _ => None,
        }
    }

    /// Pick the session number the next session would get, without
    /// reserving it. `None` when every slot is live.
    pub fn next_session_num(&self) -> Option<u16> {
        if self.is_full() {
            return None;
        }
        if let Some(idx) = self.slots.iter().position(|s| matches!(s, Slot::Empty)) {
            return Some(idx as u16);
        }
        if self.slots.len() < self.max_sessions {
            return Some(self.slots.len() as u16);
        }
        self.slots
            .iter()
            .position(|s| matches!(s, Slot::Tombstone))
            .map(|idx| idx as u16)
    }

    /// Place `session` at `session_num`, which must come from
    /// `next_session_num`.
    pub fn install(&mut self, session_num: u16, session: Session) {
        let idx = session_num as usize;
        debug_assert!(idx <= self.slots.len(), "session number {idx} skips slots");
        debug_assert!(
            !self.slot(session_num).is_live(),
            "session number {idx} is live"
        );

        if idx == self.slots.len() {
            self.slots.push(Slot::Live(session));
        } else {
            self.slots[idx] = Slot::Live(session);
        }
        self.live += 1;
    }

    /// Turn a live slot into a tombstone, returning the session.
    pub fn bury(&mut self, session_num: u16) -> Option<Session> {
        let slot = self.slots.get_mut(session_num as usize)?;
        if !slot.is_live() {
            return None;
        }
        match std::mem::replace(slot, Slot::Tombstone) {
            Slot::Live(session) => {
                self.live -= 1;
                Some(session)
            }
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.slots.iter().filter_map(|s| match s {
            Slot::Live(s) => Some(s),
            _ => None,
        })
    }

    /// Live session numbers with the given role.
    pub fn session_nums(&self, role: SessionRole) -> Vec<u16> {
        self.iter()
            .filter(|s| s.role == role)
            .map(Session::local_session_num)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smrpc_core::wire::{RoutingInfo, SessionEndpoint, TransportType};

    fn server_session(session_num: u16) -> Session {
        let ep = |rpc_id, session_num| SessionEndpoint {
            transport_type: TransportType::InfiniBand,
            hostname: "localhost".into(),
            phy_port: 0,
            rpc_id,
            session_num,
            routing_info: RoutingInfo::zeroed(),
        };
        Session::new_server(ep(1, 0), ep(0, session_num), session_num as u64, 1, Vec::new())
    }

    fn fill(table: &mut SessionTable, n: usize) {
        for _ in 0..n {
            let num = table.next_session_num().unwrap();
            table.install(num, server_session(num));
        }
    }

    #[test]
    fn numbers_are_appended_in_order() {
        let mut table = SessionTable::new(4);
        fill(&mut table, 3);
        assert_eq!(table.live_count(), 3);
        assert_eq!(table.session_nums(SessionRole::Server), vec![0, 1, 2]);
        assert_eq!(table.next_session_num(), Some(3));
    }

    #[test]
    fn bury_leaves_tombstone() {
        let mut table = SessionTable::new(4);
        fill(&mut table, 2);

        let buried = table.bury(0).unwrap();
        assert_eq!(buried.local_session_num(), 0);
        assert!(matches!(table.slot(0), Slot::Tombstone));
        assert!(table.get(0).is_none());
        assert_eq!(table.live_count(), 1);
        assert_eq!(table.tombstone_count(), 1);

        // Burying twice is a no-op.
        assert!(table.bury(0).is_none());
        assert_eq!(table.live_count(), 1);
    }

    #[test]
    fn tombstones_are_reused_last() {
        let mut table = SessionTable::new(3);
        fill(&mut table, 2);
        table.bury(0);

        // Fresh slot preferred over the tombstone.
        assert_eq!(table.next_session_num(), Some(2));
        fill(&mut table, 1);

        // Slot limit reached, tombstone reused.
        assert_eq!(table.next_session_num(), Some(0));
        fill(&mut table, 1);
        assert!(table.is_full());
        assert_eq!(table.next_session_num(), None);
        assert_eq!(table.slot_count(), 3);
    }

    #[test]
    fn out_of_range_reads_as_empty() {
        let table = SessionTable::new(2);
        assert!(matches!(table.slot(100), Slot::Empty));
        assert!(table.get(100).is_none());
    }
}
