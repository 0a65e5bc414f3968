//! Deduplication token map.
//!
//! Server side only: maps the unique token of an admitted connect request to
//! the session number it produced. Entries live exactly as long as that
//! session and are removed when it is buried.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct TokenMap {
    map: HashMap<u64, u16>,
}

impl TokenMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, token: u64) -> Option<u16> {
        self.map.get(&token).copied()
    }

    /// Returns the previous session number for `token`, if any.
    pub fn insert(&mut self, token: u64, session_num: u16) -> Option<u16> {
        self.map.insert(token, session_num)
    }

    pub fn remove(&mut self, token: u64) -> Option<u16> {
        self.map.remove(&token)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_lookup_remove() {
        let mut map = TokenMap::new();
        assert_eq!(map.lookup(42), None);
        assert_eq!(map.insert(42, 3), None);
        assert_eq!(map.lookup(42), Some(3));
        assert_eq!(map.insert(42, 5), Some(3));
        assert_eq!(map.remove(42), Some(5));
        assert!(map.is_empty());
    }
}
