//! Bounded presence cache for block lookups

use crate::model::Address;
use std::collections::{HashMap, VecDeque};

/// Remembers whether recently seen addresses are stored.
///
/// Least recently used entries are evicted once `capacity` is exceeded.
#[derive(Debug)]
pub struct PresenceCache {
    capacity: usize,
    map: HashMap<Address, bool>,
    order: VecDeque<Address>,
}

impl PresenceCache {
    pub fn new(capacity: usize) -> Self {
        PresenceCache {
            capacity,
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&mut self, address: &Address) -> Option<bool> {
        let present = *self.map.get(address)?;
        self.touch(address);
        Some(present)
    }

    pub fn insert(&mut self, address: Address, present: bool) {
        if self.capacity == 0 {
            return;
        }
        if self.map.insert(address, present).is_some() {
            self.touch(&address);
            return;
        }
        self.order.push_back(address);

        while self.map.len() > self.capacity {
            match self.order.pop_front() {
                Some(evict) => {
                    self.map.remove(&evict);
                }
                None => break,
            }
        }
    }

    pub fn remove(&mut self, address: &Address) {
        if self.map.remove(address).is_some() {
            self.order.retain(|a| a != address);
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    fn touch(&mut self, address: &Address) {
        if let Some(pos) = self.order.iter().position(|a| a == address) {
            if let Some(a) = self.order.remove(pos) {
                self.order.push_back(a);
            }
        }
    }
}
