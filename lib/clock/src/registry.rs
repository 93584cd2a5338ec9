// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pending timer entries, kept in firing order.
//!
//! The registry is a fixed-capacity vector sorted by trigger time with the
//! *earliest* entry at the end, so the interrupt path pops in constant time.
//! Entries with equal trigger times keep registration order: the one
//! registered first sits closer to the end and fires first.

use heapless::Vec;

use crate::{Callback, TimerId};

/// A pending callback.
pub struct Entry<T> {
    id: TimerId,
    trigger_time: u64,
    callback: Callback<T>,
    data: T,
}

impl<T> Entry<T> {
    pub fn new(
        id: TimerId,
        trigger_time: u64,
        callback: Callback<T>,
        data: T,
    ) -> Self {
        Self {
            id,
            trigger_time,
            callback,
            data,
        }
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    pub fn trigger_time(&self) -> u64 {
        self.trigger_time
    }

    /// Runs the callback, consuming the entry so it can't run twice.
    pub fn fire(self) {
        (self.callback)(self.id, self.data)
    }
}

/// Where in the firing order a removed entry was.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Removal {
    /// No entry had that id.
    Missing,
    /// The earliest entry; whatever the device is armed for is now stale.
    Head,
    /// Any other entry.
    Other,
}

pub struct Registry<T, const N: usize> {
    // Descending by trigger time; the last element is the head.
    entries: Vec<Entry<T>, N>,
}

impl<T, const N: usize> Default for Registry<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Registry<T, N> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.is_full()
    }

    /// Inserts `entry` in firing order, handing it back if the registry is
    /// full. Returns `true` if the entry is the new head.
    pub fn insert(&mut self, entry: Entry<T>) -> Result<bool, Entry<T>> {
        let t = entry.trigger_time;
        let pos = self.entries.partition_point(|e| e.trigger_time > t);
        self.entries.push(entry)?;
        self.entries[pos..].rotate_right(1);
        Ok(pos == self.entries.len() - 1)
    }

    pub fn remove(&mut self, id: TimerId) -> Removal {
        let Some(pos) = self.entries.iter().position(|e| e.id == id) else {
            return Removal::Missing;
        };
        let was_head = pos == self.entries.len() - 1;
        self.entries[pos..].rotate_left(1);
        self.entries.pop();
        if was_head {
            Removal::Head
        } else {
            Removal::Other
        }
    }

    /// Drops every entry without running its callback. Returns how many there
    /// were.
    pub fn remove_all(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    /// Removes and returns the head entry if it is due at `now`.
    pub fn pop_due(&mut self, now: u64) -> Option<Entry<T>> {
        if self.peek_earliest()? > now {
            return None;
        }
        self.entries.pop()
    }

    pub fn peek_earliest(&self) -> Option<u64> {
        self.entries.last().map(|e| e.trigger_time)
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Iterates over the entries in firing order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry<T>> + '_ {
        self.entries.iter().rev()
    }
}
