//! Per-learner review order.
//!
//! Items live in a map keyed by [`ItemId`]; `head` and each item's `next`
//! field are keys into that map, forming one singly linked chain. The chain is
//! kept sorted by `due_at` ascending, and an item is always placed after every
//! item due at the same instant or earlier, so ties are served first-in
//! first-out. Callers never observe a half-relinked chain: the owning
//! aggregate is mutated as a working copy under the learner lock and swapped
//! in whole.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SchedulerError, SchedulerResult};
use crate::scheduling::types::{Item, ItemId};

const MS_PER_DAY: f64 = 86_400_000.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSequence {
    items: HashMap<ItemId, Item>,
    head: Option<ItemId>,
}

impl ItemSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn head(&self) -> Option<ItemId> {
        self.head
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.items.contains_key(id)
    }

    pub fn get(&self, id: &ItemId) -> Option<&Item> {
        self.items.get(id)
    }

    /// The item that surfaces next. `None` means the learner has no items.
    pub fn peek_due(&self) -> Option<&Item> {
        self.head.and_then(|id| self.items.get(&id))
    }

    pub fn due_count(&self, now: DateTime<Utc>) -> usize {
        self.iter().take_while(|item| item.is_due(now)).count()
    }

    pub fn iter(&self) -> ChainIter<'_> {
        ChainIter {
            sequence: self,
            cursor: self.head,
            remaining: self.items.len(),
        }
    }

    pub fn insert(&mut self, mut item: Item) -> SchedulerResult<()> {
        if self.items.contains_key(&item.id) {
            return Err(SchedulerError::Conflict(format!(
                "item {} already in sequence",
                item.id
            )));
        }
        item.next = None;
        let id = item.id;
        let due_at = item.due_at;
        self.items.insert(id, item);
        self.link_by_due(id, due_at);
        Ok(())
    }

    pub fn remove(&mut self, id: &ItemId) -> SchedulerResult<Item> {
        if !self.items.contains_key(id) {
            return Err(SchedulerError::NotFound(format!("item {id}")));
        }
        self.unlink(id)?;
        let mut item = self
            .items
            .remove(id)
            .ok_or_else(|| SchedulerError::NotFound(format!("item {id}")))?;
        item.next = None;
        Ok(item)
    }

    /// Replaces the stored copy of `after_review`, moves its due date
    /// `new_interval_days` past `now` and relinks it at its due-date position.
    /// An interval whose due date cannot be represented is `InvalidState` and
    /// leaves the chain untouched.
    pub fn advance(
        &mut self,
        mut after_review: Item,
        new_interval_days: f64,
        now: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let id = after_review.id;
        if !self.items.contains_key(&id) {
            return Err(SchedulerError::NotFound(format!("item {id}")));
        }
        if !new_interval_days.is_finite() || new_interval_days <= 0.0 {
            return Err(SchedulerError::InvalidState(format!(
                "interval must be positive, got {new_interval_days}"
            )));
        }

        let due_at = due_after(now, new_interval_days).ok_or_else(|| {
            SchedulerError::InvalidState(format!(
                "interval of {new_interval_days} days overflows the due date"
            ))
        })?;

        self.unlink(&id)?;
        after_review.due_at = due_at;
        after_review.next = None;
        self.items.insert(id, after_review);
        self.link_by_due(id, due_at);
        Ok(())
    }

    /// Checks the chain: every map key matches the id it holds, no self links,
    /// no cycles, every stored item reachable from `head`, due dates
    /// non-decreasing.
    pub fn verify(&self) -> SchedulerResult<()> {
        if let Some((key, item)) = self.items.iter().find(|(key, item)| **key != item.id) {
            return Err(SchedulerError::InvalidState(format!(
                "item stored under {key} carries id {}",
                item.id
            )));
        }

        let mut seen = HashSet::with_capacity(self.items.len());
        let mut cursor = self.head;
        let mut last_due: Option<DateTime<Utc>> = None;

        while let Some(id) = cursor {
            let item = self.items.get(&id).ok_or_else(|| {
                SchedulerError::InvalidState(format!("chain references missing item {id}"))
            })?;
            if item.next == Some(id) {
                return Err(SchedulerError::InvalidState(format!(
                    "item {id} points to itself"
                )));
            }
            if !seen.insert(id) {
                return Err(SchedulerError::InvalidState(format!(
                    "cycle through item {id}"
                )));
            }
            if last_due.is_some_and(|prev| prev > item.due_at) {
                return Err(SchedulerError::InvalidState(format!(
                    "item {id} is out of due order"
                )));
            }
            last_due = Some(item.due_at);
            cursor = item.next;
        }

        if seen.len() != self.items.len() {
            return Err(SchedulerError::InvalidState(format!(
                "{} of {} items unreachable from head",
                self.items.len() - seen.len(),
                self.items.len()
            )));
        }
        Ok(())
    }

    fn link_by_due(&mut self, id: ItemId, due_at: DateTime<Utc>) {
        let mut prev: Option<ItemId> = None;
        let mut cursor = self.head;
        while let Some(current) = cursor {
            if current == id {
                break;
            }
            match self.items.get(&current) {
                Some(item) if item.due_at <= due_at => {
                    prev = Some(current);
                    cursor = item.next;
                }
                _ => break,
            }
        }

        if let Some(item) = self.items.get_mut(&id) {
            item.next = cursor;
        }
        match prev {
            None => self.head = Some(id),
            Some(p) => {
                if let Some(prev_item) = self.items.get_mut(&p) {
                    prev_item.next = Some(id);
                }
            }
        }
    }

    fn unlink(&mut self, id: &ItemId) -> SchedulerResult<()> {
        let successor = self.items.get(id).and_then(|item| item.next);

        if self.head == Some(*id) {
            self.head = successor;
            return Ok(());
        }

        let mut cursor = self.head;
        let mut steps = 0;
        while let Some(current) = cursor {
            if steps > self.items.len() {
                break;
            }
            steps += 1;
            let next = self.items.get(&current).and_then(|item| item.next);
            if next == Some(*id) {
                if let Some(prev_item) = self.items.get_mut(&current) {
                    prev_item.next = successor;
                }
                return Ok(());
            }
            cursor = next;
        }

        Err(SchedulerError::InvalidState(format!(
            "item {id} is stored but not linked"
        )))
    }
}

fn due_after(now: DateTime<Utc>, interval_days: f64) -> Option<DateTime<Utc>> {
    let ms = (interval_days * MS_PER_DAY).round();
    // `as i64` saturates, so out-of-range values must be rejected first
    if !(ms.is_finite() && ms.abs() < i64::MAX as f64) {
        return None;
    }
    TimeDelta::try_milliseconds(ms as i64).and_then(|offset| now.checked_add_signed(offset))
}

pub struct ChainIter<'a> {
    sequence: &'a ItemSequence,
    cursor: Option<ItemId>,
    remaining: usize,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a Item;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let item = self.sequence.items.get(&self.cursor?)?;
        self.remaining -= 1;
        self.cursor = item.next;
        Some(item)
    }
}
