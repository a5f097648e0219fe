//! Reconciliation store.
//!
//! The single merge point for snapshot results, push events and local read
//! marks. The store keeps at most `capacity` records, one per id, ordered by
//! recency (newest first).
//!
//! Every change that did not come from a snapshot stamps the record with a
//! logical clock value. A [`SnapshotTicket`] taken when a fetch is issued lets
//! the store tell which records changed after the server produced the
//! snapshot, so a slow snapshot can never undo newer push or local state.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::record::NotificationRecord;

/// How a snapshot may change read state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotReadPolicy {
    /// Snapshots can mark records read but never unread.
    #[default]
    Monotonic,
    /// Snapshots may unread records nothing touched since the fetch was issued.
    Authoritative,
}

/// Logical position of the store when a snapshot request was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotTicket {
    epoch: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    record: NotificationRecord,
    /// Clock value of the last push/local change; 0 when only seen in snapshots.
    touched: u64,
}

/// Bounded, deduplicated, recency-ordered notification list.
#[derive(Debug, Clone)]
pub struct NotificationStore {
    entries: Vec<Entry>,
    capacity: usize,
    clock: u64,
}

impl NotificationStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            clock: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&NotificationRecord> {
        self.position(id).map(|idx| &self.entries[idx].record)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NotificationRecord> {
        self.entries.iter().map(|e| &e.record)
    }

    /// Records in display order (newest first).
    pub fn to_vec(&self) -> Vec<NotificationRecord> {
        self.iter().cloned().collect()
    }

    pub fn unread_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.record.is_read).count()
    }

    pub fn unread_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| !e.record.is_read)
            .map(|e| e.record.id.clone())
            .collect()
    }

    /// Drop every record, e.g. on scope change.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Merge a pushed record. Push data can set read state but never unset it.
    pub fn upsert(&mut self, record: NotificationRecord) {
        let touched = self.tick();
        self.upsert_entry(record, touched, false);
        self.normalize_order();
    }

    /// Merge several pushed records.
    pub fn merge(&mut self, records: impl IntoIterator<Item = NotificationRecord>) {
        for record in records {
            let touched = self.tick();
            self.upsert_entry(record, touched, false);
        }
        self.normalize_order();
    }

    /// Record the store position before a snapshot request goes out.
    pub fn begin_snapshot(&mut self) -> SnapshotTicket {
        self.clock += 1;
        SnapshotTicket { epoch: self.clock }
    }

    /// Merge a completed snapshot taken at `ticket`.
    ///
    /// Records the snapshot no longer lists are removed unless something
    /// touched them after the ticket was issued.
    pub fn apply_snapshot(
        &mut self,
        records: Vec<NotificationRecord>,
        ticket: SnapshotTicket,
        policy: SnapshotReadPolicy,
    ) {
        let ids: HashSet<String> = records.iter().map(|r| r.id.clone()).collect();

        for record in records {
            match self.position(&record.id) {
                // Touched after the request went out: the snapshot is older
                // than what we hold, so it may only contribute read state.
                Some(idx) if self.entries[idx].touched > ticket.epoch => {
                    let current = &mut self.entries[idx].record;
                    if record.is_read && !current.is_read {
                        current.is_read = true;
                        current.read_at = record.read_at;
                    }
                }
                _ => {
                    let allow_unread = policy == SnapshotReadPolicy::Authoritative;
                    self.upsert_entry(record, 0, allow_unread);
                }
            }
        }

        self.entries
            .retain(|e| ids.contains(&e.record.id) || e.touched > ticket.epoch);
        self.normalize_order();
    }

    /// Locally mark one record read. Returns `true` when it was unread.
    pub fn mark_read(&mut self, id: &str) -> bool {
        let Some(idx) = self.position(id) else {
            return false;
        };
        if self.entries[idx].record.is_read {
            return false;
        }
        let touched = self.tick();
        let entry = &mut self.entries[idx];
        entry.record.is_read = true;
        entry.touched = touched;
        true
    }

    /// Locally mark every record read. Returns the ids that flipped.
    pub fn mark_all_read(&mut self) -> Vec<String> {
        let ids = self.unread_ids();
        for id in &ids {
            self.mark_read(id);
        }
        ids
    }

    /// Apply a bulk-read push event. Returns how many records flipped.
    pub fn apply_bulk_read<S: AsRef<str>>(&mut self, ids: &[S]) -> usize {
        ids.iter().filter(|id| self.mark_read(id.as_ref())).count()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.record.id == id)
    }

    fn upsert_entry(&mut self, mut incoming: NotificationRecord, touched: u64, allow_unread: bool) {
        match self.position(&incoming.id) {
            Some(idx) => {
                let entry = &mut self.entries[idx];
                let current = &entry.record;

                if current.is_read && !incoming.is_read && !allow_unread {
                    incoming.is_read = true;
                }
                if incoming.is_read && incoming.read_at.is_none() {
                    incoming.read_at = current.read_at;
                }
                // An update without a timestamp must not jump to the top.
                if incoming.created_at.is_none() {
                    incoming.created_at = current.created_at;
                    incoming.sort_at = current.sort_at;
                }

                entry.record = incoming;
                entry.touched = entry.touched.max(touched);
            }
            None => self.entries.push(Entry {
                record: incoming,
                touched,
            }),
        }
    }

    fn normalize_order(&mut self) {
        self.entries.sort_by(|a, b| {
            b.record
                .sort_at
                .cmp(&a.record.sort_at)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        self.entries.truncate(self.capacity);
    }
}
