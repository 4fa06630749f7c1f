//! Identifier-keyed merge of records arriving from several cursors.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::record::MessageRecord;
use crate::snowflake::Snowflake;

/// Deduplicating record set.
///
/// The id is the only dedup key. The first record stored under an id wins;
/// later arrivals with the same id are dropped without touching its fields.
#[derive(Debug, Default, Clone)]
pub struct MergeStore {
    records: HashMap<Snowflake, MessageRecord>,
}

impl MergeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record. Returns `false` if its id was already present.
    pub fn insert(&mut self, record: MessageRecord) -> bool {
        use std::collections::hash_map::Entry;

        match self.records.entry(record.id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    /// Preload records (e.g. an existing archive). Returns how many were new.
    pub fn seed<I>(&mut self, records: I) -> usize
    where
        I: IntoIterator<Item = MessageRecord>,
    {
        let mut added = 0;
        for record in records {
            if self.insert(record) {
                added += 1;
            }
        }
        added
    }

    pub fn contains(&self, id: Snowflake) -> bool {
        self.records.contains_key(&id)
    }

    pub fn get(&self, id: Snowflake) -> Option<&MessageRecord> {
        self.records.get(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Highest id stored, if any.
    pub fn newest_id(&self) -> Option<Snowflake> {
        self.records.keys().max().copied()
    }

    /// All records, ascending by `sent_at`, ties broken by id.
    pub fn snapshot(&self) -> Vec<MessageRecord> {
        let mut out: Vec<MessageRecord> = self.records.values().cloned().collect();
        out.sort_by(archive_order);
        out
    }
}

/// Total order used for archive output.
///
/// Parsed instants compare first so that differing UTC offsets sort
/// correctly; unparseable timestamps sort before all valid ones.
pub fn archive_order(a: &MessageRecord, b: &MessageRecord) -> Ordering {
    a.sent_instant()
        .cmp(&b.sent_instant())
        .then_with(|| a.sent_at.cmp(&b.sent_at))
        .then_with(|| a.id.cmp(&b.id))
}
