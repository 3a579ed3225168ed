//! Log entry types.

/// Reserved key whose row stores the compaction watermark in `prev_revision`.
pub const COMPACT_REV_KEY: &str = "compact_rev_key";

/// Name prefix of rows inserted to plug holes in the id sequence.
pub const FILL_KEY_PREFIX: &str = "gap-";

/// One immutable row of the revision log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogEntry {
    /// Store-assigned id; doubles as the revision.
    pub id: i64,
    pub name: String,
    /// True only on the entry that introduced the key.
    pub created: bool,
    /// Tombstone marker.
    pub deleted: bool,
    pub create_revision: i64,
    /// Id of the entry this one superseded, 0 if none.
    pub prev_revision: i64,
    pub lease: i64,
    pub value: Vec<u8>,
    pub old_value: Vec<u8>,
}

impl LogEntry {
    /// Revision at which the key's current incarnation was created.
    ///
    /// Creating rows store 0 and resolve to their own id.
    pub fn effective_create_revision(&self) -> i64 {
        if self.created {
            self.id
        } else {
            self.create_revision
        }
    }

    /// True for rows inserted to fill a sequence gap.
    ///
    /// A fill is a tombstone named after its own id that points back at
    /// itself; no write through `append` can produce that shape.
    pub fn is_fill(&self) -> bool {
        self.deleted && self.prev_revision == self.id && self.name == fill_name(self.id)
    }
}

/// Name of the fill row for `revision`.
pub fn fill_name(revision: i64) -> String {
    format!("{FILL_KEY_PREFIX}{revision}")
}

/// Row contents supplied by the caller of `append`; the store assigns the id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewEntry {
    pub name: String,
    pub created: bool,
    pub deleted: bool,
    pub create_revision: i64,
    pub prev_revision: i64,
    pub lease: i64,
    pub value: Vec<u8>,
    pub old_value: Vec<u8>,
}

impl NewEntry {
    /// Entry introducing `name`. `prev_revision` is the tombstone being
    /// replaced, or 0 for a key never seen before.
    pub fn create(name: &str, value: Vec<u8>, lease: i64, prev_revision: i64) -> Self {
        Self {
            name: name.to_string(),
            created: true,
            prev_revision,
            lease,
            value,
            ..Default::default()
        }
    }

    /// Entry replacing the live entry `current`.
    pub fn update(current: &LogEntry, value: Vec<u8>, lease: i64) -> Self {
        Self {
            name: current.name.clone(),
            create_revision: current.effective_create_revision(),
            prev_revision: current.id,
            lease,
            value,
            old_value: current.value.clone(),
            ..Default::default()
        }
    }

    /// Fill tombstone for the missing id `revision`.
    ///
    /// `prev_revision` is the id itself, which no key chain can reference,
    /// so the fill never collides with a user key of the same name.
    pub fn fill(revision: i64) -> Self {
        Self {
            name: fill_name(revision),
            deleted: true,
            prev_revision: revision,
            ..Default::default()
        }
    }

    /// The row this entry becomes once the store assigns it `id`.
    pub fn stored_at(self, id: i64) -> LogEntry {
        LogEntry {
            id,
            name: self.name,
            created: self.created,
            deleted: self.deleted,
            create_revision: self.create_revision,
            prev_revision: self.prev_revision,
            lease: self.lease,
            value: self.value,
            old_value: self.old_value,
        }
    }

    /// Tombstone for the live entry `current`.
    pub fn tombstone(current: &LogEntry) -> Self {
        Self {
            name: current.name.clone(),
            deleted: true,
            create_revision: current.effective_create_revision(),
            prev_revision: current.id,
            lease: current.lease,
            value: current.value.clone(),
            old_value: current.value.clone(),
            ..Default::default()
        }
    }
}
