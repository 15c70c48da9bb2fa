//! Memory symbol records persisted by the vault.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A durable fact extracted from conversation.
///
/// A symbol is created when the remote agent saves a fact with no matching
/// record, and updated (never destroyed) when a later save's meaning
/// overlaps. Only an explicit bulk clear removes symbols.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySymbol {
    /// Globally unique identifier, assigned at creation, immutable.
    pub id: Uuid,
    /// Short glyph or one-word icon (e.g. an emoji).
    pub symbol: String,
    /// Free-text description; the semantic key for deduplication.
    pub meaning: String,
    /// Keywords whose appearance in conversation should recall this memory.
    /// Grows monotonically via union on merge.
    #[serde(default)]
    pub triggers: Vec<String>,
    /// Last-touched time (creation or most recent recall/update). Used for
    /// display ordering, not eviction.
    pub timestamp: DateTime<Utc>,
}

impl MemorySymbol {
    /// Create a new symbol with a fresh id and the current time.
    #[must_use]
    pub fn new(symbol: &str, meaning: &str, triggers: &[String]) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_owned(),
            meaning: meaning.to_owned(),
            triggers: triggers.to_vec(),
            timestamp: Utc::now(),
        }
    }

    /// Whether `meaning` overlaps this record: case-insensitive substring
    /// containment in either direction. Overlapping saves merge into the
    /// existing record instead of creating a new one.
    #[must_use]
    pub fn meaning_overlaps(&self, meaning: &str) -> bool {
        let ours = self.meaning.to_lowercase();
        let theirs = meaning.to_lowercase();
        ours.contains(&theirs) || theirs.contains(&ours)
    }

    /// Union incoming triggers into this record, preserving insertion order
    /// and dropping duplicates. Existing triggers are never removed.
    pub fn merge_triggers(&mut self, incoming: &[String]) {
        for trigger in incoming {
            if !self.triggers.contains(trigger) {
                self.triggers.push(trigger.clone());
            }
        }
    }
}
