//! Dual-write memory vault with startup reconciliation and self-repair.
//!
//! Every successful write lands in two blob keys (primary and backup) that
//! are kept value-identical. `init` reconciles the two copies at startup and
//! `load` falls back to (and repairs from) the backup when the primary is
//! missing or corrupt, so a wiped primary never loses memories.

use crate::config::MemoryConfig;
use crate::error::{Result, SessionError};
use crate::memory::blob::BlobStore;
use crate::memory::types::MemorySymbol;
use chrono::Utc;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Durable store of [`MemorySymbol`] records.
///
/// Not designed for concurrent callers: all blob access is serialized behind
/// a single in-process lock. The only concurrent callers are the tool-call
/// mediator (receive loop) and the session controller at priming time.
pub struct MemoryStore {
    blobs: Box<dyn BlobStore>,
    primary_key: String,
    backup_key: String,
    lock: Mutex<()>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(blobs: Box<dyn BlobStore>, config: &MemoryConfig) -> Self {
        Self {
            blobs,
            primary_key: config.primary_key.clone(),
            backup_key: config.backup_key.clone(),
            lock: Mutex::new(()),
        }
    }

    /// Reconcile primary and backup blobs at startup.
    ///
    /// Missing primary with a surviving backup restores the primary; a
    /// missing backup is recreated from the primary. Both present is assumed
    /// consistent (no deep merge across divergent copies); both missing is a
    /// first run.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if a repair write fails.
    pub fn init(&self) -> Result<()> {
        let _guard = self.guard();
        let primary = self.blobs.get(&self.primary_key)?;
        let backup = self.blobs.get(&self.backup_key)?;

        match (primary, backup) {
            (None, Some(backup)) => {
                warn!("primary memory blob missing, restoring from backup");
                self.blobs.put(&self.primary_key, &backup)?;
            }
            (Some(primary), None) => {
                info!("creating missing memory backup");
                self.blobs.put(&self.backup_key, &primary)?;
            }
            (Some(_), Some(_)) => {
                debug!("memory vault integrity check passed");
            }
            (None, None) => {
                debug!("memory vault empty (first run)");
            }
        }
        Ok(())
    }

    /// Load all symbols. Never fails: an absent or corrupt primary falls
    /// back to the backup (repairing the primary when the backup parses),
    /// and two unusable copies yield an empty collection.
    #[must_use]
    pub fn load(&self) -> Vec<MemorySymbol> {
        let _guard = self.guard();
        self.load_unlocked()
    }

    fn load_unlocked(&self) -> Vec<MemorySymbol> {
        if let Some(symbols) = self.read_list(&self.primary_key) {
            return symbols;
        }

        // Primary absent or corrupt: fall back to backup and repair.
        if let Ok(Some(raw)) = self.blobs.get(&self.backup_key)
            && let Some(symbols) = parse_list(&raw)
        {
            warn!("primary memory blob unusable, repairing from backup");
            if let Err(e) = self.blobs.put(&self.primary_key, &raw) {
                warn!("failed to repair primary memory blob: {e}");
            }
            return symbols;
        }

        Vec::new()
    }

    fn read_list(&self, key: &str) -> Option<Vec<MemorySymbol>> {
        match self.blobs.get(key) {
            Ok(Some(raw)) => parse_list(&raw),
            Ok(None) => None,
            Err(e) => {
                warn!("cannot read memory blob '{key}': {e}");
                None
            }
        }
    }

    /// Save a fact, merging into an existing record when the meaning
    /// overlaps (case-insensitive substring, either direction).
    ///
    /// On merge the existing record's timestamp is refreshed and triggers
    /// are unioned; the glyph and id are unchanged. On no match a new record
    /// with a fresh id is appended. Returns the stored record either way.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the dual write fails; the in-memory
    /// result is not authoritative until the save is retried.
    pub fn save(&self, symbol: &str, meaning: &str, triggers: &[String]) -> Result<MemorySymbol> {
        let _guard = self.guard();
        let mut symbols = self.load_unlocked();

        if let Some(existing) = symbols.iter_mut().find(|s| s.meaning_overlaps(meaning)) {
            debug!("memory already known, refreshing: {}", existing.meaning);
            existing.timestamp = Utc::now();
            existing.merge_triggers(triggers);
            let merged = existing.clone();
            self.persist_unlocked(&symbols)?;
            return Ok(merged);
        }

        let record = MemorySymbol::new(symbol, meaning, triggers);
        symbols.push(record.clone());
        self.persist_unlocked(&symbols)?;
        info!("saved new memory symbol [{symbol}]");
        Ok(record)
    }

    /// Write the identical serialized list to both primary and backup keys.
    ///
    /// # Errors
    ///
    /// Returns a persistence error unless both writes succeed.
    pub fn persist(&self, symbols: &[MemorySymbol]) -> Result<()> {
        let _guard = self.guard();
        self.persist_unlocked(symbols)
    }

    fn persist_unlocked(&self, symbols: &[MemorySymbol]) -> Result<()> {
        let raw = serde_json::to_string(symbols)
            .map_err(|e| SessionError::Persistence(format!("cannot serialize memories: {e}")))?;
        // Backup first: if the second write fails the surviving copy is the
        // one `load` falls back to.
        self.blobs.put(&self.backup_key, &raw)?;
        self.blobs.put(&self.primary_key, &raw)?;
        Ok(())
    }

    /// Remove both copies, returning the vault to the empty state.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if either delete fails.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.guard();
        self.blobs.delete(&self.primary_key)?;
        self.blobs.delete(&self.backup_key)?;
        info!("memory vault cleared");
        Ok(())
    }

    /// Render the prompt-context digest of the whole vault.
    ///
    /// Regenerated fresh on every call so the latest writes are always
    /// reflected in the next session priming.
    #[must_use]
    pub fn context_string(&self) -> String {
        let symbols = self.load();

        if symbols.is_empty() {
            return "[MEMORY SYSTEM: EMPTY]\n\
                    No past memories found. Start fresh, but be ready to save \
                    important new details using the 'save_memory_symbol' tool.\n"
                .into();
        }

        let mut out = String::new();
        out.push_str(
            "================================================================\n\
             LONG-TERM MEMORY BANK (ASSOCIATIVE RECALL ENABLED)\n\
             ================================================================\n\
             The following are established facts and stories about the user.\n\
             Pay attention to the TRIGGERS. If the user mentions these words,\n\
             you must recall the associated memory.\n\n",
        );
        for symbol in &symbols {
            out.push_str(&format!(
                "• [{}] MEMORY: \"{}\"\n  TRIGGERS: {}\n  LEARNED: {}\n",
                symbol.symbol,
                symbol.meaning,
                symbol.triggers.join(", "),
                symbol.timestamp.format("%-d %B %Y"),
            ));
        }
        out.push_str(
            "\nINSTRUCTION:\n\
             1. Scan user speech for TRIGGERS.\n\
             2. If a trigger matches a memory, explicitly reference that \
             memory in your reply.\n\
             ================================================================\n",
        );
        out
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        // A poisoned lock only means a previous caller panicked mid-write;
        // the blob contents are still reconcilable.
        match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn parse_list(raw: &str) -> Option<Vec<MemorySymbol>> {
    serde_json::from_str::<Vec<MemorySymbol>>(raw).ok()
}
