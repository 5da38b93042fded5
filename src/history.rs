//! Utterance history ledger
//!
//! Newest-first record of everything the user said, written through to the
//! key-value store on every append so an abrupt teardown loses nothing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::db::KvStore;

/// Fixed key the ledger is stored under
pub const HISTORY_KEY: &str = "parley.history";

/// One finalized transcript and when it was captured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Utterance {
    /// Stamp a transcript with the current time
    #[must_use]
    pub fn now(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only, persisted utterance history
pub struct HistoryLedger {
    store: KvStore,
    entries: Vec<Utterance>,
    max_entries: Option<usize>,
}

impl HistoryLedger {
    /// Load the ledger from the store
    ///
    /// A corrupt record is logged and replaced by an empty ledger.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    pub fn load(store: KvStore, max_entries: Option<usize>) -> Result<Self> {
        let entries = match store.get(HISTORY_KEY)? {
            Some(raw) => serde_json::from_str::<Vec<Utterance>>(&raw).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "history record is corrupt, starting empty");
                Vec::new()
            }),
            None => Vec::new(),
        };

        tracing::debug!(entries = entries.len(), ?max_entries, "history loaded");

        let mut ledger = Self {
            store,
            entries,
            max_entries,
        };
        ledger.enforce_retention();
        Ok(ledger)
    }

    /// Stamp and append a transcript
    ///
    /// # Errors
    ///
    /// Returns error if the ledger cannot be persisted
    pub fn record(&mut self, text: &str) -> Result<Utterance> {
        let utterance = Utterance::now(text);
        self.append(utterance.clone())?;
        Ok(utterance)
    }

    /// Append an utterance at the front and flush
    ///
    /// The entry stays in memory even if the flush fails.
    ///
    /// # Errors
    ///
    /// Returns error if the ledger cannot be persisted
    pub fn append(&mut self, utterance: Utterance) -> Result<()> {
        self.entries.insert(0, utterance);
        self.enforce_retention();
        self.flush()
    }

    /// Remove every entry and the persisted record
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be written
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.store.remove(HISTORY_KEY)
    }

    /// Entries, newest first
    #[must_use]
    pub fn entries(&self) -> &[Utterance] {
        &self.entries
    }

    /// Most recent utterance
    #[must_use]
    pub fn latest(&self) -> Option<&Utterance> {
        self.entries.first()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn enforce_retention(&mut self) {
        if let Some(max) = self.max_entries
            && self.entries.len() > max
        {
            let dropped = self.entries.len() - max;
            self.entries.truncate(max);
            tracing::debug!(dropped, max, "history retention applied");
        }
    }

    fn flush(&self) -> Result<()> {
        let raw = serde_json::to_string(&self.entries)?;
        self.store.set(HISTORY_KEY, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> KvStore {
        KvStore::new(crate::db::init_memory().unwrap())
    }

    #[test]
    fn newest_first() {
        let mut ledger = HistoryLedger::load(store(), None).unwrap();
        ledger.record("first").unwrap();
        ledger.record("second").unwrap();

        let texts: Vec<_> = ledger.entries().iter().map(|u| u.text.as_str()).collect();
        assert_eq!(texts, ["second", "first"]);
        assert_eq!(ledger.latest().unwrap().text, "second");
    }

    #[test]
    fn reload_yields_identical_sequence() {
        let kv = store();
        let mut ledger = HistoryLedger::load(kv.clone(), None).unwrap();
        ledger.record("open youtube").unwrap();
        ledger.record("क्या समय हुआ है").unwrap();
        ledger.record("search images of cats").unwrap();

        let reloaded = HistoryLedger::load(kv, None).unwrap();
        assert_eq!(reloaded.entries(), ledger.entries());
    }

    #[test]
    fn clear_removes_the_record_and_is_idempotent() {
        let kv = store();
        let mut ledger = HistoryLedger::load(kv.clone(), None).unwrap();
        ledger.record("hello").unwrap();

        ledger.clear().unwrap();
        ledger.clear().unwrap();

        assert!(ledger.is_empty());
        assert!(kv.get(HISTORY_KEY).unwrap().is_none());
    }

    #[test]
    fn retention_drops_oldest() {
        let mut ledger = HistoryLedger::load(store(), Some(2)).unwrap();
        ledger.record("a").unwrap();
        ledger.record("b").unwrap();
        ledger.record("c").unwrap();

        let texts: Vec<_> = ledger.entries().iter().map(|u| u.text.as_str()).collect();
        assert_eq!(texts, ["c", "b"]);
    }

    #[test]
    fn corrupt_record_starts_empty() {
        let kv = store();
        kv.set(HISTORY_KEY, "{not json").unwrap();

        let ledger = HistoryLedger::load(kv, None).unwrap();
        assert!(ledger.is_empty());
    }
}
