use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::MessageRecord;

const MESSAGES: TableDefinition<&str, &[u8]> = TableDefinition::new("messages");

/// Result of a read-only message lookup. Never mutates the store.
#[derive(Debug, PartialEq)]
pub enum FetchResult {
    /// Live record.
    Found(MessageRecord),
    /// Record exists but is past its expiry time.
    Expired,
    /// Record exists but every allowed view has been consumed.
    Exhausted,
    /// No record under this id.
    NotFound,
}

/// Result of an atomic view consumption.
#[derive(Debug, PartialEq)]
pub enum ConsumeResult {
    /// The view was granted for exactly this access. `views_remaining`
    /// is the count left afterwards; `None` for unlimited records.
    Consumed {
        ciphertext: String,
        views_remaining: Option<u32>,
    },
    /// Record was past its expiry time and has been evicted.
    Expired,
    /// All views were already spent.
    Exhausted,
    /// No record under this id.
    NotFound,
}

/// Thread-safe handle to the redb store.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).context("open redb database")?;

        // Ensure the table exists so read transactions can open it.
        let write_txn = db.begin_write()?;
        write_txn.open_table(MESSAGES)?;
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }

    /// Store a new message, allocating a fresh id for it.
    /// `expiry_hours = Some(0)` produces a record that is expired on arrival.
    pub fn put(
        &self,
        ciphertext: &str,
        expiry_hours: Option<u32>,
        max_views: Option<u32>,
    ) -> Result<String> {
        let now = Self::now();
        let expires_at = expiry_hours.map(|h| now + i64::from(h) * 3600);

        let record = MessageRecord {
            ciphertext: ciphertext.to_owned(),
            created_at: now,
            expires_at,
            max_views,
            view_count: 0,
        };
        let bytes = encode(&record)?;

        let write_txn = self.db.begin_write()?;
        let id = {
            let mut table = write_txn.open_table(MESSAGES)?;
            // UUID v4 collisions are astronomically unlikely; the loop keeps
            // the id-uniqueness guarantee unconditional anyway.
            loop {
                let candidate = Uuid::new_v4().to_string();
                let taken = table.get(candidate.as_str())?.is_some();
                if !taken {
                    table.insert(candidate.as_str(), bytes.as_slice())?;
                    break candidate;
                }
            }
        };
        write_txn.commit()?;

        debug!(id = %id, "stored message");
        Ok(id)
    }

    /// Look up a message without consuming a view. Expired records are
    /// reported, not evicted: fetch never mutates.
    pub fn fetch(&self, id: &str) -> Result<FetchResult> {
        let now = Self::now();
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MESSAGES)?;

        let raw: Option<Vec<u8>> = table.get(id)?.map(|guard| guard.value().to_vec());
        match raw {
            None => Ok(FetchResult::NotFound),
            Some(bytes) => {
                let record = decode(&bytes)?;
                if record.is_expired(now) {
                    Ok(FetchResult::Expired)
                } else if record.is_exhausted() {
                    Ok(FetchResult::Exhausted)
                } else {
                    Ok(FetchResult::Found(record))
                }
            }
        }
    }

    /// Atomically consume one view of a message.
    ///
    /// The whole check-and-increment runs inside a single write transaction,
    /// so concurrent consumers serialize here: exactly one caller can take a
    /// record's final view, and everyone after it observes `Exhausted`.
    /// Exhausted records stay behind as tombstones (so later attempts are
    /// distinguishable from unknown ids) until the sweep reclaims them;
    /// expired records are evicted on the spot.
    pub fn consume_view(&self, id: &str) -> Result<ConsumeResult> {
        let now = Self::now();

        let write_txn = self.db.begin_write()?;
        let result = {
            let mut table = write_txn.open_table(MESSAGES)?;

            // Clone the raw bytes so the AccessGuard (which borrows `table`)
            // is dropped before any mutation.
            let raw: Option<Vec<u8>> = table.get(id)?.map(|guard| guard.value().to_vec());

            match raw {
                None => ConsumeResult::NotFound,
                Some(bytes) => {
                    let mut record = decode(&bytes)?;

                    if record.is_expired(now) {
                        table.remove(id)?;
                        debug!(id, "lazy-evicted expired message");
                        ConsumeResult::Expired
                    } else if record.is_exhausted() {
                        ConsumeResult::Exhausted
                    } else {
                        record.view_count += 1;
                        let views_remaining = record.views_remaining();
                        let ciphertext = record.ciphertext.clone();

                        let updated = encode(&record)?;
                        table.insert(id, updated.as_slice())?;
                        ConsumeResult::Consumed {
                            ciphertext,
                            views_remaining,
                        }
                    }
                }
            }
        };
        write_txn.commit()?;
        Ok(result)
    }

    /// Remove all expired and exhausted records. Returns the count removed.
    pub fn cleanup(&self) -> Result<usize> {
        let now = Self::now();

        // Collect dead ids in a read pass first.
        let dead: Vec<String> = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(MESSAGES)?;
            let mut ids = Vec::new();
            for item in table.iter()? {
                let (k, v) = item?;
                let record = decode(v.value())?;
                if record.is_expired(now) || record.is_exhausted() {
                    ids.push(k.value().to_owned());
                }
            }
            ids
        };

        if dead.is_empty() {
            return Ok(0);
        }

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(MESSAGES)?;
            for id in &dead {
                table.remove(id.as_str())?;
            }
        }
        write_txn.commit()?;

        let removed = dead.len();
        info!(removed, "cleaned up dead messages");
        Ok(removed)
    }

    /// Spawn a background Tokio task that calls `cleanup()` every `interval`.
    pub fn spawn_sweep(self, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await; // skip first immediate tick
            loop {
                ticker.tick().await;
                if let Err(e) = self.cleanup() {
                    warn!(error = %e, "background sweep error");
                }
            }
        });
    }
}

fn encode(record: &MessageRecord) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(record, bincode::config::standard()).context("bincode encode")
}

fn decode(bytes: &[u8]) -> Result<MessageRecord> {
    let (record, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .context("bincode decode")?;
    Ok(record)
}
