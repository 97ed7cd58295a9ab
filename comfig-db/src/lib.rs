mod counter;
mod error;
mod models;
mod store;

pub use counter::DownloadCounters;
pub use error::{DbError, Result};
pub use models::{AnonymizedAddr, DedupRecord, KvMetadata, StoredValue};
pub use store::KeyValueStore;

use std::collections::HashMap;
use std::path::Path;
use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::{OptionalExtension, params};
use tracing::{debug, info, warn};

/// Database wrapper for all comfig storage: the key-value entries backing the
/// quickplay server list and the durable state of the download counters.
#[derive(Clone)]
pub struct Database {
  conn: Connection,
}

impl Database {
  /// Open or create a database at the given path.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = Connection::open(path).await.map_err(DbError::Sqlite)?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Create an in-memory database (useful for testing).
  pub async fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .await
      .map_err(DbError::Sqlite)?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Initialize the database schema.
  async fn initialize(&self) -> Result<()> {
    self.conn
            .call(|conn| {
                // Enable WAL mode for better concurrent read/write performance
                conn.pragma_update(None, "journal_mode", "WAL")?;

                // Enable foreign key constraints (must be set per-connection)
                conn.pragma_update(None, "foreign_keys", "ON")?;

                conn.execute_batch(
                    r#"
                    -- Published blobs (server list, schema) with publisher metadata
                    CREATE TABLE IF NOT EXISTS kv_entries (
                        key TEXT PRIMARY KEY,
                        value TEXT NOT NULL,
                        valid_until INTEGER
                    );

                    -- One row per download counter
                    CREATE TABLE IF NOT EXISTS download_counters (
                        counter_id TEXT PRIMARY KEY,
                        tally INTEGER NOT NULL DEFAULT 0 CHECK (tally >= 0)
                    );

                    -- Last accepted download per anonymized address
                    CREATE TABLE IF NOT EXISTS download_seen (
                        counter_id TEXT NOT NULL REFERENCES download_counters(counter_id) ON DELETE CASCADE,
                        address TEXT NOT NULL,
                        last_seen INTEGER NOT NULL,
                        PRIMARY KEY (counter_id, address)
                    );
                    "#,
                )?;
                Ok(())
            })
            .await?;

    info!("database initialized");
    Ok(())
  }

  // ========================================================================
  // Key-value entries
  // ========================================================================

  /// Get a stored value and its metadata.
  /// Returns None if the key was never written.
  pub async fn kv_get(&self, key: String) -> Result<Option<StoredValue>> {
    let entry = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached("SELECT value, valid_until FROM kv_entries WHERE key = ?1")?
          .query_row(params![&key], |row| {
            Ok(StoredValue {
              value: row.get(0)?,
              metadata: KvMetadata { until: row.get(1)? },
            })
          })
          .optional()
      })
      .await?;

    Ok(entry)
  }

  /// Replace the value and metadata stored under a key.
  pub async fn kv_put(&self, key: String, value: String, metadata: KvMetadata) -> Result<()> {
    let size = value.len();
    let key_log = key.clone();

    self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            r#"
            INSERT INTO kv_entries (key, value, valid_until) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, valid_until = excluded.valid_until
            "#,
          )?
          .execute(params![&key, &value, metadata.until])?;
        Ok(())
      })
      .await?;

    debug!(key = %key_log, size, until = ?metadata.until, "stored kv entry");
    Ok(())
  }

  // ========================================================================
  // Download counters
  // ========================================================================

  /// Load the full durable state of a download counter.
  /// A counter that was never incremented loads as an empty record.
  pub async fn load_dedup_record(&self, counter_id: String) -> Result<DedupRecord> {
    let (tally, seen) = self
      .conn
      .call(move |conn| {
        let tally: Option<i64> = conn
          .prepare_cached("SELECT tally FROM download_counters WHERE counter_id = ?1")?
          .query_row(params![&counter_id], |row| row.get(0))
          .optional()?;

        let mut stmt = conn
          .prepare_cached("SELECT address, last_seen FROM download_seen WHERE counter_id = ?1")?;

        let seen = stmt
          .query_map(params![&counter_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
          })?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok((tally.unwrap_or(0), seen))
      })
      .await?;

    let mut last_seen = HashMap::with_capacity(seen.len());
    for (address, at) in seen {
      match AnonymizedAddr::try_from(address.as_str()) {
        Ok(address) => {
          last_seen.insert(address, at);
        }
        Err(_) => warn!(%address, "ignoring oversized stored address"),
      }
    }

    Ok(DedupRecord { tally, last_seen })
  }

  /// Record an accepted download: stamp the address and bump the tally.
  /// Both writes happen in one transaction. Returns the new tally.
  pub async fn record_download(
    &self,
    counter_id: String,
    address: AnonymizedAddr,
    now: i64,
  ) -> Result<i64> {
    let tally = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let tally: i64 = tx
                    .prepare_cached(
                        r#"
                        INSERT INTO download_counters (counter_id, tally) VALUES (?1, 1)
                        ON CONFLICT(counter_id) DO UPDATE SET tally = tally + 1
                        RETURNING tally
                        "#,
                    )?
                    .query_row(params![&counter_id], |row| row.get(0))?;

                // Addresses past their cooldown count the same as unseen ones
                tx.prepare_cached(
                    "DELETE FROM download_seen WHERE counter_id = ?1 AND last_seen <= ?2",
                )?
                    .execute(params![&counter_id, now - DedupRecord::COOLDOWN_MS])?;

                tx.prepare_cached(
                    "INSERT OR REPLACE INTO download_seen (counter_id, address, last_seen) VALUES (?1, ?2, ?3)",
                )?
                    .execute(params![&counter_id, address.as_str(), now])?;

                tx.commit()?;
                Ok(tally)
            })
            .await?;

    debug!(tally, "recorded download");
    Ok(tally)
  }

  /// Get the current tally of a download counter (0 if it never counted).
  pub async fn get_tally(&self, counter_id: String) -> Result<i64> {
    let tally = self
      .conn
      .call(move |conn| {
        let tally: Option<i64> = conn
          .prepare_cached("SELECT tally FROM download_counters WHERE counter_id = ?1")?
          .query_row(params![&counter_id], |row| row.get(0))
          .optional()?;

        Ok(tally.unwrap_or(0))
      })
      .await?;

    Ok(tally)
  }
}
