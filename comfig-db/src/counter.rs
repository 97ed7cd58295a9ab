//! Per-identifier download counters.
//!
//! Every counter id is owned by a single actor. All operations on one id run
//! one at a time behind that actor's lock, so two downloads from the same
//! address inside the cooldown can never both be counted. Different ids never
//! contend with each other.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::{AnonymizedAddr, Database, DbError, DedupRecord, Result};

/// State owned by one counter id.
struct CounterActor {
    id: String,
    /// Resident copy of the durable record, loaded on first use.
    /// `None` also after an interrupted write, which forces a reload.
    record: Option<DedupRecord>,
}

impl CounterActor {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            record: None,
        }
    }

    async fn load(&mut self, db: &Database) -> Result<DedupRecord> {
        match self.record.take() {
            Some(record) => Ok(record),
            None => {
                let record = db.load_dedup_record(self.id.clone()).await?;
                debug!(counter = %self.id, tally = record.tally, known = record.last_seen.len(), "loaded counter");
                Ok(record)
            }
        }
    }

    async fn increment(&mut self, db: &Database, address: AnonymizedAddr, now: i64) -> Result<bool> {
        let mut record = self.load(db).await?;

        if !record.accepts(&address, now) {
            self.record = Some(record);
            return Ok(false);
        }

        // The record stays taken while the write is in flight.
        let tally = db.record_download(self.id.clone(), address, now).await?;
        record.prune_expired(now);
        record.last_seen.insert(address, now);
        record.tally = tally;
        self.record = Some(record);
        Ok(true)
    }

    async fn tally(&mut self, db: &Database) -> Result<i64> {
        let record = self.load(db).await?;
        let tally = record.tally;
        self.record = Some(record);
        Ok(tally)
    }
}

/// Registry mapping counter ids to their actors.
/// Actors are created lazily and live as long as the registry.
#[derive(Clone)]
pub struct DownloadCounters {
    db: Database,
    actors: Arc<scc::HashMap<String, Arc<Mutex<CounterActor>>>>,
}

impl DownloadCounters {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            actors: Arc::new(scc::HashMap::new()),
        }
    }

    /// Find the actor for `id`, creating it on first use.
    async fn actor(&self, id: &str) -> Result<Arc<Mutex<CounterActor>>> {
        if id.is_empty() {
            return Err(DbError::EmptyCounterId);
        }

        loop {
            if let Some(actor) = self.actors.read_async(id, |_, actor| actor.clone()).await {
                return Ok(actor);
            }

            let actor = Arc::new(Mutex::new(CounterActor::new(id)));
            // Lost the race to another caller: read theirs on the next pass.
            if self
                .actors
                .insert_async(id.to_string(), actor.clone())
                .await
                .is_ok()
            {
                return Ok(actor);
            }
        }
    }

    /// Count a download from `address` unless the same address was counted
    /// within the last 24 hours. Returns whether it was counted.
    pub async fn increment(&self, id: &str, address: AnonymizedAddr, now: i64) -> Result<bool> {
        let actor = self.actor(id).await?;
        let mut actor = actor.lock().await;
        let accepted = actor.increment(&self.db, address, now).await?;

        debug!(counter = %id, accepted, "download increment");
        Ok(accepted)
    }

    /// Current number of counted downloads for `id`.
    pub async fn tally(&self, id: &str) -> Result<i64> {
        let actor = self.actor(id).await?;
        let mut actor = actor.lock().await;
        actor.tally(&self.db).await
    }
}
