//! In-memory fakes for storage traits (testing only)
//!
//! `MemorySessionStore` keeps every record and index behind one mutex, so each
//! operation is atomic. Expiry uses `tokio::time::Instant`, which lets tests
//! drive TTLs with `tokio::time::pause` and `advance`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemorySessionStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Entry {
    record: SessionRecord,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| deadline > now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, Entry>,
    all: BTreeSet<String>,
    by_owner: HashMap<String, BTreeSet<String>>,
}

impl Inner {
    fn live(&self, id: &str, now: Instant) -> Option<&Entry> {
        self.records.get(id).filter(|e| e.is_live(now))
    }

    fn unindex(&mut self, id: &str) {
        self.all.remove(id);
        for ids in self.by_owner.values_mut() {
            ids.remove(id);
        }
    }
}

/// In-memory session store with TTL expiry and self-healing indexes.
#[derive(Debug)]
pub struct MemorySessionStore {
    inner: Mutex<Inner>,
    default_ttl: Duration,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::with_default_ttl(DEFAULT_SESSION_TTL)
    }

    pub fn with_default_ttl(default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            default_ttl,
        }
    }

    fn not_found(id: &SessionId) -> StorageError {
        StorageError::NotFound {
            session_id: id.0.clone(),
        }
    }
}

fn sorted(mut records: Vec<SessionRecord>) -> Vec<SessionRecord> {
    records.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });
    records
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    async fn create_with_ttl(
        &self,
        id: &SessionId,
        session: NewSession,
        ttl: Option<Duration>,
    ) -> StorageResult<SessionRecord> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        if inner.live(&id.0, now).is_some() {
            return Err(StorageError::AlreadyExists {
                session_id: id.0.clone(),
            });
        }

        let owner = session.owner_key().to_string();
        let record = SessionRecord::from_new(id, session, Utc::now());
        inner.unindex(&id.0);
        inner.records.insert(
            id.0.clone(),
            Entry {
                record: record.clone(),
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        inner.all.insert(id.0.clone());
        inner.by_owner.entry(owner).or_default().insert(id.0.clone());
        Ok(record)
    }

    async fn get(&self, id: &SessionId) -> StorageResult<SessionRecord> {
        let inner = self.inner.lock().unwrap();
        inner
            .live(&id.0, Instant::now())
            .map(|e| e.record.clone())
            .ok_or_else(|| Self::not_found(id))
    }

    async fn update(&self, id: &SessionId, patch: SessionPatch) -> StorageResult<SessionRecord> {
        let now = Instant::now();
        let default_ttl = self.default_ttl;
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .records
            .get_mut(&id.0)
            .filter(|e| e.is_live(now))
            .ok_or_else(|| Self::not_found(id))?;

        entry.record.apply(&patch, Utc::now());
        if entry.expires_at.is_none() {
            entry.expires_at = Some(now + default_ttl);
        }
        Ok(entry.record.clone())
    }

    async fn delete(&self, id: &SessionId) -> StorageResult<()> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let was_live = inner.live(&id.0, now).is_some();
        inner.records.remove(&id.0);
        inner.unindex(&id.0);
        if was_live {
            Ok(())
        } else {
            Err(Self::not_found(id))
        }
    }

    async fn list_all(&self) -> StorageResult<Vec<SessionRecord>> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let stale: Vec<String> = inner
            .all
            .iter()
            .filter(|id| inner.live(id, now).is_none())
            .cloned()
            .collect();
        for id in &stale {
            inner.all.remove(id);
            inner.records.remove(id);
        }

        let records = inner
            .all
            .iter()
            .filter_map(|id| inner.live(id, now))
            .map(|e| e.record.clone())
            .collect();
        Ok(sorted(records))
    }

    async fn list_by_owner(&self, owner: &str) -> StorageResult<Vec<SessionRecord>> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let Some(ids) = inner.by_owner.get(owner).cloned() else {
            return Ok(Vec::new());
        };

        let (live, stale): (Vec<String>, Vec<String>) = ids
            .into_iter()
            .partition(|id| inner.live(id, now).is_some());
        if let Some(index) = inner.by_owner.get_mut(owner) {
            for id in &stale {
                index.remove(id);
            }
        }

        let records = live
            .iter()
            .filter_map(|id| inner.live(id, now))
            .map(|e| e.record.clone())
            .collect();
        Ok(sorted(records))
    }

    async fn exists(&self, id: &SessionId) -> StorageResult<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.live(&id.0, Instant::now()).is_some())
    }

    async fn ttl_remaining(&self, id: &SessionId) -> StorageResult<Option<Duration>> {
        let now = Instant::now();
        let inner = self.inner.lock().unwrap();
        let entry = inner.live(&id.0, now).ok_or_else(|| Self::not_found(id))?;
        Ok(entry.expires_at.map(|deadline| deadline - now))
    }

    async fn index_len(&self, scope: IndexScope) -> StorageResult<usize> {
        let inner = self.inner.lock().unwrap();
        Ok(match scope {
            IndexScope::All => inner.all.len(),
            IndexScope::Owner(owner) => inner.by_owner.get(&owner).map_or(0, BTreeSet::len),
        })
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }
}
