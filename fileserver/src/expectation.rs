use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::sync::{Arc, RwLock};

use utilities::logger::warn;

pub type ChunkId = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpectAction {
    Nothing,
    Read,
    Write,
}

impl ExpectAction {
    pub fn from_query(value: &str) -> Option<Self> {
        match value {
            "read" => Some(ExpectAction::Read),
            "write" => Some(ExpectAction::Write),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExpectError {
    TokenExists(String),
    ChunkNotFound(String),
    ActionMismatch(String),
}

impl Display for ExpectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpectError::TokenExists(token) => {
                write!(f, "expect group already exists, token={}", token)
            }
            ExpectError::ChunkNotFound(id) => {
                write!(f, "chunk not found, id={}", id)
            }
            ExpectError::ActionMismatch(token) => {
                write!(f, "token is live with a different action, token={}", token)
            }
        }
    }
}

impl std::error::Error for ExpectError {}

enum FulfillOutcome {
    NotListed,
    Pending,
    Drained,
}

/// One live token: the permitted action plus the per-chunk consumption map.
/// The action, map and pending counter mutate together under one lock.
pub struct TokenExpectation {
    state: RwLock<ExpectationState>,
}

struct ExpectationState {
    action: ExpectAction,
    processed_chunks: HashMap<ChunkId, bool>,
    pending_count: usize,
}

impl TokenExpectation {
    fn new(action: ExpectAction, chunks: &[String]) -> Self {
        let processed_chunks: HashMap<_, _> =
            chunks.iter().map(|id| (id.clone(), false)).collect();
        let pending_count = processed_chunks.len();
        Self {
            state: RwLock::new(ExpectationState {
                action,
                processed_chunks,
                pending_count,
            }),
        }
    }

    /// The action this token still authorizes for `id`. `Nothing` for a
    /// chunk that is not listed or was already consumed.
    pub fn action_for(&self, id: &str) -> ExpectAction {
        let state = self.state.read().unwrap();
        match state.processed_chunks.get(id) {
            Some(false) => state.action,
            _ => ExpectAction::Nothing,
        }
    }

    fn mark_processed(&self, id: &str) -> FulfillOutcome {
        let mut state = self.state.write().unwrap();
        match state.processed_chunks.get_mut(id) {
            Some(done) if !*done => {
                *done = true;
                state.pending_count -= 1;
            }
            Some(_) => return FulfillOutcome::Pending,
            None => return FulfillOutcome::NotListed,
        }
        if state.pending_count == 0 {
            FulfillOutcome::Drained
        } else {
            FulfillOutcome::Pending
        }
    }
}

struct TokenEntry {
    expectation: Arc<TokenExpectation>,
    // chunk ids named by the token, fixed at registration; lets the db
    // answer reference queries without touching expectation locks
    chunks: HashSet<ChunkId>,
}

#[derive(Default)]
struct DbState {
    tokens: HashMap<String, TokenEntry>,
    obsolete: HashSet<ChunkId>,
}

/// Token → expectation map plus the obsolete set: chunk ids condemned while
/// still referenced by a live token, physically removed once the last
/// referencing token releases them.
#[derive(Default)]
pub struct ExpectationDb {
    inner: RwLock<DbState>,
}

impl ExpectationDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, token: &str) -> Option<Arc<TokenExpectation>> {
        self.inner
            .read()
            .unwrap()
            .tokens
            .get(token)
            .map(|entry| entry.expectation.clone())
    }

    /// Registers a new token. Fails if the token is already live; leaves no
    /// state behind on failure.
    pub fn set(
        &self,
        token: &str,
        action: ExpectAction,
        chunks: &[String],
    ) -> Result<(), ExpectError> {
        let mut db = self.inner.write().unwrap();
        if db.tokens.contains_key(token) {
            return Err(ExpectError::TokenExists(token.to_owned()));
        }
        db.tokens.insert(
            token.to_owned(),
            TokenEntry {
                expectation: Arc::new(TokenExpectation::new(action, chunks)),
                chunks: chunks.iter().cloned().collect(),
            },
        );
        Ok(())
    }

    /// Drops the token and returns the obsolete chunk ids whose last live
    /// reference was this token.
    pub fn remove(&self, token: &str) -> Vec<ChunkId> {
        let mut db = self.inner.write().unwrap();
        let Some(entry) = db.tokens.remove(token) else {
            return Vec::new();
        };
        let mut to_purge = Vec::new();
        for id in &entry.chunks {
            if db.obsolete.contains(id) && !referenced(&db, id) {
                db.obsolete.remove(id);
                to_purge.push(id.clone());
            }
        }
        to_purge
    }

    /// Condemns chunk ids. Ids with no live reference are returned for
    /// immediate physical removal; the rest wait in the obsolete set until
    /// `remove` releases them.
    pub fn make_obsolete(&self, ids: impl IntoIterator<Item = ChunkId>) -> Vec<ChunkId> {
        let mut db = self.inner.write().unwrap();
        let mut to_purge = Vec::new();
        for id in ids {
            if referenced(&db, &id) {
                db.obsolete.insert(id);
            } else {
                db.obsolete.remove(&id);
                to_purge.push(id);
            }
        }
        to_purge
    }

    /// Spends the (token, chunk) capability. When the token's last pending
    /// chunk is consumed the token unregisters; the returned ids must be
    /// physically removed by the caller.
    pub fn fulfill(&self, token: &str, id: &str) -> Vec<ChunkId> {
        let Some(expectation) = self.get(token) else {
            warn!(%token, chunk = %id, "attempt to fulfill expectation for unknown token");
            return Vec::new();
        };
        match expectation.mark_processed(id) {
            FulfillOutcome::NotListed => {
                warn!(%token, chunk = %id, "attempt to fulfill expectation for wrong chunk");
                Vec::new()
            }
            FulfillOutcome::Pending => Vec::new(),
            FulfillOutcome::Drained => self.remove(token),
        }
    }

    /// Grows a live token by more chunk ids (same action), registering the
    /// token first if needed. Replication tokens are extended one chunk at
    /// a time through successive calls.
    pub fn extend(
        &self,
        token: &str,
        action: ExpectAction,
        chunks: &[String],
    ) -> Result<(), ExpectError> {
        let mut db = self.inner.write().unwrap();
        if let Some(entry) = db.tokens.get_mut(token) {
            let mut state = entry.expectation.state.write().unwrap();
            if state.action != action {
                return Err(ExpectError::ActionMismatch(token.to_owned()));
            }
            for id in chunks {
                if state.processed_chunks.insert(id.clone(), false).is_none() {
                    state.pending_count += 1;
                }
            }
            drop(state);
            entry.chunks.extend(chunks.iter().cloned());
            return Ok(());
        }
        db.tokens.insert(
            token.to_owned(),
            TokenEntry {
                expectation: Arc::new(TokenExpectation::new(action, chunks)),
                chunks: chunks.iter().cloned().collect(),
            },
        );
        Ok(())
    }

    /// Cancels the token: already received chunks of a write batch become
    /// obsolete, further transfers are denied, the token unregisters. The
    /// whole mutation runs under the db write lock (plus the expectation
    /// lock for the action flip), so a racing lookup observes denial either
    /// way.
    pub fn cancel(&self, token: &str) -> Vec<ChunkId> {
        let mut db = self.inner.write().unwrap();
        let Some(expectation) = db.tokens.get(token).map(|e| e.expectation.clone()) else {
            return Vec::new();
        };
        let mut state = expectation.state.write().unwrap();
        let received: Vec<ChunkId> = state
            .processed_chunks
            .iter()
            .filter(|(_, done)| **done)
            .map(|(id, _)| id.clone())
            .collect();
        let was_write = state.action == ExpectAction::Write;
        state.action = ExpectAction::Nothing;
        drop(state);

        let Some(entry) = db.tokens.remove(token) else {
            return Vec::new();
        };
        let mut to_purge = Vec::new();
        if was_write {
            for id in received {
                if referenced(&db, &id) {
                    db.obsolete.insert(id);
                } else {
                    db.obsolete.remove(&id);
                    to_purge.push(id);
                }
            }
        }
        for id in &entry.chunks {
            if db.obsolete.contains(id) && !referenced(&db, id) {
                db.obsolete.remove(id);
                to_purge.push(id.clone());
            }
        }
        to_purge
    }
}

fn referenced(db: &DbState, id: &str) -> bool {
    db.tokens.values().any(|entry| entry.chunks.contains(id))
}
