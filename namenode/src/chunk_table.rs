use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use utilities::logger::{info, warn};

use crate::pool::Pool;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaStatus {
    Pending,
    Ok,
}

/// Replica placement of one chunk: which file servers hold (or are about
/// to hold) a copy, keyed by their public address.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub file: String,
    pub statuses: HashMap<String, ReplicaStatus>,
    pub all_replicas: usize,
    pub ready_replicas: usize,
}

/// One fan-out order: `source_addr` pushes `chunk_id` to `dest_addr` under
/// a fresh token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicationJob {
    pub chunk_id: String,
    pub token: String,
    pub source_addr: String,
    pub dest_addr: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChunkTableState {
    records: HashMap<String, ChunkRecord>,
    // chunks that could not reach the target count for lack of receivers
    deferred: Vec<String>,
}

/// Tracks replica placement per chunk and schedules fan-out towards the
/// target replica count. Never performs I/O under its lock; callers
/// dispatch the returned jobs on background tasks.
pub struct ChunkTable {
    inner: Mutex<ChunkTableState>,
    target_replicas: usize,
}

impl ChunkTable {
    pub fn new(target_replicas: usize) -> Self {
        Self {
            inner: Mutex::new(ChunkTableState::default()),
            target_replicas,
        }
    }

    pub fn from_state(state: ChunkTableState, target_replicas: usize) -> Self {
        Self {
            inner: Mutex::new(state),
            target_replicas,
        }
    }

    pub fn export_state(&self) -> ChunkTableState {
        self.inner.lock().unwrap().clone()
    }

    /// Seam for the client placement path: the chunk was handed to
    /// `initial_addr` and awaits its first confirmation.
    pub fn register_chunk(&self, chunk_id: &str, file: &str, initial_addr: &str) {
        let mut state = self.inner.lock().unwrap();
        state.records.insert(
            chunk_id.to_owned(),
            ChunkRecord {
                file: file.to_owned(),
                statuses: HashMap::from([(initial_addr.to_owned(), ReplicaStatus::Pending)]),
                all_replicas: 1,
                ready_replicas: 0,
            },
        );
    }

    pub fn record(&self, chunk_id: &str) -> Option<ChunkRecord> {
        self.inner.lock().unwrap().records.get(chunk_id).cloned()
    }

    /// A file server confirmed it durably holds the chunk. Marks the
    /// replica ready and computes the next fan-out round. Returns the
    /// owning file (so its pending set can be updated) and the jobs to
    /// dispatch.
    pub fn confirm_received(
        &self,
        chunk_id: &str,
        sender_addr: &str,
        pool: &Pool,
    ) -> (Option<String>, Vec<ReplicationJob>) {
        let mut state = self.inner.lock().unwrap();
        let Some(record) = state.records.get_mut(chunk_id) else {
            warn!(chunk = %chunk_id, sender = %sender_addr, "confirmation for unknown chunk, skipping");
            return (None, Vec::new());
        };
        let Some(status) = record.statuses.get_mut(sender_addr) else {
            warn!(chunk = %chunk_id, sender = %sender_addr, "confirmation from a host that should not hold this chunk");
            return (None, Vec::new());
        };
        if *status != ReplicaStatus::Ok {
            *status = ReplicaStatus::Ok;
            record.ready_replicas += 1;
        }
        let file = record.file.clone();

        let (jobs, defer) = fan_out(&mut state, self.target_replicas, pool, chunk_id);
        if defer && !state.deferred.iter().any(|id| id == chunk_id) {
            state.deferred.push(chunk_id.to_owned());
        }
        (Some(file), jobs)
    }

    /// Re-drives chunks whose fan-out stalled for lack of live receivers.
    /// Called when a file server comes back to life.
    pub fn retry_deferred(&self, pool: &Pool) -> Vec<ReplicationJob> {
        let mut state = self.inner.lock().unwrap();
        let pending = std::mem::take(&mut state.deferred);
        let mut jobs = Vec::new();
        for chunk_id in pending {
            let (mut round, defer) = fan_out(&mut state, self.target_replicas, pool, &chunk_id);
            if defer {
                state.deferred.push(chunk_id.clone());
            }
            if !round.is_empty() {
                info!(chunk = %chunk_id, jobs = round.len(), "retrying deferred replication");
            }
            jobs.append(&mut round);
        }
        jobs
    }
}

// one replication round for a chunk: pair up ready senders with live
// receivers that do not hold a replica yet
fn fan_out(
    state: &mut ChunkTableState,
    target_replicas: usize,
    pool: &Pool,
    chunk_id: &str,
) -> (Vec<ReplicationJob>, bool) {
    let Some(record) = state.records.get_mut(chunk_id) else {
        return (Vec::new(), false);
    };
    let mut remaining = target_replicas.saturating_sub(record.all_replicas);
    if remaining == 0 {
        return (Vec::new(), false);
    }
    let senders: Vec<String> = record
        .statuses
        .iter()
        .filter(|(_, status)| **status == ReplicaStatus::Ok)
        .map(|(addr, _)| addr.clone())
        .take(remaining)
        .collect();
    remaining = remaining.min(senders.len());

    let receivers = pool.select_several_except(&senders, remaining);
    if receivers.is_empty() {
        warn!(chunk = %chunk_id, "chunk cannot be replicated further, no free file server left");
        return (Vec::new(), record.all_replicas < target_replicas);
    }

    let mut jobs = Vec::new();
    for (sender, receiver) in senders.iter().zip(receivers) {
        let dest = receiver.addr();
        // only the senders are excluded, so the walk can hand back a host
        // that already holds or awaits a copy; count only new placements
        if !record.statuses.contains_key(&dest) {
            record.statuses.insert(dest.clone(), ReplicaStatus::Pending);
            record.all_replicas += 1;
        }
        jobs.push(ReplicationJob {
            chunk_id: chunk_id.to_owned(),
            token: uuid::Uuid::new_v4().to_string(),
            source_addr: sender.clone(),
            dest_addr: dest,
        });
    }
    (jobs, record.all_replicas < target_replicas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{FsStatus, PoolMember};

    fn pool(n: usize) -> Pool {
        let pool = Pool::new(
            (0..n)
                .map(|i| PoolMember {
                    host: format!("10.0.0.{i}"),
                    port: 3000,
                    private_host: format!("10.1.0.{i}"),
                })
                .collect(),
        );
        for id in 0..n {
            pool.change_status(id, FsStatus::Live);
        }
        pool
    }

    fn addr(i: usize) -> String {
        format!("10.0.0.{i}:3000")
    }

    #[test]
    fn confirmation_marks_the_replica_ready() {
        let pool = pool(1);
        let table = ChunkTable::new(1);
        table.register_chunk("c", "/data/file", &addr(0));

        let (file, jobs) = table.confirm_received("c", &addr(0), &pool);
        assert_eq!(file, Some("/data/file".to_owned()));
        assert!(jobs.is_empty());

        let record = table.record("c").unwrap();
        assert_eq!(record.ready_replicas, 1);
        assert_eq!(record.all_replicas, 1);
        assert_eq!(record.statuses[&addr(0)], ReplicaStatus::Ok);
    }

    #[test]
    fn confirmation_fans_out_towards_the_target() {
        let pool = pool(3);
        let table = ChunkTable::new(2);
        table.register_chunk("c", "/data/file", &addr(0));

        // one ready sender, so one receiver this round, excluded from the
        // sender set
        let (_, jobs) = table.confirm_received("c", &addr(0), &pool);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].source_addr, addr(0));
        assert_eq!(jobs[0].dest_addr, addr(1));
        assert!(!jobs[0].token.is_empty());

        let record = table.record("c").unwrap();
        assert_eq!(record.all_replicas, 2);
        assert_eq!(record.ready_replicas, 1);
        assert_eq!(record.statuses[&jobs[0].dest_addr], ReplicaStatus::Pending);

        // the receiver's confirmation completes the set
        let (_, jobs) = table.confirm_received("c", &addr(1), &pool);
        assert!(jobs.is_empty());
        let record = table.record("c").unwrap();
        assert_eq!(record.all_replicas, 2);
        assert_eq!(record.ready_replicas, 2);
    }

    #[test]
    fn existing_holder_as_receiver_is_not_counted_twice() {
        let pool = pool(2);
        let table = ChunkTable::new(3);
        table.register_chunk("c", "/f", &addr(0));

        let (_, jobs) = table.confirm_received("c", &addr(0), &pool);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].dest_addr, addr(1));

        // both live nodes hold a copy, so the walk can only return the
        // other holder; the push is still issued (the peer refuses the
        // duplicate) but the counters must not move
        let (_, jobs) = table.confirm_received("c", &addr(1), &pool);
        assert_eq!(jobs.len(), 1);
        let record = table.record("c").unwrap();
        assert_eq!(record.all_replicas, 2);
        assert_eq!(record.ready_replicas, 2);
        assert!(record
            .statuses
            .values()
            .all(|status| *status == ReplicaStatus::Ok));
    }

    #[test]
    fn unknown_chunk_or_sender_is_ignored() {
        let pool = pool(2);
        let table = ChunkTable::new(2);
        let (file, jobs) = table.confirm_received("ghost", &addr(0), &pool);
        assert_eq!(file, None);
        assert!(jobs.is_empty());

        table.register_chunk("c", "/f", &addr(0));
        let (file, jobs) = table.confirm_received("c", &addr(1), &pool);
        assert_eq!(file, None);
        assert!(jobs.is_empty());
        assert_eq!(table.record("c").unwrap().ready_replicas, 0);
    }

    #[test]
    fn duplicate_confirmation_does_not_inflate_counts() {
        let pool = pool(1);
        let table = ChunkTable::new(1);
        table.register_chunk("c", "/f", &addr(0));
        table.confirm_received("c", &addr(0), &pool);
        table.confirm_received("c", &addr(0), &pool);
        assert_eq!(table.record("c").unwrap().ready_replicas, 1);
    }

    #[test]
    fn starved_fan_out_defers_and_retries_on_resurrection() {
        let pool = pool(2);
        pool.change_status(1, FsStatus::Dead);
        let table = ChunkTable::new(2);
        table.register_chunk("c", "/f", &addr(0));

        // only the holder is alive: no receiver, the chunk is deferred
        let (_, jobs) = table.confirm_received("c", &addr(0), &pool);
        assert!(jobs.is_empty());
        assert_eq!(table.record("c").unwrap().all_replicas, 1);

        // nothing changes while the pool is still starved
        assert!(table.retry_deferred(&pool).is_empty());

        pool.change_status(1, FsStatus::Live);
        let jobs = table.retry_deferred(&pool);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].dest_addr, addr(1));

        // the retry consumed the deferral
        assert!(table.retry_deferred(&pool).is_empty());
    }
}
