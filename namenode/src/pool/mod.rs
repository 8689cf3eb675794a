pub mod watchdog;

use std::collections::HashSet;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsStatus {
    Live,
    PartiallyDead,
    Dead,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeathLevel {
    Soft,
    Hard,
}

#[derive(Clone, Debug)]
pub struct PoolMember {
    pub host: String,
    pub port: u16,
    // source address heartbeats and confirmations arrive from
    pub private_host: String,
}

/// One file server entry. The ring fields live under the pool lock; the
/// pulse stamp is written lock free by the heartbeat handler and read by
/// the watchdogs under a known-stale tolerance.
#[derive(Debug)]
pub struct FsNode {
    pub id: usize,
    pub host: String,
    pub port: u16,
    pub private_host: String,
    last_pulse: AtomicU64,
}

impl FsNode {
    /// Public `host:port` clients and peers talk to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClusterEmpty;

impl Display for ClusterEmpty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no live file server in the pool")
    }
}

impl std::error::Error for ClusterEmpty {}

struct RingState {
    status: Vec<FsStatus>,
    next_alive: Vec<usize>,
    next: usize,
    alive_count: usize,
}

/// Circular pool of file servers. Placement walks `next_alive` links so
/// round robin over live nodes skips dead entries in O(1).
pub struct Pool {
    nodes: Vec<Arc<FsNode>>,
    ring: Mutex<RingState>,
    epoch: Instant,
    soft_tx: mpsc::Sender<usize>,
    hard_tx: mpsc::Sender<usize>,
    pub(crate) soft_rx: Mutex<Option<mpsc::Receiver<usize>>>,
    pub(crate) hard_rx: Mutex<Option<mpsc::Receiver<usize>>>,
}

impl Pool {
    /// Nodes start `Dead`; the first heartbeat resurrects them through the
    /// hard watchdog.
    pub fn new(members: Vec<PoolMember>) -> Self {
        let count = members.len();
        let nodes = members
            .into_iter()
            .enumerate()
            .map(|(id, member)| {
                Arc::new(FsNode {
                    id,
                    host: member.host,
                    port: member.port,
                    private_host: member.private_host,
                    last_pulse: AtomicU64::new(0),
                })
            })
            .collect();
        let (soft_tx, soft_rx) = mpsc::channel(1);
        let (hard_tx, hard_rx) = mpsc::channel(1);
        Self {
            nodes,
            ring: Mutex::new(RingState {
                status: vec![FsStatus::Dead; count],
                next_alive: (0..count).map(|i| (i + 1) % count.max(1)).collect(),
                next: 0,
                alive_count: 0,
            }),
            epoch: Instant::now(),
            soft_tx,
            hard_tx,
            soft_rx: Mutex::new(Some(soft_rx)),
            hard_rx: Mutex::new(Some(hard_rx)),
        }
    }

    pub fn nodes(&self) -> &[Arc<FsNode>] {
        &self.nodes
    }

    pub fn node(&self, id: usize) -> &Arc<FsNode> {
        &self.nodes[id]
    }

    pub fn find_by_private_host(&self, private_host: &str) -> Option<&Arc<FsNode>> {
        self.nodes
            .iter()
            .find(|node| node.private_host == private_host)
    }

    /// Records a heartbeat. The pulse stamp is written without the pool
    /// lock; the watchdog queues are single slot and a publish to a full
    /// queue is dropped, never blocked on.
    pub fn pulse(&self, private_host: &str) -> bool {
        let Some(node) = self.find_by_private_host(private_host) else {
            return false;
        };
        node.last_pulse
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
        let _ = self.soft_tx.try_send(node.id);
        let _ = self.hard_tx.try_send(node.id);
        true
    }

    pub fn status(&self, id: usize) -> FsStatus {
        self.ring.lock().unwrap().status[id]
    }

    pub fn alive_count(&self) -> usize {
        self.ring.lock().unwrap().alive_count
    }

    pub fn is_dead(&self, id: usize, level: DeathLevel) -> bool {
        let status = self.status(id);
        match level {
            DeathLevel::Soft => status == FsStatus::PartiallyDead,
            DeathLevel::Hard => status == FsStatus::Dead,
        }
    }

    /// Next live node in round robin order.
    pub fn select(&self) -> Result<Arc<FsNode>, ClusterEmpty> {
        let mut ring = self.ring.lock().unwrap();
        if ring.alive_count == 0 || self.nodes.is_empty() {
            return Err(ClusterEmpty);
        }
        let mut cur = ring.next % self.nodes.len();
        for _ in 0..=self.nodes.len() {
            if ring.status[cur] == FsStatus::Live {
                ring.next = ring.next_alive[cur];
                return Ok(self.nodes[cur].clone());
            }
            cur = ring.next_alive[cur];
        }
        Err(ClusterEmpty)
    }

    /// Up to `n` distinct live nodes whose public address is not in
    /// `except`. Fewer are returned when the pool cannot satisfy `n`.
    pub fn select_several_except(&self, except: &[String], n: usize) -> Vec<Arc<FsNode>> {
        let ring = self.ring.lock().unwrap();
        if ring.alive_count == 0 || n == 0 || self.nodes.is_empty() {
            return Vec::new();
        }
        let except: HashSet<&str> = except.iter().map(String::as_str).collect();

        // find a live entry point first
        let mut cur = ring.next % self.nodes.len();
        let mut hops = 0;
        while ring.status[cur] != FsStatus::Live {
            cur = ring.next_alive[cur];
            hops += 1;
            if hops > self.nodes.len() {
                return Vec::new();
            }
        }

        let start = cur;
        let mut selected = Vec::new();
        loop {
            if ring.status[cur] == FsStatus::Live && !except.contains(self.nodes[cur].addr().as_str())
            {
                selected.push(self.nodes[cur].clone());
                if selected.len() == n {
                    break;
                }
            }
            cur = ring.next_alive[cur];
            if cur == start {
                break;
            }
        }
        selected
    }

    /// Moves a node between death levels and repairs the `next_alive`
    /// links. All ring mutations happen under the pool lock.
    pub fn change_status(&self, id: usize, status: FsStatus) {
        let mut ring = self.ring.lock().unwrap();
        let was_live = ring.status[id] == FsStatus::Live;
        ring.status[id] = status;
        let now_live = status == FsStatus::Live;
        if was_live == now_live {
            return;
        }
        let len = self.nodes.len();
        if now_live {
            ring.alive_count += 1;
            // predecessors up to the previous live node now point here
            let from = if id == 0 { len - 1 } else { id - 1 };
            repaint(&mut ring, from, id, len);
            // a lone resurrected node must point at itself
            if ring.alive_count == 1 {
                ring.next_alive[id] = id;
            }
        } else {
            ring.alive_count -= 1;
            let successor = ring.next_alive[id];
            repaint(&mut ring, id, successor, len);
        }
    }

    /// The node whose pulse is oldest at this death level, plus how long
    /// until it crosses the period. `None` when no node qualifies.
    pub fn oldest_pulse(&self, level: DeathLevel, period: Duration) -> (Option<usize>, Duration) {
        let ring = self.ring.lock().unwrap();
        let now = self.epoch.elapsed();
        let mut oldest: Option<usize> = None;
        let mut oldest_age = Duration::ZERO;
        for (i, node) in self.nodes.iter().enumerate() {
            let eligible = match level {
                DeathLevel::Soft => ring.status[i] == FsStatus::Live,
                DeathLevel::Hard => ring.status[i] != FsStatus::Dead,
            };
            if !eligible {
                continue;
            }
            let pulse = Duration::from_millis(node.last_pulse.load(Ordering::Relaxed));
            let age = now.saturating_sub(pulse);
            if age > oldest_age {
                oldest_age = age;
                oldest = Some(i);
            }
        }
        (oldest, period.saturating_sub(oldest_age))
    }
}

// walk backwards from `from` repainting next_alive to `target`, stopping
// once a live node has been repainted or after one full circle
fn repaint(ring: &mut RingState, from: usize, target: usize, len: usize) {
    let mut i = from;
    for _ in 0..len {
        ring.next_alive[i] = target;
        if ring.status[i] == FsStatus::Live {
            break;
        }
        i = if i == 0 { len - 1 } else { i - 1 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(n: usize) -> Vec<PoolMember> {
        (0..n)
            .map(|i| PoolMember {
                host: format!("10.0.0.{i}"),
                port: 3000,
                private_host: format!("10.1.0.{i}"),
            })
            .collect()
    }

    fn all_live(pool: &Pool) {
        for id in 0..pool.nodes().len() {
            pool.change_status(id, FsStatus::Live);
        }
    }

    // walking next_alive from any live node must land on a live node in at
    // most len hops
    fn assert_ring_invariant(pool: &Pool) {
        let len = pool.nodes().len();
        let ring = pool.ring.lock().unwrap();
        for start in 0..len {
            if ring.status[start] != FsStatus::Live {
                continue;
            }
            let mut cur = ring.next_alive[start];
            let mut hops = 1;
            while ring.status[cur] != FsStatus::Live {
                cur = ring.next_alive[cur];
                hops += 1;
                assert!(hops <= len, "ring walk from {start} found no live node");
            }
        }
    }

    #[test]
    fn select_fails_on_empty_cluster() {
        let pool = Pool::new(members(3));
        assert_eq!(pool.select().unwrap_err(), ClusterEmpty);
    }

    #[test]
    fn select_round_robins_over_live_nodes() {
        let pool = Pool::new(members(3));
        all_live(&pool);
        let picks: Vec<usize> = (0..6).map(|_| pool.select().unwrap().id).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn select_skips_dead_nodes() {
        let pool = Pool::new(members(4));
        all_live(&pool);
        pool.change_status(1, FsStatus::Dead);
        pool.change_status(2, FsStatus::PartiallyDead);
        assert_ring_invariant(&pool);

        let picks: Vec<usize> = (0..4).map(|_| pool.select().unwrap().id).collect();
        assert_eq!(picks, vec![0, 3, 0, 3]);
    }

    #[test]
    fn last_live_node_points_at_itself() {
        let pool = Pool::new(members(3));
        all_live(&pool);
        pool.change_status(0, FsStatus::Dead);
        pool.change_status(2, FsStatus::Dead);

        let ring = pool.ring.lock().unwrap();
        assert_eq!(ring.next_alive[1], 1);
        drop(ring);
        assert_eq!(pool.select().unwrap().id, 1);
        assert_eq!(pool.select().unwrap().id, 1);
    }

    #[test]
    fn killing_every_node_empties_the_cluster() {
        let pool = Pool::new(members(3));
        all_live(&pool);
        for id in 0..3 {
            pool.change_status(id, FsStatus::Dead);
        }
        assert_eq!(pool.alive_count(), 0);
        assert_eq!(pool.select().unwrap_err(), ClusterEmpty);
    }

    #[test]
    fn resurrection_repairs_the_ring() {
        let pool = Pool::new(members(4));
        all_live(&pool);
        pool.change_status(2, FsStatus::Dead);
        assert_ring_invariant(&pool);
        pool.change_status(2, FsStatus::Live);
        assert_ring_invariant(&pool);

        let mut picks: Vec<usize> = (0..4).map(|_| pool.select().unwrap().id).collect();
        picks.sort();
        assert_eq!(picks, vec![0, 1, 2, 3]);
    }

    #[test]
    fn lone_node_resurrection_after_total_death() {
        let pool = Pool::new(members(3));
        all_live(&pool);
        for id in 0..3 {
            pool.change_status(id, FsStatus::Dead);
        }
        pool.change_status(1, FsStatus::Live);
        assert_ring_invariant(&pool);
        assert_eq!(pool.select().unwrap().id, 1);
    }

    #[test]
    fn select_several_excludes_hosts() {
        let pool = Pool::new(members(4));
        all_live(&pool);

        let picked = pool.select_several_except(&["10.0.0.1:3000".to_owned()], 4);
        let mut ids: Vec<usize> = picked.iter().map(|n| n.id).collect();
        ids.sort();
        assert_eq!(ids, vec![0, 2, 3]);
    }

    #[test]
    fn select_several_caps_at_alive_count() {
        let pool = Pool::new(members(4));
        all_live(&pool);
        pool.change_status(0, FsStatus::Dead);
        pool.change_status(3, FsStatus::PartiallyDead);

        let picked = pool.select_several_except(&[], 10);
        let mut ids: Vec<usize> = picked.iter().map(|n| n.id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn select_several_returns_distinct_nodes() {
        let pool = Pool::new(members(2));
        all_live(&pool);
        let picked = pool.select_several_except(&[], 5);
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn pulse_from_unknown_host_is_rejected() {
        let pool = Pool::new(members(2));
        assert!(!pool.pulse("10.9.9.9"));
        assert!(pool.pulse("10.1.0.0"));
    }

    #[test]
    fn oldest_pulse_ignores_ineligible_nodes() {
        let pool = Pool::new(members(3));
        // everyone dead: the soft level has nothing to watch
        let (next, wait) = pool.oldest_pulse(DeathLevel::Soft, Duration::from_secs(5));
        assert_eq!(next, None);
        assert_eq!(wait, Duration::from_secs(5));

        pool.change_status(0, FsStatus::Live);
        pool.pulse("10.1.0.0");
        std::thread::sleep(Duration::from_millis(5));
        let (next, _) = pool.oldest_pulse(DeathLevel::Soft, Duration::from_secs(5));
        assert_eq!(next, Some(0));
    }
}
