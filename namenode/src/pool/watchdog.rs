use std::sync::Arc;
use std::time::Duration;

use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use utilities::logger::{info, warn};

use super::{DeathLevel, FsStatus, Pool};

/// Spawns the two watchdog loops, one per death level. `resurrect_tx`
/// (when given) is signalled whenever a node comes back to life so deferred
/// replication can be retried; publishes to a full queue are dropped.
pub fn start_watchdogs(
    pool: Arc<Pool>,
    soft_period: Duration,
    hard_period: Duration,
    resurrect_tx: Option<mpsc::Sender<usize>>,
) -> (JoinHandle<()>, JoinHandle<()>) {
    let soft_rx = pool
        .soft_rx
        .lock()
        .unwrap()
        .take()
        .expect("soft watchdog already started");
    let hard_rx = pool
        .hard_rx
        .lock()
        .unwrap()
        .take()
        .expect("hard watchdog already started");
    let soft = tokio::spawn(run(
        pool.clone(),
        DeathLevel::Soft,
        soft_period,
        soft_rx,
        resurrect_tx.clone(),
    ));
    let hard = tokio::spawn(run(
        pool,
        DeathLevel::Hard,
        hard_period,
        hard_rx,
        resurrect_tx,
    ));
    (soft, hard)
}

async fn run(
    pool: Arc<Pool>,
    level: DeathLevel,
    period: Duration,
    mut queue: mpsc::Receiver<usize>,
    resurrect_tx: Option<mpsc::Sender<usize>>,
) {
    let death_status = match level {
        DeathLevel::Soft => FsStatus::PartiallyDead,
        DeathLevel::Hard => FsStatus::Dead,
    };
    let (mut next_dead, mut death_time) = pool.oldest_pulse(level, period);
    loop {
        tokio::select! {
            peer = queue.recv() => {
                let Some(peer) = peer else {
                    // the pool side of the queue is gone
                    return;
                };
                if pool.is_dead(peer, level) {
                    info!(?level, %peer, "file server became live again");
                    pool.change_status(peer, FsStatus::Live);
                    if let Some(tx) = &resurrect_tx {
                        let _ = tx.try_send(peer);
                    }
                }
                // a missed signal is fine, nextDead is recomputed from
                // scratch on every wake
                (next_dead, death_time) = pool.oldest_pulse(level, period);
            }
            _ = sleep(death_time) => {
                let Some(victim) = next_dead else {
                    death_time = period;
                    continue;
                };
                warn!(?level, %victim, "file server missed its heartbeat window");
                pool.change_status(victim, death_status);
                (next_dead, _) = pool.oldest_pulse(level, period);
                death_time = period;
            }
        }
    }
}
