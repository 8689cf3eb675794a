use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use rocket::{get, http::Status, post, Build, Rocket, State};
use tokio::{sync::mpsc, task::JoinHandle};
use utilities::{
    logger::{error, info, warn},
    result::Result,
};

use crate::chunk_table::{ChunkTable, ReplicationJob};
use crate::file_tree::Tree;
use crate::fs_api::FsApi;
use crate::pool::Pool;
use crate::snapshot::{self, Snapshot};

/// The namenode context threaded through every private handler: the pool,
/// the chunk table, the directory tree and the outbound FS client.
pub struct NamenodeServer {
    pool: Arc<Pool>,
    chunks: ChunkTable,
    tree: Mutex<Tree>,
    fs: Arc<dyn FsApi>,
    snapshot_path: PathBuf,
}

impl NamenodeServer {
    pub fn new(
        pool: Arc<Pool>,
        fs: Arc<dyn FsApi>,
        target_replicas: usize,
        snapshot_path: impl Into<PathBuf>,
    ) -> Self {
        Self::with_snapshot(pool, fs, target_replicas, snapshot_path, Snapshot::default())
    }

    pub fn with_snapshot(
        pool: Arc<Pool>,
        fs: Arc<dyn FsApi>,
        target_replicas: usize,
        snapshot_path: impl Into<PathBuf>,
        snapshot: Snapshot,
    ) -> Self {
        Self {
            pool,
            chunks: ChunkTable::from_state(snapshot.chunks, target_replicas),
            tree: Mutex::new(snapshot.tree),
            fs,
            snapshot_path: snapshot_path.into(),
        }
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    pub fn chunks(&self) -> &ChunkTable {
        &self.chunks
    }

    pub fn tree(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap()
    }

    /// A file server announced a durably stored chunk: mark the replica
    /// ready, drop it from the owning file's pending set and dispatch the
    /// next fan-out round.
    pub fn confirm_chunk(&self, chunk_id: &str, sender_private_host: &str) {
        let Some(sender) = self.pool.find_by_private_host(sender_private_host) else {
            warn!(chunk = %chunk_id, host = %sender_private_host, "chunk confirmation from unknown host");
            return;
        };
        info!(chunk = %chunk_id, sender = %sender.addr(), "Got ready chunk");
        let (file, jobs) = self
            .chunks
            .confirm_received(chunk_id, &sender.addr(), &self.pool);
        if let Some(file) = file {
            self.tree.lock().unwrap().remove_pending(&file, chunk_id);
        }
        self.dispatch(jobs);
    }

    /// Runs replication jobs on background tasks; the receiver is preloaded
    /// with a write expectation before the sender starts pushing.
    pub fn dispatch(&self, jobs: Vec<ReplicationJob>) {
        for job in jobs {
            info!(
                chunk = %job.chunk_id,
                from = %job.source_addr,
                to = %job.dest_addr,
                "Scheduling chunk replication"
            );
            let fs = self.fs.clone();
            tokio::spawn(async move {
                let chunks = std::slice::from_ref(&job.chunk_id);
                if let Err(e) = fs.expect(&job.dest_addr, &job.token, "write", chunks).await {
                    error!(chunk = %job.chunk_id, dest = %job.dest_addr, error = %e, "receiver refused the expectation");
                    return;
                }
                if let Err(e) = fs
                    .replicate(&job.source_addr, &job.token, &job.dest_addr, chunks)
                    .await
                {
                    error!(chunk = %job.chunk_id, src = %job.source_addr, error = %e, "replication order failed");
                }
            });
        }
    }

    /// Consumes resurrection signals from the watchdogs and re-drives
    /// deferred replication.
    pub fn start_replication_retry(
        self: &Arc<Self>,
        mut resurrected: mpsc::Receiver<usize>,
    ) -> JoinHandle<()> {
        let server = self.clone();
        tokio::spawn(async move {
            while let Some(peer) = resurrected.recv().await {
                info!(%peer, "file server is live, retrying deferred replication");
                let jobs = server.chunks.retry_deferred(&server.pool);
                server.dispatch(jobs);
            }
        })
    }

    pub async fn save_snapshot(&self) -> Result<()> {
        let snapshot = Snapshot {
            tree: self.tree.lock().unwrap().clone(),
            chunks: self.chunks.export_state(),
        };
        snapshot::save(&self.snapshot_path, &snapshot).await
    }
}

fn handle_pulse(server: &NamenodeServer, remote: SocketAddr) -> Status {
    let host = remote.ip().to_string();
    if !server.pool().pulse(&host) {
        warn!(%host, "Received heartbeat from unknown host");
    }
    Status::Ok
}

#[get("/pulse")]
pub async fn pulse_get(server: &State<Arc<NamenodeServer>>, remote: SocketAddr) -> Status {
    handle_pulse(server, remote)
}

#[post("/pulse")]
pub async fn pulse_post(server: &State<Arc<NamenodeServer>>, remote: SocketAddr) -> Status {
    handle_pulse(server, remote)
}

fn handle_confirm(
    server: &NamenodeServer,
    remote: SocketAddr,
    chunk_id: Option<&str>,
) -> Status {
    let Some(chunk_id) = chunk_id else {
        return Status::BadRequest;
    };
    server.confirm_chunk(chunk_id, &remote.ip().to_string());
    Status::Ok
}

#[allow(non_snake_case)]
#[get("/confirm/receivedChunk?<chunkID>")]
pub async fn confirm_get(
    server: &State<Arc<NamenodeServer>>,
    remote: SocketAddr,
    chunkID: Option<&str>,
) -> Status {
    handle_confirm(server, remote, chunkID)
}

#[allow(non_snake_case)]
#[post("/confirm/receivedChunk?<chunkID>")]
pub async fn confirm_post(
    server: &State<Arc<NamenodeServer>>,
    remote: SocketAddr,
    chunkID: Option<&str>,
) -> Status {
    handle_confirm(server, remote, chunkID)
}

async fn handle_save(server: &NamenodeServer) -> Status {
    match server.save_snapshot().await {
        Ok(()) => Status::Ok,
        Err(e) => {
            error!(error = %e, "could not write snapshot");
            Status::InternalServerError
        }
    }
}

#[get("/save")]
pub async fn save_get(server: &State<Arc<NamenodeServer>>) -> Status {
    handle_save(server).await
}

#[post("/save")]
pub async fn save_post(server: &State<Arc<NamenodeServer>>) -> Status {
    handle_save(server).await
}

pub fn rocket(config: rocket::Config, server: Arc<NamenodeServer>) -> Rocket<Build> {
    rocket::custom(config).manage(server).mount(
        "/",
        rocket::routes![
            pulse_get,
            pulse_post,
            confirm_get,
            confirm_post,
            save_get,
            save_post,
        ],
    )
}
