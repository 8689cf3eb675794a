use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use namenode::{
    config::CONFIG,
    fs_api::{FsApi, HttpFsApi},
    pool::{watchdog, Pool},
    private_server::{self, NamenodeServer},
    snapshot::{self, Snapshot},
};
use tokio::sync::mpsc;
use utilities::logger::{error, info, init_logger, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let _guard = init_logger("Namenode", &CONFIG.id, &CONFIG.log_level, &CONFIG.log_base);

    let snapshot = match snapshot::load(&CONFIG.snapshot_path).await {
        Ok(Some(snapshot)) => {
            info!(path = %CONFIG.snapshot_path, "Restored state snapshot");
            snapshot
        }
        Ok(None) => Snapshot::default(),
        Err(e) => {
            error!(path = %CONFIG.snapshot_path, error = %e, "Could not read the state snapshot, shutting down");
            return Err(e);
        }
    };

    let pool = Arc::new(Pool::new(
        CONFIG.storage.iter().cloned().map(Into::into).collect(),
    ));
    let fs: Arc<dyn FsApi> = Arc::new(HttpFsApi::new());
    let server = Arc::new(NamenodeServer::with_snapshot(
        pool.clone(),
        fs.clone(),
        CONFIG.replicas,
        &CONFIG.snapshot_path,
        snapshot,
    ));

    // bind our identity on every configured file server and learn how much
    // room each one has
    for node in pool.nodes() {
        match fs.probe(&node.addr()).await {
            Ok(available) => info!(node = %node.addr(), %available, "Probed file server"),
            Err(e) => warn!(node = %node.addr(), error = %e, "Could not probe file server"),
        }
    }

    let (resurrect_tx, resurrect_rx) = mpsc::channel(1);
    watchdog::start_watchdogs(
        pool.clone(),
        Duration::from_secs(CONFIG.soft_death_secs),
        Duration::from_secs(CONFIG.hard_death_secs),
        Some(resurrect_tx),
    );
    server.start_replication_retry(resurrect_rx);

    let rocket_config = rocket::Config {
        address: CONFIG.private_host.parse()?,
        port: CONFIG.private_port,
        ..rocket::Config::default()
    };
    info!(host = %CONFIG.private_host, port = %CONFIG.private_port, "Starting the namenode private server");
    private_server::rocket(rocket_config, server).launch().await?;
    Ok(())
}
