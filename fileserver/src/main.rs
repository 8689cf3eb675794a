use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use fileserver::{
    config::CONFIG,
    heart::{Heart, HttpPoller},
    ns_connector::HttpNsConnector,
    routes,
    server::FileServer,
};
use storage::file_store::FileChunkStore;
use utilities::logger::{info, init_logger};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _guard = init_logger(
        "Fileserver",
        &CONFIG.node_id,
        &CONFIG.log_level,
        &CONFIG.log_base,
    );

    let store = Arc::new(FileChunkStore::new(&CONFIG.storage_path).await?);
    let ns = Arc::new(
        HttpNsConnector::load(CONFIG.namenode_private_addr.clone(), &CONFIG.ns_marker_path).await,
    );
    let server = Arc::new(FileServer::new(store, ns));

    // heartbeat towards the namenode private server
    let poller = HttpPoller::new(format!("http://{}/pulse", CONFIG.namenode_private_addr));
    Heart::new(Arc::new(poller), Duration::from_secs(CONFIG.heartbeat_secs)).start();

    let rocket_config = rocket::Config {
        address: CONFIG.host.parse()?,
        port: CONFIG.port,
        ..rocket::Config::default()
    };
    info!(host = %CONFIG.host, port = %CONFIG.port, "Starting the file server");
    routes::rocket(rocket_config, server).launch().await?;
    Ok(())
}
