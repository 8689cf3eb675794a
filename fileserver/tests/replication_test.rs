use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use fileserver::expectation::ExpectAction;
use fileserver::ns_connector::SpyNsConnector;
use fileserver::routes;
use fileserver::server::FileServer;
use storage::memory_store::InMemoryChunkStore;

fn seeded(entries: &[(&str, &str)]) -> Arc<InMemoryChunkStore> {
    let seed: HashMap<String, String> = entries
        .iter()
        .map(|(id, data)| (id.to_string(), data.to_string()))
        .collect();
    Arc::new(InMemoryChunkStore::new(seed))
}

async fn launch_peer(server: Arc<FileServer>, port: u16) {
    let config = rocket::Config {
        address: "127.0.0.1".parse().unwrap(),
        port,
        ..rocket::Config::debug_default()
    };
    tokio::spawn(routes::rocket(config, server).launch());
    // give the listener a moment to come up
    sleep(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn replicates_chunks_to_a_peer() {
    let src_store = seeded(&[("a", "first chunk"), ("b", "second chunk")]);
    let src = Arc::new(FileServer::new(
        src_store.clone(),
        Arc::new(SpyNsConnector::new()),
    ));

    let dest_store = seeded(&[]);
    let dest_ns = Arc::new(SpyNsConnector::new());
    let dest = Arc::new(FileServer::new(dest_store.clone(), dest_ns.clone()));

    // the namenode preloads the receiver with write expectations
    dest.expect("rt", ExpectAction::Write, &["a".to_owned(), "b".to_owned()])
        .await
        .unwrap();

    launch_peer(dest.clone(), 28917).await;

    src.replicate_to_peer("rt", "127.0.0.1:28917", &["a".to_owned(), "b".to_owned()])
        .await;

    assert_eq!(dest_store.contents("a"), Some(b"first chunk".to_vec()));
    assert_eq!(dest_store.contents("b"), Some(b"second chunk".to_vec()));
    let mut received = dest_ns.received_ids();
    received.sort();
    assert_eq!(received, vec!["a".to_owned(), "b".to_owned()]);

    // the local read expectations were spent on the way out
    assert_eq!(src.expectation_for("rt", "a"), ExpectAction::Nothing);
    assert_eq!(src.expectation_for("rt", "b"), ExpectAction::Nothing);
}

#[tokio::test]
async fn replication_skips_missing_chunks_and_continues() {
    let src_store = seeded(&[("real", "payload")]);
    let src = Arc::new(FileServer::new(
        src_store.clone(),
        Arc::new(SpyNsConnector::new()),
    ));

    let dest_store = seeded(&[]);
    let dest = Arc::new(FileServer::new(
        dest_store.clone(),
        Arc::new(SpyNsConnector::new()),
    ));
    dest.expect("rt", ExpectAction::Write, &["real".to_owned()])
        .await
        .unwrap();

    launch_peer(dest.clone(), 28918).await;

    src.replicate_to_peer(
        "rt",
        "127.0.0.1:28918",
        &["ghost".to_owned(), "real".to_owned()],
    )
    .await;

    // the missing chunk is logged and skipped, the rest still flows
    assert_eq!(dest_store.contents("real"), Some(b"payload".to_vec()));
}
