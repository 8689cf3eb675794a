use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rocket::http::Status;
use rocket::local::asynchronous::Client;
use tokio::time::sleep;

use namenode::fs_api::{FsCall, SpyFsApi};
use namenode::pool::{watchdog, FsStatus, Pool, PoolMember};
use namenode::private_server::{self, NamenodeServer};

struct Harness {
    client: Client,
    server: Arc<NamenodeServer>,
    pool: Arc<Pool>,
    fs: Arc<SpyFsApi>,
    _dir: tempfile::TempDir,
}

async fn harness(nodes: usize, replicas: usize) -> Harness {
    let pool = Arc::new(Pool::new(
        (0..nodes)
            .map(|i| PoolMember {
                host: format!("10.0.0.{i}"),
                port: 3000,
                private_host: format!("10.1.0.{i}"),
            })
            .collect(),
    ));
    let fs = Arc::new(SpyFsApi::new());
    let dir = tempfile::tempdir().unwrap();
    let server = Arc::new(NamenodeServer::new(
        pool.clone(),
        fs.clone(),
        replicas,
        dir.path().join("tsukins.snapshot"),
    ));
    let client = Client::tracked(private_server::rocket(
        rocket::Config::debug_default(),
        server.clone(),
    ))
    .await
    .expect("rocket instance");
    Harness {
        client,
        server,
        pool,
        fs,
        _dir: dir,
    }
}

fn from_node(i: usize) -> SocketAddr {
    format!("10.1.0.{i}:45000").parse().unwrap()
}

fn addr(i: usize) -> String {
    format!("10.0.0.{i}:3000")
}

#[tokio::test]
async fn pulse_resurrects_known_file_servers() {
    let h = harness(2, 2).await;
    watchdog::start_watchdogs(
        h.pool.clone(),
        Duration::from_millis(80),
        Duration::from_millis(200),
        None,
    );

    let response = h.client.get("/pulse").remote(from_node(0)).dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    sleep(Duration::from_millis(30)).await;
    assert_eq!(h.pool.status(0), FsStatus::Live);
    assert_eq!(h.pool.status(1), FsStatus::Dead);

    // an unknown host is answered but ignored
    let response = h
        .client
        .get("/pulse")
        .remote("10.9.9.9:45000".parse().unwrap())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    sleep(Duration::from_millis(30)).await;
    assert_eq!(h.pool.status(1), FsStatus::Dead);
}

#[tokio::test]
async fn confirmation_dispatches_replication() {
    let h = harness(2, 2).await;
    h.pool.change_status(0, FsStatus::Live);
    h.pool.change_status(1, FsStatus::Live);

    h.server.tree().create_file("f", vec!["c".to_owned()]).unwrap();
    h.server.chunks().register_chunk("c", "f", &addr(0));

    let response = h
        .client
        .get("/confirm/receivedChunk?chunkID=c")
        .remote(from_node(0))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    // dispatch happens on background tasks
    sleep(Duration::from_millis(50)).await;
    let calls = h.fs.calls();
    assert_eq!(calls.len(), 2);
    match &calls[0] {
        FsCall::Expect {
            fs_addr,
            action,
            chunks,
            ..
        } => {
            assert_eq!(fs_addr, &addr(1));
            assert_eq!(action, "write");
            assert_eq!(chunks, &vec!["c".to_owned()]);
        }
        other => panic!("expected an Expect call, got {other:?}"),
    }
    match &calls[1] {
        FsCall::Replicate {
            src_addr,
            dest_addr,
            chunks,
            ..
        } => {
            assert_eq!(src_addr, &addr(0));
            assert_eq!(dest_addr, &addr(1));
            assert_eq!(chunks, &vec!["c".to_owned()]);
        }
        other => panic!("expected a Replicate call, got {other:?}"),
    }

    // the pending marker is gone and the record advanced
    assert!(h.server.tree().get("f").unwrap().pending.is_empty());
    let record = h.server.chunks().record("c").unwrap();
    assert_eq!(record.ready_replicas, 1);
    assert_eq!(record.all_replicas, 2);
}

#[tokio::test]
async fn confirmation_of_unknown_chunk_is_ignored() {
    let h = harness(2, 2).await;
    h.pool.change_status(0, FsStatus::Live);

    let response = h
        .client
        .get("/confirm/receivedChunk?chunkID=ghost")
        .remote(from_node(0))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    sleep(Duration::from_millis(20)).await;
    assert!(h.fs.calls().is_empty());

    let response = h
        .client
        .get("/confirm/receivedChunk")
        .remote(from_node(0))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);
}

#[tokio::test]
async fn resurrection_retries_deferred_replication() {
    let h = harness(2, 2).await;
    h.pool.change_status(0, FsStatus::Live);

    h.server.tree().create_file("f", vec!["c".to_owned()]).unwrap();
    h.server.chunks().register_chunk("c", "f", &addr(0));

    // only the holder is live: the confirmation cannot fan out yet
    let response = h
        .client
        .get("/confirm/receivedChunk?chunkID=c")
        .remote(from_node(0))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    sleep(Duration::from_millis(30)).await;
    assert!(h.fs.calls().is_empty());

    // node 1 comes up: the watchdog resurrection signal re-drives it
    let (tx, rx) = tokio::sync::mpsc::channel(1);
    h.server.start_replication_retry(rx);
    h.pool.change_status(1, FsStatus::Live);
    tx.send(1).await.unwrap();

    sleep(Duration::from_millis(50)).await;
    let calls = h.fs.calls();
    assert_eq!(calls.len(), 2);
    assert!(matches!(&calls[1], FsCall::Replicate { dest_addr, .. } if dest_addr == &addr(1)));
}

#[tokio::test]
async fn save_writes_the_snapshot() {
    let h = harness(1, 1).await;
    h.server.tree().create_file("saved-file", vec![]).unwrap();

    let response = h.client.get("/save").dispatch().await;
    assert_eq!(response.status(), Status::Ok);

    let contents =
        tokio::fs::read_to_string(h._dir.path().join("tsukins.snapshot")).await.unwrap();
    assert!(contents.contains("saved-file"));
}
