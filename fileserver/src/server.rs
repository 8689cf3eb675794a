use std::sync::Arc;

use serde::Serialize;
use storage::chunk_store::{ChunkStore, ChunkStoreError};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use utilities::logger::{error, info, instrument, warn};

use crate::expectation::{ChunkId, ExpectAction, ExpectError, ExpectationDb};
use crate::ns_connector::NsConnector;

#[derive(Debug, Serialize)]
pub struct ProbeInfo {
    #[serde(rename = "Available")]
    pub available: u64,
}

pub enum ReadOutcome {
    Unauthorized,
    NotFound,
    Stream(Box<dyn AsyncRead + Send + Unpin>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Unauthorized,
    AlreadyExists,
    Stored,
    Failed,
}

/// The file server request plane: admits chunk transfers against the
/// expectation db, reconciles obsolete chunks and pushes replicas to peers.
pub struct FileServer {
    store: Arc<dyn ChunkStore>,
    expectations: ExpectationDb,
    ns: Arc<dyn NsConnector>,
    http: reqwest::Client,
}

impl FileServer {
    pub fn new(store: Arc<dyn ChunkStore>, ns: Arc<dyn NsConnector>) -> Self {
        Self {
            store,
            expectations: ExpectationDb::new(),
            ns,
            http: reqwest::Client::new(),
        }
    }

    pub fn ns(&self) -> &Arc<dyn NsConnector> {
        &self.ns
    }

    /// Registers a batch of expectations under a fresh token. Nothing is
    /// registered when any precondition fails.
    pub async fn expect(
        &self,
        token: &str,
        action: ExpectAction,
        chunks: &[String],
    ) -> Result<(), ExpectError> {
        if self.expectations.get(token).is_some() {
            return Err(ExpectError::TokenExists(token.to_owned()));
        }
        if action == ExpectAction::Read {
            for id in chunks {
                if !self.store.exists(id).await {
                    return Err(ExpectError::ChunkNotFound(id.clone()));
                }
            }
        }
        self.expectations.set(token, action, chunks)
    }

    /// The action a (token, chunk) pair still authorizes. Absent and spent
    /// tokens both answer `Nothing`.
    pub fn expectation_for(&self, token: &str, id: &str) -> ExpectAction {
        match self.expectations.get(token) {
            Some(expectation) => expectation.action_for(id),
            None => ExpectAction::Nothing,
        }
    }

    /// Spends the capability; called on every exit path of an authorized
    /// transfer.
    pub fn fulfill(&self, token: &str, id: &str) {
        let to_purge = self.expectations.fulfill(token, id);
        self.remove_chunks(to_purge);
    }

    /// Serves one authorized chunk read. The capability is spent as soon as
    /// the transfer begins, whether or not the store had the chunk.
    #[instrument(name = "fs_send_chunk", skip(self))]
    pub async fn open_chunk(&self, token: &str, id: &str) -> ReadOutcome {
        if self.expectation_for(token, id) != ExpectAction::Read {
            return ReadOutcome::Unauthorized;
        }
        let opened = self.store.get(id).await;
        self.fulfill(token, id);
        match opened {
            Ok(reader) => ReadOutcome::Stream(reader),
            Err(e) => {
                warn!(%id, error = %e, "expected chunk missing from store");
                ReadOutcome::NotFound
            }
        }
    }

    /// Accepts one authorized chunk write. A pre-existing chunk is refused
    /// but still counts as fulfilment: the capability was presented and is
    /// spent either way, so the batch can always drain.
    #[instrument(name = "fs_receive_chunk", skip(self, data))]
    pub async fn store_chunk(
        &self,
        token: &str,
        id: &str,
        data: &mut (dyn AsyncRead + Send + Unpin),
    ) -> WriteOutcome {
        if self.expectation_for(token, id) != ExpectAction::Write {
            return WriteOutcome::Unauthorized;
        }
        let outcome = match self.store.create(id, data).await {
            Ok(written) => {
                info!(%id, %written, "chunk received");
                self.ns.received_chunk(id).await;
                WriteOutcome::Stored
            }
            Err(ChunkStoreError::AlreadyExists) => WriteOutcome::AlreadyExists,
            Err(e) => {
                error!(%id, error = %e, "could not store received chunk");
                WriteOutcome::Failed
            }
        };
        self.fulfill(token, id);
        outcome
    }

    /// Cancels the token and garbage collects partially received chunks.
    #[instrument(name = "fs_cancel_token", skip(self))]
    pub fn cancel_token(&self, token: &str) {
        let to_purge = self.expectations.cancel(token);
        self.remove_chunks(to_purge);
    }

    /// Condemns the given chunk ids; ids still referenced by a live token
    /// are removed when the last reference releases them.
    #[instrument(name = "fs_purge", skip(self, chunks))]
    pub fn purge(&self, chunks: Vec<ChunkId>) {
        let to_purge = self.expectations.make_obsolete(chunks);
        self.remove_chunks(to_purge);
    }

    pub async fn probe_info(&self) -> ProbeInfo {
        ProbeInfo {
            available: self.store.bytes_available().await,
        }
    }

    /// Pushes chunks to a peer file server under a namenode issued token.
    /// A failing chunk is logged and the loop moves on; the local read
    /// expectation is spent on every path.
    #[instrument(name = "fs_replicate", skip(self, chunks))]
    pub async fn replicate_to_peer(&self, token: &str, dest: &str, chunks: &[String]) {
        for id in chunks {
            if !self.store.exists(id).await {
                error!(%token, chunk = %id, "replica source chunk is missing");
                continue;
            }
            if let Err(e) =
                self.expectations
                    .extend(token, ExpectAction::Read, std::slice::from_ref(id))
            {
                error!(%token, chunk = %id, error = %e, "replica could not be registered internally");
                continue;
            }
            self.push_chunk(token, dest, id).await;
            self.fulfill(token, id);
        }
    }

    async fn push_chunk(&self, token: &str, dest: &str, id: &str) {
        let reader = match self.store.get(id).await {
            Ok(reader) => reader,
            Err(e) => {
                error!(chunk = %id, error = %e, "could not open chunk for replication");
                return;
            }
        };
        let dest_addr = format!("http://{dest}/chunks/{id}?token={token}");
        let body = reqwest::Body::wrap_stream(ReaderStream::new(reader));
        let sent = self
            .http
            .post(&dest_addr)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await;
        match sent {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!(dest = %dest_addr, status = %response.status(), "chunk replica was not accepted by peer");
            }
            Err(e) => {
                warn!(dest = %dest_addr, error = %e, "could not replicate chunk to peer");
            }
        }
    }

    // physical removals are best effort background work
    fn remove_chunks(&self, ids: Vec<ChunkId>) {
        for id in ids {
            let store = self.store.clone();
            tokio::spawn(async move {
                if let Err(e) = store.remove(&id).await {
                    warn!(chunk = %id, error = %e, "could not remove obsolete chunk");
                }
            });
        }
    }
}
