use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use utilities::{
    logger::{error, info, warn},
    result::Result,
};

// receipt confirmations must survive a briefly unreachable namenode;
// replica pushes themselves are never retried here
const CONFIRM_ATTEMPTS: u32 = 3;
const CONFIRM_FIRST_PAUSE: Duration = Duration::from_millis(250);

/// The file server's view of the namenode: receipt confirmations flowing
/// out, plus the bound peer identity used to gate the private HTTP surface.
#[async_trait]
pub trait NsConnector: Send + Sync {
    /// Announce that a chunk is now durably stored on this node.
    async fn received_chunk(&self, id: &str);
    /// Bind the namenode identity. Only this peer may use the private
    /// surface from now on.
    async fn set_ns_addr(&self, host: IpAddr);
    fn is_ns(&self, host: IpAddr) -> bool;
    fn ns_addr(&self) -> Option<IpAddr>;
}

/// Production connector talking to the namenode's private HTTP server. The
/// bound identity survives restarts through a small marker file.
pub struct HttpNsConnector {
    ns_private_addr: String,
    marker_path: PathBuf,
    trusted: RwLock<Option<IpAddr>>,
    client: reqwest::Client,
}

impl HttpNsConnector {
    /// `ns_private_addr` is the `host:port` of the namenode private server.
    /// A marker file left by an earlier probe restores the trusted identity.
    pub async fn load(ns_private_addr: String, marker_path: impl AsRef<Path>) -> Self {
        let marker_path = marker_path.as_ref().to_path_buf();
        let trusted = match tokio::fs::read_to_string(&marker_path).await {
            Ok(contents) => match contents.trim().parse::<IpAddr>() {
                Ok(host) => {
                    info!(%host, "Restored trusted namenode identity from marker");
                    Some(host)
                }
                Err(e) => {
                    warn!(path = %marker_path.display(), error = %e, "Ignoring unparsable namenode marker");
                    None
                }
            },
            Err(_) => None,
        };
        Self {
            ns_private_addr,
            marker_path,
            trusted: RwLock::new(trusted),
            client: reqwest::Client::new(),
        }
    }

    async fn confirm_once(&self, url: &str) -> Result<()> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(format!("namenode answered {}", response.status()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl NsConnector for HttpNsConnector {
    async fn received_chunk(&self, id: &str) {
        let url = format!(
            "http://{}/confirm/receivedChunk?chunkID={}",
            self.ns_private_addr, id
        );
        let mut pause = CONFIRM_FIRST_PAUSE;
        for attempt in 1..=CONFIRM_ATTEMPTS {
            match self.confirm_once(&url).await {
                Ok(()) => return,
                Err(e) if attempt < CONFIRM_ATTEMPTS => {
                    warn!(chunk = %id, %attempt, error = %e, "chunk receipt confirmation failed, will retry");
                    sleep(pause).await;
                    pause *= 2;
                }
                Err(e) => {
                    error!(chunk = %id, error = %e, "giving up on confirming chunk receipt to namenode");
                }
            }
        }
    }

    async fn set_ns_addr(&self, host: IpAddr) {
        *self.trusted.write().unwrap() = Some(host);
        if let Err(e) = tokio::fs::write(&self.marker_path, host.to_string()).await {
            error!(path = %self.marker_path.display(), error = %e, "could not persist namenode marker");
        }
    }

    fn is_ns(&self, host: IpAddr) -> bool {
        // until the first probe binds an identity the surface is open
        match *self.trusted.read().unwrap() {
            Some(trusted) => trusted == host,
            None => true,
        }
    }

    fn ns_addr(&self) -> Option<IpAddr> {
        *self.trusted.read().unwrap()
    }
}

/// Test double recording receipt confirmations instead of sending them.
#[derive(Default)]
pub struct SpyNsConnector {
    received: Mutex<Vec<String>>,
    trusted: RwLock<Option<IpAddr>>,
}

impl SpyNsConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received_ids(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.received.lock().unwrap().clear();
    }
}

#[async_trait]
impl NsConnector for SpyNsConnector {
    async fn received_chunk(&self, id: &str) {
        self.received.lock().unwrap().push(id.to_owned());
    }

    async fn set_ns_addr(&self, host: IpAddr) {
        *self.trusted.write().unwrap() = Some(host);
    }

    fn is_ns(&self, host: IpAddr) -> bool {
        match *self.trusted.read().unwrap() {
            Some(trusted) => trusted == host,
            None => true,
        }
    }

    fn ns_addr(&self) -> Option<IpAddr> {
        *self.trusted.read().unwrap()
    }
}
