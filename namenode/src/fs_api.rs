use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use utilities::result::Result;

/// Outbound calls to a file server's private surface, addressed by the
/// node's public `host:port`.
#[async_trait]
pub trait FsApi: Send + Sync {
    /// Probes the node, binding this namenode as its trusted peer.
    /// Returns the free byte count the node reported.
    async fn probe(&self, fs_addr: &str) -> Result<u64>;
    /// Preloads an expectation batch on the node.
    async fn expect(&self, fs_addr: &str, token: &str, action: &str, chunks: &[String])
        -> Result<()>;
    /// Orders `src_addr` to push chunks to `dest_addr` under the token.
    async fn replicate(
        &self,
        src_addr: &str,
        token: &str,
        dest_addr: &str,
        chunks: &[String],
    ) -> Result<()>;
    async fn cancel_token(&self, fs_addr: &str, token: &str) -> Result<()>;
    async fn purge(&self, fs_addr: &str, chunks: &[String]) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ProbeResponse {
    #[serde(rename = "Available")]
    available: u64,
}

pub struct HttpFsApi {
    client: reqwest::Client,
}

impl HttpFsApi {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFsApi {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_success(status: reqwest::StatusCode, what: &str) -> Result<()> {
    if !status.is_success() {
        return Err(format!("{what} answered {status}").into());
    }
    Ok(())
}

#[async_trait]
impl FsApi for HttpFsApi {
    async fn probe(&self, fs_addr: &str) -> Result<u64> {
        let response = self
            .client
            .get(format!("http://{fs_addr}/probe"))
            .send()
            .await?;
        ensure_success(response.status(), "probe")?;
        let info: ProbeResponse = response.json().await?;
        Ok(info.available)
    }

    async fn expect(
        &self,
        fs_addr: &str,
        token: &str,
        action: &str,
        chunks: &[String],
    ) -> Result<()> {
        let response = self
            .client
            .post(format!("http://{fs_addr}/expect/{token}?action={action}"))
            .body(serde_json::to_string(chunks)?)
            .send()
            .await?;
        ensure_success(response.status(), "expect")
    }

    async fn replicate(
        &self,
        src_addr: &str,
        token: &str,
        dest_addr: &str,
        chunks: &[String],
    ) -> Result<()> {
        let response = self
            .client
            .post(format!(
                "http://{src_addr}/replicate?token={token}&addr={dest_addr}"
            ))
            .body(serde_json::to_string(chunks)?)
            .send()
            .await?;
        ensure_success(response.status(), "replicate")
    }

    async fn cancel_token(&self, fs_addr: &str, token: &str) -> Result<()> {
        let response = self
            .client
            .get(format!("http://{fs_addr}/cancelToken?token={token}"))
            .send()
            .await?;
        ensure_success(response.status(), "cancelToken")
    }

    async fn purge(&self, fs_addr: &str, chunks: &[String]) -> Result<()> {
        let response = self
            .client
            .post(format!("http://{fs_addr}/purge"))
            .body(serde_json::to_string(chunks)?)
            .send()
            .await?;
        ensure_success(response.status(), "purge")
    }
}

/// Records outbound calls for the test suites instead of sending them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FsCall {
    Probe {
        fs_addr: String,
    },
    Expect {
        fs_addr: String,
        token: String,
        action: String,
        chunks: Vec<String>,
    },
    Replicate {
        src_addr: String,
        token: String,
        dest_addr: String,
        chunks: Vec<String>,
    },
    CancelToken {
        fs_addr: String,
        token: String,
    },
    Purge {
        fs_addr: String,
        chunks: Vec<String>,
    },
}

#[derive(Default)]
pub struct SpyFsApi {
    calls: Mutex<Vec<FsCall>>,
}

impl SpyFsApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<FsCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl FsApi for SpyFsApi {
    async fn probe(&self, fs_addr: &str) -> Result<u64> {
        self.calls.lock().unwrap().push(FsCall::Probe {
            fs_addr: fs_addr.to_owned(),
        });
        Ok(0)
    }

    async fn expect(
        &self,
        fs_addr: &str,
        token: &str,
        action: &str,
        chunks: &[String],
    ) -> Result<()> {
        self.calls.lock().unwrap().push(FsCall::Expect {
            fs_addr: fs_addr.to_owned(),
            token: token.to_owned(),
            action: action.to_owned(),
            chunks: chunks.to_vec(),
        });
        Ok(())
    }

    async fn replicate(
        &self,
        src_addr: &str,
        token: &str,
        dest_addr: &str,
        chunks: &[String],
    ) -> Result<()> {
        self.calls.lock().unwrap().push(FsCall::Replicate {
            src_addr: src_addr.to_owned(),
            token: token.to_owned(),
            dest_addr: dest_addr.to_owned(),
            chunks: chunks.to_vec(),
        });
        Ok(())
    }

    async fn cancel_token(&self, fs_addr: &str, token: &str) -> Result<()> {
        self.calls.lock().unwrap().push(FsCall::CancelToken {
            fs_addr: fs_addr.to_owned(),
            token: token.to_owned(),
        });
        Ok(())
    }

    async fn purge(&self, fs_addr: &str, chunks: &[String]) -> Result<()> {
        self.calls.lock().unwrap().push(FsCall::Purge {
            fs_addr: fs_addr.to_owned(),
            chunks: chunks.to_vec(),
        });
        Ok(())
    }
}
