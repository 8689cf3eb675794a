use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::{task::JoinHandle, time::sleep};
use utilities::logger::warn;

#[async_trait]
pub trait Poller: Send + Sync {
    async fn poll(&self);
}

/// Polls the given URL with a plain GET. The link should contain http://
/// at the beginning.
pub struct HttpPoller {
    address: String,
    client: reqwest::Client,
}

impl HttpPoller {
    pub fn new(address: String) -> Self {
        Self {
            address,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Poller for HttpPoller {
    async fn poll(&self) {
        if let Err(e) = self.client.get(&self.address).send().await {
            warn!(address = %self.address, error = %e, "couldn't send heartbeat");
        }
    }
}

/// Periodic heartbeat emitter towards the namenode.
pub struct Heart {
    poller: Arc<dyn Poller>,
    period: Duration,
}

impl Heart {
    pub fn new(poller: Arc<dyn Poller>, period: Duration) -> Self {
        Self { poller, period }
    }

    /// Makes `count` consecutive polls with a pause in-between. Set count
    /// to -1 to poll indefinitely.
    pub async fn poll(&self, count: i32) {
        let mut sent = 0;
        loop {
            self.poller.poll().await;
            sent += 1;
            if count != -1 && sent >= count {
                return;
            }
            sleep(self.period).await;
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.poll(-1).await })
    }
}
