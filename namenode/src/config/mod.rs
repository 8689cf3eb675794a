use figment::{
    providers::{Format, Yaml},
    Figment,
};
use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::pool::PoolMember;

fn default_soft_death_secs() -> u64 {
    6
}
fn default_hard_death_secs() -> u64 {
    30
}
fn default_replicas() -> usize {
    3
}
fn default_snapshot_path() -> String {
    "./tsukins.snapshot".to_owned()
}
fn default_log_level() -> String {
    "info".to_owned()
}
fn default_log_base() -> String {
    "logs".to_owned()
}

#[derive(Clone, Debug, Deserialize)]
pub struct StorageNodeConfig {
    pub host: String,
    pub port: u16,
    // address its heartbeats arrive from
    pub private_host: String,
}

impl From<StorageNodeConfig> for PoolMember {
    fn from(value: StorageNodeConfig) -> Self {
        PoolMember {
            host: value.host,
            port: value.port,
            private_host: value.private_host,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub id: String,
    pub private_host: String,
    pub private_port: u16,
    #[serde(default = "default_soft_death_secs")]
    pub soft_death_secs: u64,
    #[serde(default = "default_hard_death_secs")]
    pub hard_death_secs: u64,
    #[serde(default = "default_replicas")]
    pub replicas: usize,
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
    pub storage: Vec<StorageNodeConfig>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_base")]
    pub log_base: String,
}

pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    let env = std::env::var("ENV").unwrap_or_else(|_| "default".to_owned());
    let config_file_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| format!("./namenode/config/{env}.yaml"));
    println!("Reading config from file : {config_file_path}");
    Figment::new()
        .merge(Yaml::file(config_file_path))
        .extract()
        .unwrap()
});
