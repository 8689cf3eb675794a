use figment::{
    providers::{Format, Yaml},
    Figment,
};
use once_cell::sync::Lazy;
use serde::Deserialize;

fn default_marker() -> String {
    ".tsukifs".to_owned()
}
fn default_heartbeat_secs() -> u64 {
    3
}
fn default_log_level() -> String {
    "info".to_owned()
}
fn default_log_base() -> String {
    "logs".to_owned()
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    // path to the dir where chunks will be stored
    pub storage_path: String,
    // host:port of the namenode private server (pulse + confirm target)
    pub namenode_private_addr: String,
    #[serde(default = "default_marker")]
    pub ns_marker_path: String,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_base")]
    pub log_base: String,
}

pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    let env = std::env::var("ENV").unwrap_or_else(|_| "default".to_owned());
    let config_file_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| format!("./fileserver/config/{env}.yaml"));
    println!("Reading config from file : {config_file_path}");
    Figment::new()
        .merge(Yaml::file(config_file_path))
        .extract()
        .unwrap()
});
