pub mod chunk_table;
pub mod config;
pub mod file_tree;
pub mod fs_api;
pub mod pool;
pub mod private_server;
pub mod snapshot;
