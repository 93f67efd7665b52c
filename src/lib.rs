pub mod config;
pub mod env_sealer;
pub mod error;
pub mod hardware_bridge;
pub mod host_probe;
pub mod identity;
pub mod logger;
pub mod mount_builder;
pub mod namespaces;
pub mod network;
pub mod orchestrator;
pub mod process_clone;
pub mod seccomp;
pub mod stdio;
pub mod terminal;
pub mod utils;
