pub mod clock;
pub mod command_log;
pub mod config;
pub mod credential_store;
pub mod error;
pub mod events;
pub mod local_cache;
pub mod remote_store;
pub mod storage;
