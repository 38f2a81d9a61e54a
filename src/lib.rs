pub mod config;
pub mod engine;
pub mod http;
pub mod layout;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod wal;
