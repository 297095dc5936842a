pub mod cache;
pub mod clock;
pub mod config;
pub mod duration;
pub mod engine;
pub mod file_store;
pub mod limits;
pub mod model;
pub mod observability;
pub mod pool;
pub mod store;
pub mod sweep;
pub mod wal;
