pub mod audit;
pub mod backup;
pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod lock;
pub mod server;
pub mod storage;
