pub mod attack;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod interval;
pub mod key;
pub mod math;
pub mod oracle;
pub mod pool;
pub mod search;
pub mod server;
