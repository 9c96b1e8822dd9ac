pub mod audit;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod orchestrator;
pub mod parsers;
pub mod response;
pub mod server;
pub mod store;
