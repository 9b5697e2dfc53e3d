pub mod config;
pub mod error;
pub mod identity;
pub mod documents;
pub mod server;
pub mod client;
