pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod link;
pub mod metrics;
pub mod roster;
pub mod session;
pub mod store;
pub mod tally;
pub mod transport;
