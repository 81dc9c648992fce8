pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fetcher;
pub mod inputs;
pub mod sink;
pub mod table;
pub mod totals;
