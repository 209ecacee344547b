pub mod api;
pub mod artifacts;
pub mod client;
pub mod collector;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod filter;
pub mod orderbook;
pub mod pipeline;
pub mod telemetry;
pub mod types;

#[cfg(test)]
mod testkit;
