// Keyward — Library root
//
// Credential lifecycle engine: classify the names in a `.env` file, push the
// secrets to remote secret stores, and rotate them on a policy.

pub mod alerts;
pub mod audit;
pub mod catalog;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod context;
pub mod daemon;
pub mod enclave;
pub mod error;
pub mod gateway;
pub mod pattern;
pub mod retry;
pub mod rotation;
pub mod store;
pub mod sync;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{KeywardError, Result};
