// Fraud analytics library: causal per-entity feature derivation, unsupervised
// anomaly detectors and the model store / HTTP service built on them.
pub mod api;
pub mod config;
pub mod csv_reader;
pub mod detectors;
pub mod error;
pub mod features;
pub mod preprocess;
pub mod schema;
pub mod scoring;
pub mod store;
pub mod trainer;
//test module
#[cfg(test)]
mod tests;

pub use error::{Result, ScoringError};
