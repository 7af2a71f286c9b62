//! Load generation
//!
//! # Components
//!
//! - `config` - Run configuration with validated defaults
//! - `generator` - Synthetic change requests per operation kind
//! - `runner` - Drives the worker pool and tallies outcomes

pub mod config;
pub mod generator;
pub mod runner;

pub use config::LoadConfig;
pub use generator::{LoadItem, Operation, RequestGenerator};
pub use runner::{LoadReport, LoadRunner, PRECREATE_TRANSACTION_ID};
