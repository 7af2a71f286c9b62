//! Concurrent load workers
//!
//! - `pool` - Fixed-size worker pool with error policy and throughput reporter

pub mod pool;

pub use pool::{
    ErrorPolicy, Flow, PoolConfig, PoolHandle, PoolSummary, ThroughputSample, WorkerPool,
};
