//! Database layer - connection pooling and the batch insert destination

pub mod pool;

pub use pool::{connect, Pool, PoolArgs, PoolArgsBuilder};
