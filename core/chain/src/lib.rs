//! Block-height oracle for Strongbox.
//!
//! Timelocks read the current chain height through the [`BlockHeightOracle`]
//! trait. Implementations:
//! - [`JsonRpcOracle`]: Ethereum-style JSON-RPC node
//! - [`FixedOracle`]: settable height for tests and offline use
//!
//! [`GuardedOracle`] adds a per-call timeout and bounded retry around any
//! oracle. [`HeightEstimator`] extrapolates heights from an average block
//! interval; it is for diagnostics only and never decides an unlock.

pub mod estimator;
pub mod fixed;
pub mod jsonrpc;
pub mod oracle;

pub use estimator::{HeightEstimator, DEFAULT_BLOCK_INTERVAL};
pub use fixed::FixedOracle;
pub use jsonrpc::{JsonRpcConfig, JsonRpcOracle};
pub use oracle::{BlockHeightOracle, GuardedOracle, SharedOracle};
