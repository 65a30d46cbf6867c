//! Content-addressed storage for Strongbox.
//!
//! This module provides a trait-based interface over stores that address
//! objects by the digest of their content (an in-memory store, a local
//! directory and an IPFS-style HTTP node) plus a registry for resolving a
//! store by name and configuration.
//!
//! # Design Principles
//! - Addresses are derived from content, never chosen by the caller
//! - Async operations: all I/O is async
//! - Unified error semantics: missing objects are `NotFound`, unreachable
//!   nodes are `Network`

pub mod ipfs;
pub mod local;
pub mod memory;
pub mod provider;
pub mod registry;

pub use ipfs::{IpfsConfig, IpfsStore};
pub use local::LocalStore;
pub use memory::MemoryStore;
pub use provider::{content_address, ContentStore, ObjectStat, SharedStore};
pub use registry::{create_default_registry, StoreFactory, StoreRegistry, StoreSpec};
