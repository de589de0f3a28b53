//! Core primitives: base encodings, bidirected identifiers, rolling hashes.

pub mod bidirected;
pub mod encoding;
pub mod rolling_hash;

pub use bidirected::{canon, NodePos, StrandVec};
pub use rolling_hash::RollingHasher;
