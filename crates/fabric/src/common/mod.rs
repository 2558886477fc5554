//! Common types shared across the fabric (bit vectors, error taxonomy).

/// Fixed-width bit vectors for request/valid/conflict masks.
pub mod bits;
/// Configuration and invariant-violation error types.
pub mod error;

pub use bits::BitVec;
pub use error::{BuildError, FatalError};
