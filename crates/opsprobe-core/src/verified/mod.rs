//! Pure functions for harness decisions.
//!
//! Zone weighting and failure classification are deterministic and free of
//! I/O so they can be tested without a cloud account.
//!
//! # Tiger Style
//!
//! - No side effects, no clocks
//! - Unknown input fails closed (permanent / configuration error)

pub mod classify;
mod zones;

pub use classify::ErrorClass;
pub use classify::RpcCode;
pub use zones::*;
