//! Scalar reference implementations.
//!
//! Plain per-element `f32` code used as the golden reference when checking
//! generated routines, and as the fallback path in benchmarks.

pub mod activations;

pub use activations::{eltwise_bwd, eltwise_fwd, scalar_eltwise_bwd, scalar_eltwise_fwd};
