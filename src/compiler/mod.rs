//! Runtime generation of elementwise kernels.
//!
//! # Pipeline
//!
//! ```text
//! KernelDesc → KernelRegistry → EltwiseKernelGenerator → Assembler → CompiledKernel
//!                                        │
//!                                    Injector (math)
//! ```
//!
//! - `codegen/`: the `SimdOps` virtual ISA, assembler, math and conversion
//!   sequences.
//! - `injector`: per-algorithm forward and derivative math.
//! - `eltwise_kernel`: loop structure, tail predication, format conversion.
//! - `executable`: the finalized routine and its executor.
//! - `registry`: builder lookup per (ISA, data type, direction).

pub mod codegen;
pub mod eltwise_kernel;
pub mod executable;
pub mod injector;
pub mod registry;

pub use eltwise_kernel::{EltwiseKernel, EltwiseKernelGenerator, KernelDesc};
pub use executable::{CompiledKernel, ExecStats, KernelArgs};
pub use injector::{EltwiseInjector, Injector};
pub use registry::{KernelBuilder, KernelKey, KernelRegistry};
