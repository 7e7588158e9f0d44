//! eltwise-kernels: runtime-generated elementwise kernels.
//!
//! A routine is specialized per (ISA, data type, algorithm, alpha, beta,
//! direction), generated once at primitive creation and then executed over
//! partitions of the buffer by a worker team:
//!
//! - **Predicated tails**: the last partial vector is handled by narrowing
//!   the governing predicate, never by a scalar loop.
//! - **Reduced precision**: bf16 and f16 buffers are widened to f32 for the
//!   math and narrowed back on store.
//! - **Forward and backward**: 25 algorithms, including the use-dst variants
//!   whose derivative is taken at the forward output.
//!
//! # Quick Start
//!
//! ```ignore
//! use eltwise_kernels::{AlgKind, DataType, EltwiseDesc, EltwiseFwd, Engine, IsaLevel, MemoryDesc};
//!
//! let md = MemoryDesc::plain(&[1024], DataType::F32);
//! let desc = EltwiseDesc::forward(AlgKind::Relu, 0.0, 0.0, md.clone(), md);
//! let engine = Engine::new();
//! let isa = engine.capabilities().best().unwrap();
//! let fwd = EltwiseFwd::init(isa, DataType::F32, &desc, &Default::default(), &engine)?;
//! fwd.execute_typed(&src, &mut dst)?;
//! ```

pub mod compiler;
pub mod config;
pub mod dispatch;
pub mod memory;
pub mod primitive;
pub mod scalar_ops;
pub mod threading;
pub mod types;

pub use compiler::{
    CompiledKernel, EltwiseInjector, EltwiseKernel, EltwiseKernelGenerator, ExecStats, Injector,
    KernelArgs, KernelDesc, KernelKey, KernelRegistry,
};
pub use config::EltwiseConfig;
pub use dispatch::{cpu_capabilities, mayiuse, Capabilities, IsaLevel};
pub use memory::MemoryDesc;
pub use primitive::{BwdArgs, EltwiseBwd, EltwiseDesc, EltwiseFwd, Engine, PostOp, PrimitiveAttr};
pub use threading::{balance211, WorkPartition};
pub use types::{AlgKind, DataType, Direction, EltwiseError, EltwiseResult, Status};
