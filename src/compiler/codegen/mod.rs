//! Code generation for the virtual predicated SIMD machine.
//!
//! - `simd_ops`: the `SimdOps` instruction interface the generator and the
//!   injector emit through.
//! - `assembler`: the concrete emitter; records instructions, resolves labels,
//!   interns constants and validates register use against the target ISA.
//! - `math_approx`: ISA-independent transcendental approximations.
//! - `cvt`: in-register bf16/f16 <-> f32 widening and narrowing.

pub mod assembler;
pub mod cvt;
pub mod math_approx;
pub mod simd_ops;

pub use assembler::{Assembler, BinOp, Insn, UnOp};
pub use simd_ops::{Cond, GReg, Label, LaneSize, MemOperand, PReg, SimdOps, VReg, PARAM_REG};

/// Output of code generation: a finalized instruction stream.
#[derive(Debug, Clone)]
pub struct CodegenOutput {
    /// Instructions with branch targets resolved to instruction indices.
    pub code: Vec<Insn>,
    /// Persisted constant table (raw 32-bit patterns).
    pub table: Vec<u32>,
    /// Vector length in bytes the code was generated for.
    pub vlen: usize,
}
