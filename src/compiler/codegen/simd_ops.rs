//! SimdOps trait: virtual predicated SIMD instruction set.
//!
//! The kernel generator and the injector emit code by calling methods on
//! `SimdOps`. The model is a scalable-vector machine: vector registers of
//! `vlen` bytes, byte-granular predicate registers (one bit per byte, the
//! lowest byte of a lane governs it), and 64-bit general registers.
//!
//! Key design decisions:
//! - `VReg`/`PReg`/`GReg` are lightweight indices; the emitter validates them
//!   against the target's register file.
//! - Arithmetic lanes are 32-bit f32. Memory ops choose 16- or 32-bit lanes.
//! - All methods return `Result<(), String>` for uniform error handling.
//! - Constants are table-resident: `vbroadcast_const` requires the table
//!   address to be loaded first.

use super::CodegenOutput;

// ── Register model ──────────────────────────────────────────────────────────

/// Vector register index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VReg(pub u8);

/// Predicate register index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PReg(pub u8);

/// General-purpose register index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GReg(pub u8);

/// The routine's only argument: pointer to its parameter block.
pub const PARAM_REG: GReg = GReg(0);

pub const NUM_PREGS: usize = 16;
pub const NUM_GREGS: usize = 16;

/// Lane width of a memory or predicate operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaneSize {
    /// 16-bit lanes (`.h`).
    H16,
    /// 32-bit lanes (`.s`).
    S32,
}

impl LaneSize {
    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            LaneSize::H16 => 2,
            LaneSize::S32 => 4,
        }
    }
}

/// Comparison condition, signed for GPRs and ordered for floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cond {
    #[inline]
    pub fn eval_i64(self, a: i64, b: i64) -> bool {
        match self {
            Cond::Eq => a == b,
            Cond::Ne => a != b,
            Cond::Lt => a < b,
            Cond::Le => a <= b,
            Cond::Gt => a > b,
            Cond::Ge => a >= b,
        }
    }

    /// Ordered float compare: false whenever either side is NaN (except `Ne`).
    #[inline]
    pub fn eval_f32(self, a: f32, b: f32) -> bool {
        match self {
            Cond::Eq => a == b,
            Cond::Ne => a != b,
            Cond::Lt => a < b,
            Cond::Le => a <= b,
            Cond::Gt => a > b,
            Cond::Ge => a >= b,
        }
    }
}

/// Memory operand for load/store: `[base + offset]` in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemOperand {
    pub base: GReg,
    pub offset: i32,
}

impl MemOperand {
    #[inline]
    pub fn base(base: GReg) -> Self {
        MemOperand { base, offset: 0 }
    }

    #[inline]
    pub fn at(base: GReg, offset: i32) -> Self {
        MemOperand { base, offset }
    }
}

/// Label for branch targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

// ── SimdOps trait ───────────────────────────────────────────────────────────

/// Platform-agnostic predicated SIMD instruction interface.
///
/// Object safe: the injector receives `&mut dyn SimdOps`.
pub trait SimdOps {
    /// Vector length in bytes of the target.
    fn vlen(&self) -> usize;

    // ── Vector arithmetic (f32 lanes, unpredicated) ─────────────────────

    /// dst = a + b
    fn vadd(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String>;
    /// dst = a - b
    fn vsub(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String>;
    /// dst = a * b
    fn vmul(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String>;
    /// dst = a / b
    fn vdiv(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String>;
    /// dst = dst * a + b  (in-place FMA for Horner chains)
    fn vfmadd213(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String>;
    /// dst = a * b + dst  (accumulating FMA)
    fn vfmadd231(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String>;
    /// dst = -a
    fn vneg(&mut self, dst: VReg, a: VReg) -> Result<(), String>;
    /// dst = |a|
    fn vabs(&mut self, dst: VReg, a: VReg) -> Result<(), String>;
    /// dst = sqrt(a)
    fn vsqrt(&mut self, dst: VReg, a: VReg) -> Result<(), String>;
    /// dst = max(a, b)
    fn vmax(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String>;
    /// dst = min(a, b)
    fn vmin(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String>;
    /// dst = 1/a
    fn vrecip(&mut self, dst: VReg, a: VReg) -> Result<(), String>;
    /// dst = round a to nearest integer, ties to even (as f32)
    fn vround(&mut self, dst: VReg, a: VReg) -> Result<(), String>;

    // ── Register moves and constants ────────────────────────────────────

    /// dst = copy src
    fn vmov(&mut self, dst: VReg, src: VReg) -> Result<(), String>;
    /// dst = all zeros
    fn vzero(&mut self, dst: VReg) -> Result<(), String>;
    /// dst = broadcast f32 constant to all lanes (table-resident)
    fn vbroadcast_const(&mut self, dst: VReg, val: f32) -> Result<(), String>;
    /// dst = broadcast raw 32-bit pattern to all lanes (table-resident)
    fn vbroadcast_bits(&mut self, dst: VReg, bits: u32) -> Result<(), String>;

    // ── Bitwise / integer operations (32-bit lanes) ─────────────────────

    /// dst = a & b
    fn vand(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String>;
    /// dst = a | b
    fn vor(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String>;
    /// dst = a ^ b
    fn vxor(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String>;
    /// dst = a >> imm  (logical)
    fn vshr_i32(&mut self, dst: VReg, a: VReg, imm: u8) -> Result<(), String>;
    /// dst = a << imm
    fn vshl_i32(&mut self, dst: VReg, a: VReg, imm: u8) -> Result<(), String>;
    /// dst = a + b  (wrapping integer add)
    fn vadd_i32(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String>;
    /// dst = convert i32 lanes to f32
    fn vcvt_i32_f32(&mut self, dst: VReg, a: VReg) -> Result<(), String>;
    /// dst = convert f32 lanes to i32 (truncate toward zero, saturating)
    fn vcvt_f32_i32(&mut self, dst: VReg, a: VReg) -> Result<(), String>;

    // ── 16-bit format conversions ───────────────────────────────────────

    /// dst.s = f32(f16 in the low half of each 32-bit lane of a)
    fn vcvt_f16_f32(&mut self, dst: VReg, a: VReg) -> Result<(), String>;
    /// Low half of each lane of dst = f16(a), high half zeroed (round to nearest even).
    fn vcvt_f32_f16(&mut self, dst: VReg, a: VReg) -> Result<(), String>;
    /// Low half of each lane of dst = bf16(a), high half zeroed (round to nearest even).
    fn vcvt_f32_bf16(&mut self, dst: VReg, a: VReg) -> Result<(), String>;
    /// High half of each lane of dst = bf16(a), low half preserved.
    fn vcvt_f32_bf16_hi(&mut self, dst: VReg, a: VReg) -> Result<(), String>;

    // ── Predicates ──────────────────────────────────────────────────────

    /// All lanes of the given size active.
    fn ptrue(&mut self, dst: PReg, lane: LaneSize) -> Result<(), String>;
    /// Lane i active iff `lo + i < hi` (signed).
    fn pwhilelt(&mut self, dst: PReg, lane: LaneSize, lo: GReg, hi: GReg) -> Result<(), String>;
    /// Lane i (32-bit) active iff `cond(a[i], b[i])`.
    fn vcmp(&mut self, dst: PReg, cond: Cond, a: VReg, b: VReg) -> Result<(), String>;
    /// dst[i] = pred[i] ? a[i] : b[i]  (32-bit lanes)
    fn vsel(&mut self, dst: VReg, pred: PReg, a: VReg, b: VReg) -> Result<(), String>;

    // ── Memory operations ───────────────────────────────────────────────

    /// Predicated zeroing load: inactive lanes are not read and become zero.
    fn vload(&mut self, dst: VReg, pred: PReg, lane: LaneSize, mem: MemOperand) -> Result<(), String>;
    /// Predicated store: inactive lanes are not written.
    fn vstore(&mut self, mem: MemOperand, pred: PReg, lane: LaneSize, src: VReg) -> Result<(), String>;

    // ── GPR operations ──────────────────────────────────────────────────

    /// dst = 64-bit load from memory.
    fn gpr_load(&mut self, dst: GReg, mem: MemOperand) -> Result<(), String>;
    /// Load immediate value into GPR.
    fn gpr_load_imm(&mut self, dst: GReg, imm: i64) -> Result<(), String>;
    /// dst = dst + imm
    fn gpr_add_imm(&mut self, dst: GReg, imm: i64) -> Result<(), String>;

    // ── Control flow ────────────────────────────────────────────────────

    /// Allocate a new label (returns unique label ID).
    fn alloc_label(&mut self) -> Label;
    /// Define a label at the current code position.
    fn define_label(&mut self, label: Label) -> Result<(), String>;
    /// Unconditional jump to label.
    fn jump(&mut self, label: Label) -> Result<(), String>;
    /// Compare GPR (signed) to immediate and branch if `cond` holds.
    fn cmp_and_branch(&mut self, reg: GReg, cond: Cond, imm: i64, label: Label) -> Result<(), String>;

    // ── Constant table ──────────────────────────────────────────────────

    /// dst = address of the routine's constant table; enables `vbroadcast_*`.
    fn load_table_addr(&mut self, dst: GReg) -> Result<(), String>;
    /// Persist the constant table after the code.
    fn emit_table(&mut self) -> Result<(), String>;

    // ── Function frame ──────────────────────────────────────────────────

    /// Emit function prologue (register state reset).
    fn emit_prologue(&mut self) -> Result<(), String>;
    /// Emit function epilogue (return).
    fn emit_epilogue(&mut self) -> Result<(), String>;
    /// Finalize code generation and return the assembled routine.
    fn finalize(&mut self) -> Result<CodegenOutput, String>;
}
