//! CompiledKernel: a finalized elementwise routine plus its executor.
//!
//! Generated code targets the virtual predicated SIMD machine described by
//! `SimdOps`. A `CompiledKernel` owns the resolved instruction stream and the
//! constant table, and runs the routine against a `KernelArgs` parameter
//! block the same way a native routine would: the block address arrives in
//! `PARAM_REG` and every pointer is read through general registers.
//!
//! The kernel is immutable after construction; each invocation gets a fresh
//! private register file, so one kernel may be executed concurrently from
//! many threads on disjoint buffers.

use std::fmt::Write as _;
use std::mem::offset_of;

use half::{bf16, f16};

use super::codegen::{
    BinOp, CodegenOutput, GReg, Insn, LaneSize, MemOperand, UnOp, PARAM_REG,
};
use crate::types::{EltwiseError, EltwiseResult};

const MAX_VLEN: usize = 64;
const MAX_LANES: usize = MAX_VLEN / 4;
const NUM_VREGS: usize = 32;
const NUM_PREGS: usize = 16;
const NUM_GREGS: usize = 16;

/// Parameter block of a generated routine.
///
/// `work_amount` counts elements, not bytes. `diff_dst` is null for forward
/// routines.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct KernelArgs {
    pub src: *const u8,
    pub dst: *mut u8,
    pub diff_dst: *const u8,
    pub work_amount: u64,
}

impl KernelArgs {
    pub const SRC_OFFSET: i32 = offset_of!(KernelArgs, src) as i32;
    pub const DST_OFFSET: i32 = offset_of!(KernelArgs, dst) as i32;
    pub const DIFF_DST_OFFSET: i32 = offset_of!(KernelArgs, diff_dst) as i32;
    pub const WORK_AMOUNT_OFFSET: i32 = offset_of!(KernelArgs, work_amount) as i32;
}

/// Counters collected by [`CompiledKernel::execute_with_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecStats {
    pub insns_retired: u64,
    /// Vector stores executed.
    pub stores: u64,
    /// Predicate narrowings (`whilelt`), i.e. passes through the tail.
    pub tail_passes: u64,
}

/// A generated routine, ready to run.
#[derive(Debug, Clone)]
pub struct CompiledKernel {
    code: Vec<Insn>,
    table: Vec<u32>,
    vlen: usize,
}

impl CompiledKernel {
    /// Validate a codegen result and take ownership of it.
    pub fn from_output(out: CodegenOutput) -> EltwiseResult<Self> {
        if !matches!(out.vlen, 16 | 32 | 64) {
            return Err(EltwiseError::Build(format!(
                "unsupported vector length {} bytes",
                out.vlen
            )));
        }
        if !matches!(out.code.last(), Some(Insn::Ret)) {
            return Err(EltwiseError::Build("routine does not end in ret".into()));
        }
        let len = out.code.len() as u32;
        for (i, insn) in out.code.iter().enumerate() {
            match insn {
                Insn::Jump { target } | Insn::BranchCmp { target, .. } if *target >= len => {
                    return Err(EltwiseError::Build(format!(
                        "insn {i}: branch target {target} out of range"
                    )));
                }
                Insn::Broadcast { mem, .. }
                    if mem.offset < 0
                        || mem.offset % 4 != 0
                        || mem.offset as usize / 4 >= out.table.len() =>
                {
                    return Err(EltwiseError::Build(format!(
                        "insn {i}: constant offset {} outside table of {} entries",
                        mem.offset,
                        out.table.len()
                    )));
                }
                _ => {}
            }
        }
        Ok(CompiledKernel {
            code: out.code,
            table: out.table,
            vlen: out.vlen,
        })
    }

    #[inline]
    pub fn vlen(&self) -> usize {
        self.vlen
    }

    /// Number of instructions in the routine.
    pub fn code_size(&self) -> usize {
        self.code.len()
    }

    pub fn table(&self) -> &[u32] {
        &self.table
    }

    /// Human-readable disassembly.
    pub fn listing(&self) -> String {
        let mut s = String::new();
        for (i, insn) in self.code.iter().enumerate() {
            let _ = writeln!(s, "{i:5}: {insn}");
        }
        if !self.table.is_empty() {
            let _ = writeln!(s, "table:");
            for (i, bits) in self.table.iter().enumerate() {
                let _ = writeln!(s, "  [{:3}] {bits:#010x} ({})", i * 4, f32::from_bits(*bits));
            }
        }
        s
    }

    /// Run the routine once over `args`.
    ///
    /// # Safety
    /// `src` (and `diff_dst` for backward routines) must be readable and
    /// `dst` writable for `work_amount` elements of the routine's data type.
    #[inline]
    pub unsafe fn execute(&self, args: &KernelArgs) {
        let mut stats = ExecStats::default();
        self.run(args, &mut stats);
    }

    /// Like [`execute`](Self::execute) but also returns execution counters.
    ///
    /// # Safety
    /// Same contract as [`execute`](Self::execute).
    pub unsafe fn execute_with_stats(&self, args: &KernelArgs) -> ExecStats {
        let mut stats = ExecStats::default();
        self.run(args, &mut stats);
        stats
    }

    unsafe fn run(&self, args: &KernelArgs, stats: &mut ExecStats) {
        let mut m = Machine::new(self.vlen);
        m.g[PARAM_REG.0 as usize] = args as *const KernelArgs as u64;

        let mut pc = 0usize;
        while let Some(insn) = self.code.get(pc) {
            stats.insns_retired += 1;
            pc += 1;
            match *insn {
                Insn::Bin { op, dst, a, b } => {
                    let (a, b) = (m.v[a.0 as usize], m.v[b.0 as usize]);
                    let d = &mut m.v[dst.0 as usize];
                    for i in 0..m.n32 {
                        d[i] = bin(op, a[i], b[i]);
                    }
                }
                Insn::Un { op, dst, a } => {
                    let a = m.v[a.0 as usize];
                    let d = &mut m.v[dst.0 as usize];
                    for i in 0..m.n32 {
                        d[i] = un(op, a[i], d[i]);
                    }
                }
                Insn::Fma213 { dst, a, b } => {
                    let (a, b) = (m.v[a.0 as usize], m.v[b.0 as usize]);
                    let d = &mut m.v[dst.0 as usize];
                    for i in 0..m.n32 {
                        d[i] = f32::from_bits(d[i])
                            .mul_add(f32::from_bits(a[i]), f32::from_bits(b[i]))
                            .to_bits();
                    }
                }
                Insn::Fma231 { dst, a, b } => {
                    let (a, b) = (m.v[a.0 as usize], m.v[b.0 as usize]);
                    let d = &mut m.v[dst.0 as usize];
                    for i in 0..m.n32 {
                        d[i] = f32::from_bits(a[i])
                            .mul_add(f32::from_bits(b[i]), f32::from_bits(d[i]))
                            .to_bits();
                    }
                }
                Insn::Shr { dst, a, imm } => {
                    let a = m.v[a.0 as usize];
                    let d = &mut m.v[dst.0 as usize];
                    for i in 0..m.n32 {
                        d[i] = a[i] >> imm;
                    }
                }
                Insn::Shl { dst, a, imm } => {
                    let a = m.v[a.0 as usize];
                    let d = &mut m.v[dst.0 as usize];
                    for i in 0..m.n32 {
                        d[i] = a[i] << imm;
                    }
                }
                Insn::Mov { dst, src } => m.v[dst.0 as usize] = m.v[src.0 as usize],
                Insn::Zero { dst } => m.v[dst.0 as usize] = [0; MAX_LANES],
                Insn::Broadcast { dst, mem } => {
                    let bits = (m.addr(mem) as *const u32).read_unaligned();
                    m.v[dst.0 as usize] = [bits; MAX_LANES];
                }
                Insn::PTrue { dst, lane } => {
                    let mask = m.lane_mask(lane, m.lanes(lane) as i64);
                    m.p[dst.0 as usize] = mask;
                }
                Insn::WhileLt { dst, lane, lo, hi } => {
                    stats.tail_passes += 1;
                    let lo = m.g[lo.0 as usize] as i64;
                    let hi = m.g[hi.0 as usize] as i64;
                    let active = hi.saturating_sub(lo).clamp(0, m.lanes(lane) as i64);
                    let mask = m.lane_mask(lane, active);
                    m.p[dst.0 as usize] = mask;
                }
                Insn::Cmp { dst, cond, a, b } => {
                    let (a, b) = (m.v[a.0 as usize], m.v[b.0 as usize]);
                    let mut mask = 0u64;
                    for i in 0..m.n32 {
                        if cond.eval_f32(f32::from_bits(a[i]), f32::from_bits(b[i])) {
                            mask |= 1 << (4 * i);
                        }
                    }
                    m.p[dst.0 as usize] = mask;
                }
                Insn::Sel { dst, pred, a, b } => {
                    let pm = m.p[pred.0 as usize];
                    let (a, b) = (m.v[a.0 as usize], m.v[b.0 as usize]);
                    let d = &mut m.v[dst.0 as usize];
                    for i in 0..m.n32 {
                        d[i] = if pm & (1 << (4 * i)) != 0 { a[i] } else { b[i] };
                    }
                }
                Insn::Load { dst, pred, lane, mem } => {
                    let pm = m.p[pred.0 as usize];
                    let base = m.addr(mem);
                    let mut r = [0u32; MAX_LANES];
                    match lane {
                        LaneSize::S32 => {
                            for (i, slot) in r.iter_mut().enumerate().take(m.n32) {
                                if pm & (1 << (4 * i)) != 0 {
                                    *slot = (base.add(4 * i) as *const u32).read_unaligned();
                                }
                            }
                        }
                        LaneSize::H16 => {
                            for i in 0..m.n32 * 2 {
                                if pm & (1 << (2 * i)) != 0 {
                                    let h = (base.add(2 * i) as *const u16).read_unaligned();
                                    r[i / 2] |= (h as u32) << (16 * (i % 2));
                                }
                            }
                        }
                    }
                    m.v[dst.0 as usize] = r;
                }
                Insn::Store { mem, pred, lane, src } => {
                    stats.stores += 1;
                    let pm = m.p[pred.0 as usize];
                    let base = m.addr(mem) as *mut u8;
                    let s = &m.v[src.0 as usize];
                    match lane {
                        LaneSize::S32 => {
                            for (i, v) in s.iter().enumerate().take(m.n32) {
                                if pm & (1 << (4 * i)) != 0 {
                                    (base.add(4 * i) as *mut u32).write_unaligned(*v);
                                }
                            }
                        }
                        LaneSize::H16 => {
                            for i in 0..m.n32 * 2 {
                                if pm & (1 << (2 * i)) != 0 {
                                    let h = (s[i / 2] >> (16 * (i % 2))) as u16;
                                    (base.add(2 * i) as *mut u16).write_unaligned(h);
                                }
                            }
                        }
                    }
                }
                Insn::GprLoad { dst, mem } => {
                    let v = (m.addr(mem) as *const u64).read_unaligned();
                    m.g[dst.0 as usize] = v;
                }
                Insn::GprImm { dst, imm } => m.g[dst.0 as usize] = imm as u64,
                Insn::GprAddImm { dst, imm } => {
                    let r = &mut m.g[dst.0 as usize];
                    *r = r.wrapping_add(imm as u64);
                }
                Insn::Jump { target } => pc = target as usize,
                Insn::BranchCmp { reg, cond, imm, target } => {
                    if cond.eval_i64(m.g[reg.0 as usize] as i64, imm) {
                        pc = target as usize;
                    }
                }
                Insn::TableAddr { dst } => m.g[dst.0 as usize] = self.table.as_ptr() as u64,
                Insn::Ret => break,
            }
        }
    }
}

/// Private register file of one invocation.
struct Machine {
    v: [[u32; MAX_LANES]; NUM_VREGS],
    p: [u64; NUM_PREGS],
    g: [u64; NUM_GREGS],
    /// Active 32-bit lanes.
    n32: usize,
}

impl Machine {
    fn new(vlen: usize) -> Self {
        Machine {
            v: [[0; MAX_LANES]; NUM_VREGS],
            p: [0; NUM_PREGS],
            g: [0; NUM_GREGS],
            n32: vlen / 4,
        }
    }

    #[inline]
    fn lanes(&self, lane: LaneSize) -> usize {
        self.n32 * 4 / lane.bytes()
    }

    /// Predicate with the first `active` lanes of size `lane` set.
    #[inline]
    fn lane_mask(&self, lane: LaneSize, active: i64) -> u64 {
        let step = lane.bytes();
        (0..active.max(0) as usize).fold(0u64, |m, i| m | 1 << (i * step))
    }

    #[inline]
    fn addr(&self, mem: MemOperand) -> *const u8 {
        let base: GReg = mem.base;
        self.g[base.0 as usize].wrapping_add(mem.offset as i64 as u64) as *const u8
    }
}

#[inline]
fn bin(op: BinOp, a: u32, b: u32) -> u32 {
    let (x, y) = (f32::from_bits(a), f32::from_bits(b));
    match op {
        BinOp::Add => (x + y).to_bits(),
        BinOp::Sub => (x - y).to_bits(),
        BinOp::Mul => (x * y).to_bits(),
        BinOp::Div => (x / y).to_bits(),
        // NaN in either operand wins, as with vector fmax/fmin
        BinOp::Max | BinOp::Min if x.is_nan() || y.is_nan() => f32::NAN.to_bits(),
        BinOp::Max => x.max(y).to_bits(),
        BinOp::Min => x.min(y).to_bits(),
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::AddI32 => a.wrapping_add(b),
    }
}

/// `prev` is the destination's old value, needed by merging conversions.
#[inline]
fn un(op: UnOp, a: u32, prev: u32) -> u32 {
    let x = f32::from_bits(a);
    match op {
        UnOp::Neg => a ^ 0x8000_0000,
        UnOp::Abs => a & 0x7FFF_FFFF,
        UnOp::Sqrt => x.sqrt().to_bits(),
        UnOp::Recip => (1.0 / x).to_bits(),
        UnOp::Round => x.round_ties_even().to_bits(),
        UnOp::CvtI32F32 => (a as i32 as f32).to_bits(),
        UnOp::CvtF32I32 => (x as i32) as u32,
        UnOp::CvtF16F32 => f16::from_bits(a as u16).to_f32().to_bits(),
        UnOp::CvtF32F16 => f16::from_f32(x).to_bits() as u32,
        UnOp::CvtF32Bf16 => bf16::from_f32(x).to_bits() as u32,
        UnOp::CvtF32Bf16Hi => (prev & 0xFFFF) | ((bf16::from_f32(x).to_bits() as u32) << 16),
    }
}
