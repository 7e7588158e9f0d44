//! Assembler: the concrete `SimdOps` emitter.
//!
//! Records one `Insn` per emitted operation. Branches carry label ids until
//! `finalize`, which resolves them to instruction indices. Constants are
//! interned into a table that must be addressed through a GPR loaded by
//! `load_table_addr` and persisted by `emit_table`.

use std::collections::HashMap;
use std::fmt;

use super::simd_ops::{
    Cond, GReg, Label, LaneSize, MemOperand, PReg, SimdOps, VReg, NUM_GREGS, NUM_PREGS,
};
use super::CodegenOutput;
use crate::dispatch::IsaLevel;

/// Two-operand lane operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
    And,
    Or,
    Xor,
    AddI32,
}

/// One-operand lane operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Abs,
    Sqrt,
    Recip,
    Round,
    CvtI32F32,
    CvtF32I32,
    CvtF16F32,
    CvtF32F16,
    CvtF32Bf16,
    /// Merges into the high halves of dst.
    CvtF32Bf16Hi,
}

/// One virtual machine instruction.
///
/// `target` fields hold a label id while assembling and an instruction index
/// once finalized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Insn {
    Bin { op: BinOp, dst: VReg, a: VReg, b: VReg },
    Un { op: UnOp, dst: VReg, a: VReg },
    Fma213 { dst: VReg, a: VReg, b: VReg },
    Fma231 { dst: VReg, a: VReg, b: VReg },
    Shr { dst: VReg, a: VReg, imm: u8 },
    Shl { dst: VReg, a: VReg, imm: u8 },
    Mov { dst: VReg, src: VReg },
    Zero { dst: VReg },
    Broadcast { dst: VReg, mem: MemOperand },
    PTrue { dst: PReg, lane: LaneSize },
    WhileLt { dst: PReg, lane: LaneSize, lo: GReg, hi: GReg },
    Cmp { dst: PReg, cond: Cond, a: VReg, b: VReg },
    Sel { dst: VReg, pred: PReg, a: VReg, b: VReg },
    Load { dst: VReg, pred: PReg, lane: LaneSize, mem: MemOperand },
    Store { mem: MemOperand, pred: PReg, lane: LaneSize, src: VReg },
    GprLoad { dst: GReg, mem: MemOperand },
    GprImm { dst: GReg, imm: i64 },
    GprAddImm { dst: GReg, imm: i64 },
    Jump { target: u32 },
    BranchCmp { reg: GReg, cond: Cond, imm: i64, target: u32 },
    TableAddr { dst: GReg },
    Ret,
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn lane(l: &LaneSize) -> &'static str {
            match l {
                LaneSize::H16 => "h",
                LaneSize::S32 => "s",
            }
        }
        match self {
            Insn::Bin { op, dst, a, b } => write!(f, "{op:?} v{}, v{}, v{}", dst.0, a.0, b.0),
            Insn::Un { op, dst, a } => write!(f, "{op:?} v{}, v{}", dst.0, a.0),
            Insn::Fma213 { dst, a, b } => write!(f, "fmadd213 v{}, v{}, v{}", dst.0, a.0, b.0),
            Insn::Fma231 { dst, a, b } => write!(f, "fmadd231 v{}, v{}, v{}", dst.0, a.0, b.0),
            Insn::Shr { dst, a, imm } => write!(f, "lsr v{}.s, v{}.s, #{imm}", dst.0, a.0),
            Insn::Shl { dst, a, imm } => write!(f, "lsl v{}.s, v{}.s, #{imm}", dst.0, a.0),
            Insn::Mov { dst, src } => write!(f, "mov v{}, v{}", dst.0, src.0),
            Insn::Zero { dst } => write!(f, "zero v{}", dst.0),
            Insn::Broadcast { dst, mem } => {
                write!(f, "ld1rw v{}.s, [x{}, #{}]", dst.0, mem.base.0, mem.offset)
            }
            Insn::PTrue { dst, lane: l } => write!(f, "ptrue p{}.{}", dst.0, lane(l)),
            Insn::WhileLt { dst, lane: l, lo, hi } => {
                write!(f, "whilelt p{}.{}, x{}, x{}", dst.0, lane(l), lo.0, hi.0)
            }
            Insn::Cmp { dst, cond, a, b } => {
                write!(f, "fcm{cond:?} p{}.s, v{}.s, v{}.s", dst.0, a.0, b.0)
            }
            Insn::Sel { dst, pred, a, b } => {
                write!(f, "sel v{}.s, p{}, v{}.s, v{}.s", dst.0, pred.0, a.0, b.0)
            }
            Insn::Load { dst, pred, lane: l, mem } => write!(
                f,
                "ld1{} v{}.{}, p{}/z, [x{}, #{}]",
                lane(l), dst.0, lane(l), pred.0, mem.base.0, mem.offset
            ),
            Insn::Store { mem, pred, lane: l, src } => write!(
                f,
                "st1{} v{}.{}, p{}, [x{}, #{}]",
                lane(l), src.0, lane(l), pred.0, mem.base.0, mem.offset
            ),
            Insn::GprLoad { dst, mem } => {
                write!(f, "ldr x{}, [x{}, #{}]", dst.0, mem.base.0, mem.offset)
            }
            Insn::GprImm { dst, imm } => write!(f, "mov x{}, #{imm}", dst.0),
            Insn::GprAddImm { dst, imm } => write!(f, "add x{}, x{}, #{imm}", dst.0, dst.0),
            Insn::Jump { target } => write!(f, "b {target}"),
            Insn::BranchCmp { reg, cond, imm, target } => {
                write!(f, "cmp x{}, #{imm}; b.{cond:?} {target}", reg.0)
            }
            Insn::TableAddr { dst } => write!(f, "adr x{}, table", dst.0),
            Insn::Ret => write!(f, "ret"),
        }
    }
}

/// Records `SimdOps` calls for one target ISA.
pub struct Assembler {
    isa: IsaLevel,
    code: Vec<Insn>,
    /// label id → instruction index
    labels: Vec<Option<u32>>,
    table: Vec<u32>,
    table_index: HashMap<u32, u32>,
    table_reg: Option<GReg>,
    table_persisted: bool,
    frame_open: bool,
    finalized: bool,
}

impl Assembler {
    pub fn new(isa: IsaLevel) -> Self {
        Assembler {
            isa,
            code: Vec::with_capacity(256),
            labels: Vec::new(),
            table: Vec::new(),
            table_index: HashMap::new(),
            table_reg: None,
            table_persisted: false,
            frame_open: false,
            finalized: false,
        }
    }

    pub fn isa(&self) -> IsaLevel {
        self.isa
    }

    /// Number of instructions emitted so far.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    fn check_v(&self, regs: &[VReg]) -> Result<(), String> {
        let n = self.isa.num_vregs();
        for r in regs {
            if r.0 as usize >= n {
                return Err(format!(
                    "vector register v{} out of range ({} has {n})",
                    r.0, self.isa
                ));
            }
        }
        Ok(())
    }

    fn check_p(&self, p: PReg) -> Result<(), String> {
        if p.0 as usize >= NUM_PREGS {
            return Err(format!("predicate register p{} out of range", p.0));
        }
        Ok(())
    }

    fn check_g(&self, regs: &[GReg]) -> Result<(), String> {
        for r in regs {
            if r.0 as usize >= NUM_GREGS {
                return Err(format!("general register x{} out of range", r.0));
            }
        }
        Ok(())
    }

    fn push(&mut self, insn: Insn) -> Result<(), String> {
        if self.finalized {
            return Err("emit after finalize".into());
        }
        if !self.frame_open {
            return Err(format!("emit outside of function frame: {insn}"));
        }
        self.code.push(insn);
        Ok(())
    }

    fn bin(&mut self, op: BinOp, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.check_v(&[dst, a, b])?;
        self.push(Insn::Bin { op, dst, a, b })
    }

    fn un(&mut self, op: UnOp, dst: VReg, a: VReg) -> Result<(), String> {
        self.check_v(&[dst, a])?;
        self.push(Insn::Un { op, dst, a })
    }

    fn broadcast_bits(&mut self, dst: VReg, bits: u32) -> Result<(), String> {
        self.check_v(&[dst])?;
        let base = self
            .table_reg
            .ok_or_else(|| "constant referenced before table address was loaded".to_string())?;
        if self.table_persisted {
            return Err("constant referenced after table was persisted".into());
        }
        let index = match self.table_index.get(&bits) {
            Some(&i) => i,
            None => {
                let i = self.table.len() as u32;
                self.table.push(bits);
                self.table_index.insert(bits, i);
                i
            }
        };
        let offset = i32::try_from(index as usize * 4)
            .map_err(|_| "constant table too large".to_string())?;
        self.push(Insn::Broadcast { dst, mem: MemOperand::at(base, offset) })
    }

    fn label_slot(&mut self, label: Label) -> Result<&mut Option<u32>, String> {
        self.labels
            .get_mut(label.0 as usize)
            .ok_or_else(|| format!("unknown label {}", label.0))
    }
}

impl SimdOps for Assembler {
    fn vlen(&self) -> usize {
        self.isa.vlen_bytes()
    }

    fn vadd(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.bin(BinOp::Add, dst, a, b)
    }
    fn vsub(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.bin(BinOp::Sub, dst, a, b)
    }
    fn vmul(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.bin(BinOp::Mul, dst, a, b)
    }
    fn vdiv(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.bin(BinOp::Div, dst, a, b)
    }
    fn vfmadd213(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.check_v(&[dst, a, b])?;
        self.push(Insn::Fma213 { dst, a, b })
    }
    fn vfmadd231(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.check_v(&[dst, a, b])?;
        self.push(Insn::Fma231 { dst, a, b })
    }
    fn vneg(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        self.un(UnOp::Neg, dst, a)
    }
    fn vabs(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        self.un(UnOp::Abs, dst, a)
    }
    fn vsqrt(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        self.un(UnOp::Sqrt, dst, a)
    }
    fn vmax(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.bin(BinOp::Max, dst, a, b)
    }
    fn vmin(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.bin(BinOp::Min, dst, a, b)
    }
    fn vrecip(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        self.un(UnOp::Recip, dst, a)
    }
    fn vround(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        self.un(UnOp::Round, dst, a)
    }

    fn vmov(&mut self, dst: VReg, src: VReg) -> Result<(), String> {
        self.check_v(&[dst, src])?;
        self.push(Insn::Mov { dst, src })
    }
    fn vzero(&mut self, dst: VReg) -> Result<(), String> {
        self.check_v(&[dst])?;
        self.push(Insn::Zero { dst })
    }
    fn vbroadcast_const(&mut self, dst: VReg, val: f32) -> Result<(), String> {
        self.broadcast_bits(dst, val.to_bits())
    }
    fn vbroadcast_bits(&mut self, dst: VReg, bits: u32) -> Result<(), String> {
        self.broadcast_bits(dst, bits)
    }

    fn vand(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.bin(BinOp::And, dst, a, b)
    }
    fn vor(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.bin(BinOp::Or, dst, a, b)
    }
    fn vxor(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.bin(BinOp::Xor, dst, a, b)
    }
    fn vshr_i32(&mut self, dst: VReg, a: VReg, imm: u8) -> Result<(), String> {
        self.check_v(&[dst, a])?;
        if imm >= 32 {
            return Err(format!("shift amount {imm} out of range"));
        }
        self.push(Insn::Shr { dst, a, imm })
    }
    fn vshl_i32(&mut self, dst: VReg, a: VReg, imm: u8) -> Result<(), String> {
        self.check_v(&[dst, a])?;
        if imm >= 32 {
            return Err(format!("shift amount {imm} out of range"));
        }
        self.push(Insn::Shl { dst, a, imm })
    }
    fn vadd_i32(&mut self, dst: VReg, a: VReg, b: VReg) -> Result<(), String> {
        self.bin(BinOp::AddI32, dst, a, b)
    }
    fn vcvt_i32_f32(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        self.un(UnOp::CvtI32F32, dst, a)
    }
    fn vcvt_f32_i32(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        self.un(UnOp::CvtF32I32, dst, a)
    }

    fn vcvt_f16_f32(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        self.un(UnOp::CvtF16F32, dst, a)
    }
    fn vcvt_f32_f16(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        self.un(UnOp::CvtF32F16, dst, a)
    }
    fn vcvt_f32_bf16(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        self.un(UnOp::CvtF32Bf16, dst, a)
    }
    fn vcvt_f32_bf16_hi(&mut self, dst: VReg, a: VReg) -> Result<(), String> {
        self.un(UnOp::CvtF32Bf16Hi, dst, a)
    }

    fn ptrue(&mut self, dst: PReg, lane: LaneSize) -> Result<(), String> {
        self.check_p(dst)?;
        self.push(Insn::PTrue { dst, lane })
    }
    fn pwhilelt(&mut self, dst: PReg, lane: LaneSize, lo: GReg, hi: GReg) -> Result<(), String> {
        self.check_p(dst)?;
        self.check_g(&[lo, hi])?;
        self.push(Insn::WhileLt { dst, lane, lo, hi })
    }
    fn vcmp(&mut self, dst: PReg, cond: Cond, a: VReg, b: VReg) -> Result<(), String> {
        self.check_p(dst)?;
        self.check_v(&[a, b])?;
        self.push(Insn::Cmp { dst, cond, a, b })
    }
    fn vsel(&mut self, dst: VReg, pred: PReg, a: VReg, b: VReg) -> Result<(), String> {
        self.check_p(pred)?;
        self.check_v(&[dst, a, b])?;
        self.push(Insn::Sel { dst, pred, a, b })
    }

    fn vload(&mut self, dst: VReg, pred: PReg, lane: LaneSize, mem: MemOperand) -> Result<(), String> {
        self.check_v(&[dst])?;
        self.check_p(pred)?;
        self.check_g(&[mem.base])?;
        self.push(Insn::Load { dst, pred, lane, mem })
    }
    fn vstore(&mut self, mem: MemOperand, pred: PReg, lane: LaneSize, src: VReg) -> Result<(), String> {
        self.check_v(&[src])?;
        self.check_p(pred)?;
        self.check_g(&[mem.base])?;
        self.push(Insn::Store { mem, pred, lane, src })
    }

    fn gpr_load(&mut self, dst: GReg, mem: MemOperand) -> Result<(), String> {
        self.check_g(&[dst, mem.base])?;
        self.push(Insn::GprLoad { dst, mem })
    }
    fn gpr_load_imm(&mut self, dst: GReg, imm: i64) -> Result<(), String> {
        self.check_g(&[dst])?;
        self.push(Insn::GprImm { dst, imm })
    }
    fn gpr_add_imm(&mut self, dst: GReg, imm: i64) -> Result<(), String> {
        self.check_g(&[dst])?;
        self.push(Insn::GprAddImm { dst, imm })
    }

    fn alloc_label(&mut self) -> Label {
        let id = self.labels.len() as u32;
        self.labels.push(None);
        Label(id)
    }
    fn define_label(&mut self, label: Label) -> Result<(), String> {
        let pos = self.code.len() as u32;
        let slot = self.label_slot(label)?;
        if slot.is_some() {
            return Err(format!("label {} defined twice", label.0));
        }
        *slot = Some(pos);
        Ok(())
    }
    fn jump(&mut self, label: Label) -> Result<(), String> {
        self.label_slot(label)?;
        self.push(Insn::Jump { target: label.0 })
    }
    fn cmp_and_branch(&mut self, reg: GReg, cond: Cond, imm: i64, label: Label) -> Result<(), String> {
        self.check_g(&[reg])?;
        self.label_slot(label)?;
        self.push(Insn::BranchCmp { reg, cond, imm, target: label.0 })
    }

    fn load_table_addr(&mut self, dst: GReg) -> Result<(), String> {
        self.check_g(&[dst])?;
        if self.table_reg.is_some() {
            return Err("table address loaded twice".into());
        }
        self.push(Insn::TableAddr { dst })?;
        self.table_reg = Some(dst);
        Ok(())
    }
    fn emit_table(&mut self) -> Result<(), String> {
        if self.table_reg.is_none() {
            return Err("table persisted without being addressed".into());
        }
        if self.table_persisted {
            return Err("table persisted twice".into());
        }
        self.table_persisted = true;
        Ok(())
    }

    fn emit_prologue(&mut self) -> Result<(), String> {
        if self.frame_open || !self.code.is_empty() {
            return Err("prologue must open the routine".into());
        }
        self.frame_open = true;
        Ok(())
    }
    fn emit_epilogue(&mut self) -> Result<(), String> {
        self.push(Insn::Ret)?;
        self.frame_open = false;
        Ok(())
    }

    fn finalize(&mut self) -> Result<CodegenOutput, String> {
        if self.finalized {
            return Err("finalize called twice".into());
        }
        if self.frame_open {
            return Err("routine has no epilogue".into());
        }
        if self.table_reg.is_some() && !self.table_persisted {
            return Err("constant table addressed but never persisted".into());
        }
        let mut code = std::mem::take(&mut self.code);
        for insn in code.iter_mut() {
            let target = match insn {
                Insn::Jump { target } | Insn::BranchCmp { target, .. } => target,
                _ => continue,
            };
            let pos = self
                .labels
                .get(*target as usize)
                .copied()
                .flatten()
                .ok_or_else(|| format!("label {} used but never defined", *target))?;
            *target = pos;
        }
        let len = code.len() as u32;
        for insn in &code {
            if let Insn::Jump { target } | Insn::BranchCmp { target, .. } = insn {
                if *target >= len {
                    return Err(format!("branch target {target} past end of routine"));
                }
            }
        }
        self.finalized = true;
        Ok(CodegenOutput {
            code,
            table: std::mem::take(&mut self.table),
            vlen: self.isa.vlen_bytes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::codegen::simd_ops::PARAM_REG;

    fn asm() -> Assembler {
        let mut a = Assembler::new(IsaLevel::Sve128);
        a.emit_prologue().unwrap();
        a
    }

    #[test]
    fn test_labels_resolve() {
        let mut a = asm();
        let top = a.alloc_label();
        let end = a.alloc_label();
        a.define_label(top).unwrap();
        a.gpr_add_imm(GReg(1), -1).unwrap();
        a.cmp_and_branch(GReg(1), Cond::Gt, 0, top).unwrap();
        a.jump(end).unwrap();
        a.define_label(end).unwrap();
        a.emit_epilogue().unwrap();
        let out = a.finalize().unwrap();
        assert_eq!(out.code[1], Insn::BranchCmp { reg: GReg(1), cond: Cond::Gt, imm: 0, target: 0 });
        assert_eq!(out.code[2], Insn::Jump { target: 3 });
        assert_eq!(out.code[3], Insn::Ret);
    }

    #[test]
    fn test_undefined_label_is_error() {
        let mut a = asm();
        let l = a.alloc_label();
        a.jump(l).unwrap();
        a.emit_epilogue().unwrap();
        assert!(a.finalize().unwrap_err().contains("never defined"));
    }

    #[test]
    fn test_double_define_is_error() {
        let mut a = asm();
        let l = a.alloc_label();
        a.define_label(l).unwrap();
        assert!(a.define_label(l).is_err());
    }

    #[test]
    fn test_vreg_range_checked_per_isa() {
        let mut a = Assembler::new(IsaLevel::Avx2);
        a.emit_prologue().unwrap();
        assert!(a.vmov(VReg(15), VReg(0)).is_ok());
        assert!(a.vmov(VReg(16), VReg(0)).is_err());
        let mut b = asm();
        assert!(b.vmov(VReg(31), VReg(0)).is_ok());
    }

    #[test]
    fn test_constant_requires_table() {
        let mut a = asm();
        assert!(a.vbroadcast_const(VReg(1), 1.0).is_err());
        a.load_table_addr(GReg(9)).unwrap();
        a.vbroadcast_const(VReg(1), 1.0).unwrap();
        a.vbroadcast_const(VReg(2), 2.0).unwrap();
        a.vbroadcast_const(VReg(3), 1.0).unwrap();
        a.emit_epilogue().unwrap();
        a.emit_table().unwrap();
        let out = a.finalize().unwrap();
        // 1.0 is interned once
        assert_eq!(out.table, vec![1.0f32.to_bits(), 2.0f32.to_bits()]);
        assert_eq!(out.code[3], Insn::Broadcast { dst: VReg(3), mem: MemOperand::at(GReg(9), 0) });
    }

    #[test]
    fn test_unpersisted_table_is_error() {
        let mut a = asm();
        a.load_table_addr(GReg(9)).unwrap();
        a.vbroadcast_const(VReg(1), 3.0).unwrap();
        a.emit_epilogue().unwrap();
        assert!(a.finalize().unwrap_err().contains("never persisted"));
    }

    #[test]
    fn test_emit_outside_frame_is_error() {
        let mut a = Assembler::new(IsaLevel::Sve128);
        assert!(a.gpr_load(GReg(1), MemOperand::base(PARAM_REG)).is_err());
        let mut b = asm();
        b.emit_epilogue().unwrap();
        assert!(b.vzero(VReg(0)).is_err());
    }

    #[test]
    fn test_listing_is_readable() {
        let insn = Insn::Load {
            dst: VReg(1),
            pred: PReg(5),
            lane: LaneSize::S32,
            mem: MemOperand::base(GReg(11)),
        };
        assert_eq!(insn.to_string(), "ld1s v1.s, p5/z, [x11, #0]");
    }
}
