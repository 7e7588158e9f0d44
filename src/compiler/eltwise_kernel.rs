//! Elementwise kernel generator.
//!
//! Emits one routine per (ISA, data type, algorithm, direction). The routine
//! runs a vector-length-agnostic loop over `work_amount` elements:
//!
//! ```text
//!   entry:       load args, table address, all-true predicates
//!                work < W ? -> tail
//!   vectorized:  load (widen) -> inject [* diff_dst] -> (narrow) store
//!                advance pointers, work -= W
//!                work >= W ? -> vectorized
//!   tail:        work <= 0 ? -> done
//!                predicate = whilelt(0, work); -> vectorized
//!   done:        ret, constant table
//! ```
//!
//! The tail reuses the vectorized body under a narrowed predicate, so there
//! is no scalar remainder loop. After the single predicated pass `work` is
//! negative and control reaches `done`.

use super::codegen::{
    cvt, Assembler, Cond, GReg, LaneSize, MemOperand, PReg, SimdOps, VReg, PARAM_REG,
};
use super::executable::{CompiledKernel, ExecStats, KernelArgs};
use super::injector::{EltwiseInjector, Injector};
use crate::config::EltwiseConfig;
use crate::dispatch::{Capabilities, IsaLevel};
use crate::types::{AlgKind, DataType, Direction, EltwiseError, EltwiseResult};

const REG_SRC: GReg = GReg(11);
const REG_DST: GReg = GReg(8);
const REG_DIFF_DST: GReg = GReg(10);
const REG_WORK: GReg = GReg(6);
const REG_TMP: GReg = GReg(1);

/// All-true / tail predicate for 32-bit lanes.
const PG_S: PReg = PReg(5);
/// All-true / tail predicate for 16-bit lanes.
const PG_H: PReg = PReg(7);

const V_SRC: VReg = VReg(1);
const V_SRC_ODD: VReg = VReg(2);
const V_DIFF: VReg = VReg(3);
const V_DIFF_ODD: VReg = VReg(4);

/// Everything that selects one specialized routine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelDesc {
    pub isa: IsaLevel,
    pub data_type: DataType,
    pub alg: AlgKind,
    pub alpha: f32,
    pub beta: f32,
    pub direction: Direction,
    /// The derivative input is the forward output rather than the source.
    pub use_dst: bool,
}

impl KernelDesc {
    pub fn new(
        isa: IsaLevel,
        data_type: DataType,
        alg: AlgKind,
        alpha: f32,
        beta: f32,
        direction: Direction,
    ) -> Self {
        KernelDesc {
            isa,
            data_type,
            alg,
            alpha,
            beta,
            direction,
            use_dst: !direction.is_fwd() && alg.use_dst_for_bwd(),
        }
    }

    /// Elements per vector register.
    #[inline]
    pub fn simd_w(&self) -> usize {
        self.isa.vlen_bytes() / self.data_type.size_bytes()
    }

    #[inline]
    fn mem_lane(&self) -> (LaneSize, PReg) {
        match self.data_type {
            DataType::F32 => (LaneSize::S32, PG_S),
            DataType::Bf16 | DataType::F16 => (LaneSize::H16, PG_H),
        }
    }
}

/// Builds a [`CompiledKernel`] for one [`KernelDesc`].
pub struct EltwiseKernelGenerator {
    desc: KernelDesc,
    injector: Box<dyn Injector>,
}

impl EltwiseKernelGenerator {
    /// Generator using the built-in [`EltwiseInjector`].
    pub fn new(desc: KernelDesc) -> Self {
        let injector = EltwiseInjector::new(desc.alg, desc.alpha, desc.beta, desc.direction);
        Self::with_injector(desc, Box::new(injector))
    }

    /// Generator delegating the math to a caller-supplied injector.
    pub fn with_injector(desc: KernelDesc, injector: Box<dyn Injector>) -> Self {
        EltwiseKernelGenerator { desc, injector }
    }

    pub fn desc(&self) -> &KernelDesc {
        &self.desc
    }

    /// Emit and finalize the routine.
    ///
    /// Fails with [`EltwiseError::Build`] when `caps` lacks the target ISA,
    /// the algorithm cannot be emitted, or assembly fails.
    pub fn generate(mut self, caps: &Capabilities) -> EltwiseResult<EltwiseKernel> {
        let d = self.desc;
        if !caps.mayiuse(d.isa) {
            return Err(EltwiseError::Build(format!("{} is not available", d.isa)));
        }
        if !EltwiseInjector::is_supported(d.isa, d.alg, d.direction) {
            return Err(EltwiseError::Build(format!(
                "{} {:?} is not supported on {}",
                d.alg.name(),
                d.direction,
                d.isa
            )));
        }
        let clobbered = self.injector.scratch_vregs();
        if [V_SRC, V_SRC_ODD, V_DIFF, V_DIFF_ODD].iter().any(|v| clobbered.contains(v)) {
            return Err(EltwiseError::Build("injector scratch overlaps data registers".into()));
        }
        let clobbered = self.injector.scratch_pregs();
        if clobbered.contains(&PG_S) || clobbered.contains(&PG_H) {
            return Err(EltwiseError::Build("injector scratch overlaps loop predicates".into()));
        }

        let mut asm = Assembler::new(d.isa);
        self.emit(&mut asm).map_err(EltwiseError::Build)?;
        let out = asm.finalize().map_err(EltwiseError::Build)?;
        let kernel = CompiledKernel::from_output(out)?;

        log::debug!(
            "eltwise kernel: isa={} dt={:?} alg={} dir={:?} use_dst={} simd_w={} insns={} consts={}",
            d.isa,
            d.data_type,
            d.alg.name(),
            d.direction,
            d.use_dst,
            d.simd_w(),
            kernel.code_size(),
            kernel.table().len()
        );
        if EltwiseConfig::global().jit_dump {
            log::info!(
                "jit dump eltwise {} {:?} {:?} {}:\n{}",
                d.alg.name(),
                d.direction,
                d.data_type,
                d.isa,
                kernel.listing()
            );
        }

        Ok(EltwiseKernel { desc: d, kernel })
    }

    fn emit(&mut self, e: &mut Assembler) -> Result<(), String> {
        let d = self.desc;
        let is_fwd = d.direction.is_fwd();
        let reduced = d.data_type.is_reduced_precision();
        let simd_w = d.simd_w() as i64;
        let vlen = d.isa.vlen_bytes() as i64;
        let (lane, pred) = d.mem_lane();

        e.emit_prologue()?;

        e.gpr_load(REG_SRC, MemOperand::at(PARAM_REG, KernelArgs::SRC_OFFSET))?;
        e.gpr_load(REG_DST, MemOperand::at(PARAM_REG, KernelArgs::DST_OFFSET))?;
        if !is_fwd {
            e.gpr_load(REG_DIFF_DST, MemOperand::at(PARAM_REG, KernelArgs::DIFF_DST_OFFSET))?;
        }
        e.gpr_load(REG_WORK, MemOperand::at(PARAM_REG, KernelArgs::WORK_AMOUNT_OFFSET))?;

        self.injector.load_table_addr(e)?;

        e.ptrue(PG_S, LaneSize::S32)?;
        if reduced {
            e.ptrue(PG_H, LaneSize::H16)?;
        }

        let vectorized = e.alloc_label();
        let tail = e.alloc_label();
        let done = e.alloc_label();

        e.cmp_and_branch(REG_WORK, Cond::Lt, simd_w, tail)?;

        e.define_label(vectorized)?;
        {
            e.vload(V_SRC, pred, lane, MemOperand::base(REG_SRC))?;
            if reduced {
                cvt::emit_widen(e, d.data_type, V_SRC, V_SRC_ODD)?;
                self.injector.compute_vector_range(e, &[V_SRC, V_SRC_ODD])?;
            } else {
                self.injector.compute_vector(e, V_SRC)?;
            }

            if !is_fwd {
                e.vload(V_DIFF, pred, lane, MemOperand::base(REG_DIFF_DST))?;
                if reduced {
                    cvt::emit_widen(e, d.data_type, V_DIFF, V_DIFF_ODD)?;
                    e.vmul(V_SRC_ODD, V_SRC_ODD, V_DIFF_ODD)?;
                }
                e.vmul(V_SRC, V_SRC, V_DIFF)?;
            }

            if reduced {
                cvt::emit_narrow(e, d.data_type, V_SRC, V_SRC_ODD)?;
            }
            e.vstore(MemOperand::base(REG_DST), pred, lane, V_SRC)?;

            e.gpr_add_imm(REG_SRC, vlen)?;
            e.gpr_add_imm(REG_DST, vlen)?;
            if !is_fwd {
                e.gpr_add_imm(REG_DIFF_DST, vlen)?;
            }
            e.gpr_add_imm(REG_WORK, -simd_w)?;
            e.cmp_and_branch(REG_WORK, Cond::Ge, simd_w, vectorized)?;
        }

        e.define_label(tail)?;
        e.cmp_and_branch(REG_WORK, Cond::Le, 0, done)?;
        e.gpr_load_imm(REG_TMP, 0)?;
        e.pwhilelt(pred, lane, REG_TMP, REG_WORK)?;
        e.jump(vectorized)?;

        e.define_label(done)?;
        e.emit_epilogue()?;

        self.injector.prepare_table(e)
    }
}

/// A generated elementwise routine together with the descriptor it was
/// specialized for.
#[derive(Debug, Clone)]
pub struct EltwiseKernel {
    desc: KernelDesc,
    kernel: CompiledKernel,
}

impl EltwiseKernel {
    pub fn desc(&self) -> &KernelDesc {
        &self.desc
    }

    pub fn compiled(&self) -> &CompiledKernel {
        &self.kernel
    }

    /// Run over one partition.
    ///
    /// # Safety
    /// See [`CompiledKernel::execute`].
    #[inline]
    pub unsafe fn call(&self, args: &KernelArgs) {
        self.kernel.execute(args)
    }

    /// # Safety
    /// See [`CompiledKernel::execute`].
    pub unsafe fn call_with_stats(&self, args: &KernelArgs) -> ExecStats {
        self.kernel.execute_with_stats(args)
    }

    pub fn listing(&self) -> String {
        self.kernel.listing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::{bf16, f16};

    fn caps() -> Capabilities {
        Capabilities::from_levels(&[IsaLevel::Sve128, IsaLevel::Sve256, IsaLevel::Avx2])
    }

    fn build(isa: IsaLevel, dt: DataType, alg: AlgKind, alpha: f32, dir: Direction) -> EltwiseKernel {
        let desc = KernelDesc::new(isa, dt, alg, alpha, 0.0, dir);
        EltwiseKernelGenerator::new(desc).generate(&caps()).unwrap()
    }

    fn run_f32(k: &EltwiseKernel, src: &[f32], diff: Option<&[f32]>, dst: &mut [f32]) -> ExecStats {
        let args = KernelArgs {
            src: src.as_ptr() as *const u8,
            dst: dst.as_mut_ptr() as *mut u8,
            diff_dst: diff.map_or(std::ptr::null(), |d| d.as_ptr() as *const u8),
            work_amount: src.len() as u64,
        };
        unsafe { k.call_with_stats(&args) }
    }

    #[test]
    fn test_simd_w() {
        let d = KernelDesc::new(IsaLevel::Sve128, DataType::F32, AlgKind::Relu, 0.0, 0.0, Direction::Forward);
        assert_eq!(d.simd_w(), 4);
        let d = KernelDesc { data_type: DataType::Bf16, ..d };
        assert_eq!(d.simd_w(), 8);
        let d = KernelDesc { isa: IsaLevel::Avx512Core, ..d };
        assert_eq!(d.simd_w(), 32);
    }

    #[test]
    fn test_use_dst_only_backward() {
        let f = KernelDesc::new(IsaLevel::Avx2, DataType::F32, AlgKind::TanhUseDstForBwd, 0.0, 0.0, Direction::Forward);
        assert!(!f.use_dst);
        let b = KernelDesc::new(IsaLevel::Avx2, DataType::F32, AlgKind::TanhUseDstForBwd, 0.0, 0.0, Direction::Backward);
        assert!(b.use_dst);
    }

    #[test]
    fn test_relu_nine_elements() {
        let k = build(IsaLevel::Sve128, DataType::F32, AlgKind::Relu, 0.5, Direction::Forward);
        let src = [-4.0, -3.0, -2.0, -1.0, 0.0, 1.0, 2.0, 3.0, 4.0f32];
        let mut dst = [f32::NAN; 9];
        let stats = run_f32(&k, &src, None, &mut dst);
        assert_eq!(dst, [-2.0, -1.5, -1.0, -0.5, 0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(stats.stores, 3);
        assert_eq!(stats.tail_passes, 1);
    }

    #[test]
    fn test_exact_multiple_skips_tail() {
        let k = build(IsaLevel::Sve128, DataType::F32, AlgKind::Square, 0.0, Direction::Forward);
        let src: Vec<f32> = (0..8).map(|i| i as f32).collect();
        let mut dst = vec![0.0; 8];
        let stats = run_f32(&k, &src, None, &mut dst);
        assert_eq!(stats.tail_passes, 0);
        assert_eq!(stats.stores, 2);
        assert_eq!(dst[7], 49.0);
    }

    #[test]
    fn test_linear_backward_scales_gradient() {
        let k = build(IsaLevel::Avx2, DataType::F32, AlgKind::Linear, 3.0, Direction::Backward);
        let src = vec![7.0f32; 11];
        let diff: Vec<f32> = (0..11).map(|i| i as f32).collect();
        let mut dst = vec![0.0; 11];
        run_f32(&k, &src, Some(&diff), &mut dst);
        for i in 0..11 {
            assert_eq!(dst[i], 3.0 * i as f32);
        }
    }

    #[test]
    fn test_bf16_identity_roundtrip_bits() {
        let k = build(IsaLevel::Sve128, DataType::Bf16, AlgKind::Linear, 1.0, Direction::Forward);
        let src: Vec<bf16> = [1.0f32, -2.5, 3.0e-3, 65504.0, -0.0, 1.0e30, 7.0, 0.1, 9.0, -11.0]
            .iter()
            .map(|&x| bf16::from_f32(x))
            .collect();
        let mut dst = vec![bf16::ZERO; 12];
        let args = KernelArgs {
            src: src.as_ptr() as *const u8,
            dst: dst.as_mut_ptr() as *mut u8,
            diff_dst: std::ptr::null(),
            work_amount: src.len() as u64,
        };
        let stats = unsafe { k.call_with_stats(&args) };
        for i in 0..src.len() {
            assert_eq!(dst[i].to_bits(), src[i].to_bits());
        }
        assert_eq!(dst[10].to_bits(), 0);
        assert_eq!(stats.tail_passes, 1);
    }

    #[test]
    fn test_f16_square() {
        let k = build(IsaLevel::Sve256, DataType::F16, AlgKind::Square, 0.0, Direction::Forward);
        let src: Vec<f16> = (0..21).map(|i| f16::from_f32(i as f32 * 0.5)).collect();
        let mut dst = vec![f16::ZERO; 21];
        let args = KernelArgs {
            src: src.as_ptr() as *const u8,
            dst: dst.as_mut_ptr() as *mut u8,
            diff_dst: std::ptr::null(),
            work_amount: 21,
        };
        unsafe { k.call(&args) };
        for i in 0..21 {
            let x = i as f32 * 0.5;
            assert_eq!(dst[i], f16::from_f32(x * x));
        }
    }

    #[test]
    fn test_unavailable_isa_is_build_error() {
        let desc = KernelDesc::new(IsaLevel::Avx512Core, DataType::F32, AlgKind::Relu, 0.0, 0.0, Direction::Forward);
        let err = EltwiseKernelGenerator::new(desc).generate(&caps()).unwrap_err();
        assert!(matches!(err, EltwiseError::Build(_)));
    }

    #[test]
    fn test_round_backward_is_build_error() {
        let desc = KernelDesc::new(IsaLevel::Sve128, DataType::F32, AlgKind::Round, 0.0, 0.0, Direction::Backward);
        let err = EltwiseKernelGenerator::new(desc).generate(&caps()).unwrap_err();
        assert!(matches!(err, EltwiseError::Build(_)));
    }
}
