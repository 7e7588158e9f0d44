//! Elementwise injector: emits one transform over vector registers in place.
//!
//! The kernel generator owns the loop, memory traffic and format conversion;
//! the injector only turns `x` into `f(x)` (forward) or `f'(x)` (backward)
//! inside registers. It is handed to the generator as a trait object so other
//! math engines can be plugged in.
//!
//! Backward computes the derivative only. The caller multiplies by the
//! upstream gradient. For `*UseDstForBwd` algorithms the register holds the
//! forward output `y` and the derivative is expressed in terms of `y`.

use super::codegen::{math_approx, Cond, GReg, PReg, SimdOps, VReg};
use crate::dispatch::IsaLevel;
use crate::types::{AlgKind, Direction};

/// sqrt(2/pi)
const GELU_K: f32 = 0.797_884_6;
const GELU_C: f32 = 0.044_715;

const DEFAULT_AUX: [VReg; 5] = [VReg(8), VReg(9), VReg(10), VReg(11), VReg(12)];

/// Math engine the generator delegates the transform to.
pub trait Injector: Send {
    /// Emit the constant table address load. Called once at routine entry.
    fn load_table_addr(&mut self, e: &mut dyn SimdOps) -> Result<(), String>;
    /// Transform one f32 vector in place.
    fn compute_vector(&mut self, e: &mut dyn SimdOps, v: VReg) -> Result<(), String>;
    /// Transform several f32 vectors in place (e.g. the even/odd halves of a
    /// widened 16-bit vector).
    fn compute_vector_range(&mut self, e: &mut dyn SimdOps, regs: &[VReg]) -> Result<(), String> {
        for &v in regs {
            self.compute_vector(e, v)?;
        }
        Ok(())
    }
    /// Persist the constant table. Called once after the compute path.
    fn prepare_table(&mut self, e: &mut dyn SimdOps) -> Result<(), String>;
    /// Vector registers the injector clobbers.
    fn scratch_vregs(&self) -> &[VReg];
    /// Predicate registers the injector clobbers.
    fn scratch_pregs(&self) -> &[PReg];
}

/// The built-in injector covering every [`AlgKind`].
#[derive(Debug, Clone)]
pub struct EltwiseInjector {
    alg: AlgKind,
    alpha: f32,
    beta: f32,
    is_fwd: bool,
    table_reg: GReg,
    aux: [VReg; 5],
    mask: [PReg; 1],
}

impl EltwiseInjector {
    /// Registers used by default: scratch `v8..=v12`, predicate `p1`, table
    /// address in `x9`.
    pub fn new(alg: AlgKind, alpha: f32, beta: f32, direction: Direction) -> Self {
        Self::with_registers(
            alg,
            alpha,
            beta,
            direction,
            GReg(9),
            DEFAULT_AUX,
            PReg(1),
        )
    }

    pub fn with_registers(
        alg: AlgKind,
        alpha: f32,
        beta: f32,
        direction: Direction,
        table_reg: GReg,
        aux: [VReg; 5],
        mask: PReg,
    ) -> Self {
        EltwiseInjector {
            alg,
            alpha,
            beta,
            is_fwd: direction.is_fwd(),
            table_reg,
            aux,
            mask: [mask],
        }
    }

    /// Whether `alg` can be emitted for `isa` in `direction`.
    pub fn is_supported(isa: IsaLevel, alg: AlgKind, direction: Direction) -> bool {
        if DEFAULT_AUX.iter().any(|r| r.0 as usize >= isa.num_vregs()) {
            return false;
        }
        match direction {
            Direction::Forward => true,
            Direction::Backward => alg != AlgKind::Round,
        }
    }

    pub fn alg(&self) -> AlgKind {
        self.alg
    }

    fn is_identity(&self) -> bool {
        self.is_fwd && self.alg == AlgKind::Linear && self.alpha == 1.0 && self.beta == 0.0
    }

    /// Whether any constant is referenced.
    pub fn need_table(&self) -> bool {
        use AlgKind::*;
        if self.is_identity() {
            return false;
        }
        if self.is_fwd {
            !matches!(self.alg, Abs | Square | Sqrt | Round)
        } else {
            !matches!(self.alg, Square | Log | ExpUseDstForBwd)
        }
    }

    fn fwd(&self, e: &mut dyn SimdOps, v: VReg) -> Result<(), String> {
        use AlgKind::*;
        let [a0, a1, a2, a3, a4] = self.aux;
        let p = self.mask[0];
        let (alpha, beta) = (self.alpha, self.beta);
        match self.alg {
            Relu | ReluUseDstForBwd => {
                e.vbroadcast_const(a0, alpha)?;
                e.vmul(a0, v, a0)?;
                e.vzero(a1)?;
                e.vcmp(p, Cond::Gt, v, a1)?;
                e.vsel(v, p, v, a0)
            }
            Linear => {
                if alpha == 1.0 && beta == 0.0 {
                    return Ok(());
                }
                e.vbroadcast_const(a0, alpha)?;
                if beta == 0.0 {
                    return e.vmul(v, v, a0);
                }
                e.vbroadcast_const(a1, beta)?;
                e.vfmadd213(v, a0, a1)
            }
            Abs => e.vabs(v, v),
            Square => e.vmul(v, v, v),
            Sqrt | SqrtUseDstForBwd => e.vsqrt(v, v),
            Exp | ExpUseDstForBwd => math_approx::emit_exp(e, v, v, [a0, a1, a2]),
            Log => math_approx::emit_log(e, v, v, [a0, a1, a2, a3], p),
            Tanh | TanhUseDstForBwd => math_approx::emit_tanh(e, v, v, [a0, a1, a2]),
            Logistic | LogisticUseDstForBwd => math_approx::emit_sigmoid(e, v, v, [a0, a1, a2]),
            Elu | EluUseDstForBwd => {
                math_approx::emit_exp(e, a3, v, [a0, a1, a2])?;
                e.vbroadcast_const(a0, 1.0)?;
                e.vsub(a3, a3, a0)?;
                e.vbroadcast_const(a0, alpha)?;
                e.vmul(a3, a3, a0)?;
                e.vzero(a1)?;
                e.vcmp(p, Cond::Gt, v, a1)?;
                e.vsel(v, p, v, a3)
            }
            SoftRelu => {
                // (max(ax, 0) + log(1 + exp(-|ax|))) / a
                e.vbroadcast_const(a0, alpha)?;
                e.vmul(v, v, a0)?;
                e.vabs(a4, v)?;
                e.vneg(a4, a4)?;
                e.vzero(a1)?;
                e.vmax(v, v, a1)?;
                math_approx::emit_exp(e, a4, a4, [a0, a1, a2])?;
                e.vbroadcast_const(a0, 1.0)?;
                e.vadd(a4, a4, a0)?;
                math_approx::emit_log(e, a4, a4, [a0, a1, a2, a3], p)?;
                e.vadd(v, v, a4)?;
                e.vbroadcast_const(a0, 1.0 / alpha)?;
                e.vmul(v, v, a0)
            }
            GeluTanh => {
                // 0.5x(1 + tanh(k(x + cx³)))
                e.vmul(a3, v, v)?;
                e.vbroadcast_const(a0, GELU_C)?;
                e.vmul(a3, a3, a0)?;
                e.vbroadcast_const(a0, 1.0)?;
                e.vadd(a3, a3, a0)?;
                e.vmul(a3, a3, v)?;
                e.vbroadcast_const(a0, GELU_K)?;
                e.vmul(a3, a3, a0)?;
                math_approx::emit_tanh(e, a4, a3, [a0, a1, a2])?;
                e.vbroadcast_const(a0, 1.0)?;
                e.vadd(a4, a4, a0)?;
                e.vmul(a4, a4, v)?;
                e.vbroadcast_const(a0, 0.5)?;
                e.vmul(v, a4, a0)
            }
            Swish => {
                e.vbroadcast_const(a0, alpha)?;
                e.vmul(a3, v, a0)?;
                math_approx::emit_sigmoid(e, a4, a3, [a0, a1, a2])?;
                e.vmul(v, v, a4)
            }
            Clip | ClipV2 | ClipV2UseDstForBwd => {
                e.vbroadcast_const(a0, alpha)?;
                e.vmax(v, v, a0)?;
                e.vbroadcast_const(a0, beta)?;
                e.vmin(v, v, a0)
            }
            HardSigmoid => self.hardsigmoid(e, v),
            HardSwish => {
                e.vmov(a3, v)?;
                self.hardsigmoid(e, a3)?;
                e.vmul(v, v, a3)
            }
            Round => e.vround(v, v),
        }
    }

    /// v = max(0, min(1, alpha*v + beta)); clobbers a0, a1.
    fn hardsigmoid(&self, e: &mut dyn SimdOps, v: VReg) -> Result<(), String> {
        let [a0, a1, ..] = self.aux;
        e.vbroadcast_const(a0, self.alpha)?;
        e.vbroadcast_const(a1, self.beta)?;
        e.vfmadd213(v, a0, a1)?;
        e.vzero(a0)?;
        e.vmax(v, v, a0)?;
        e.vbroadcast_const(a0, 1.0)?;
        e.vmin(v, v, a0)
    }

    fn bwd(&self, e: &mut dyn SimdOps, v: VReg) -> Result<(), String> {
        use AlgKind::*;
        let [a0, a1, a2, a3, a4] = self.aux;
        let p = self.mask[0];
        let (alpha, beta) = (self.alpha, self.beta);
        match self.alg {
            Relu | ReluUseDstForBwd => {
                e.vbroadcast_const(a0, 1.0)?;
                e.vbroadcast_const(a1, alpha)?;
                e.vzero(a2)?;
                e.vcmp(p, Cond::Gt, v, a2)?;
                e.vsel(v, p, a0, a1)
            }
            Linear => e.vbroadcast_const(v, alpha),
            Abs => {
                e.vzero(a0)?;
                e.vbroadcast_const(a1, 1.0)?;
                e.vbroadcast_const(a2, -1.0)?;
                e.vcmp(p, Cond::Gt, v, a0)?;
                e.vsel(a3, p, a1, a0)?;
                e.vcmp(p, Cond::Lt, v, a0)?;
                e.vsel(v, p, a2, a3)
            }
            Square => e.vadd(v, v, v),
            Sqrt => {
                e.vsqrt(a0, v)?;
                e.vbroadcast_const(a1, 0.5)?;
                e.vdiv(v, a1, a0)
            }
            SqrtUseDstForBwd => {
                e.vbroadcast_const(a1, 0.5)?;
                e.vdiv(v, a1, v)
            }
            Exp => math_approx::emit_exp(e, v, v, [a0, a1, a2]),
            ExpUseDstForBwd => Ok(()),
            Log => e.vrecip(v, v),
            Tanh | TanhUseDstForBwd => {
                if self.alg == Tanh {
                    math_approx::emit_tanh(e, v, v, [a0, a1, a2])?;
                }
                e.vmul(a0, v, v)?;
                e.vbroadcast_const(a1, 1.0)?;
                e.vsub(v, a1, a0)
            }
            Logistic | LogisticUseDstForBwd => {
                if self.alg == Logistic {
                    math_approx::emit_sigmoid(e, v, v, [a0, a1, a2])?;
                }
                e.vbroadcast_const(a0, 1.0)?;
                e.vsub(a0, a0, v)?;
                e.vmul(v, v, a0)
            }
            Elu => {
                math_approx::emit_exp(e, a3, v, [a0, a1, a2])?;
                e.vbroadcast_const(a0, alpha)?;
                e.vmul(a3, a3, a0)?;
                e.vbroadcast_const(a0, 1.0)?;
                e.vzero(a1)?;
                e.vcmp(p, Cond::Gt, v, a1)?;
                e.vsel(v, p, a0, a3)
            }
            EluUseDstForBwd => {
                e.vbroadcast_const(a0, alpha)?;
                e.vadd(a3, v, a0)?;
                e.vbroadcast_const(a0, 1.0)?;
                e.vzero(a1)?;
                e.vcmp(p, Cond::Gt, v, a1)?;
                e.vsel(v, p, a0, a3)
            }
            SoftRelu => {
                e.vbroadcast_const(a0, alpha)?;
                e.vmul(a3, v, a0)?;
                math_approx::emit_sigmoid(e, v, a3, [a0, a1, a2])
            }
            GeluTanh => {
                // 0.5(1 + t) + 0.5x(1 - t²)k(1 + 3cx²), t = tanh(k(x + cx³))
                e.vmul(a3, v, v)?;
                e.vbroadcast_const(a0, GELU_C)?;
                e.vmul(a4, a3, a0)?;
                e.vbroadcast_const(a0, 1.0)?;
                e.vadd(a4, a4, a0)?;
                e.vmul(a4, a4, v)?;
                e.vbroadcast_const(a0, GELU_K)?;
                e.vmul(a4, a4, a0)?;
                math_approx::emit_tanh(e, a4, a4, [a0, a1, a2])?;
                e.vbroadcast_const(a0, 3.0 * GELU_C)?;
                e.vmul(a3, a3, a0)?;
                e.vbroadcast_const(a0, 1.0)?;
                e.vadd(a3, a3, a0)?;
                e.vbroadcast_const(a1, GELU_K)?;
                e.vmul(a3, a3, a1)?;
                e.vmul(a1, a4, a4)?;
                e.vsub(a1, a0, a1)?;
                e.vmul(a1, a1, a3)?;
                e.vmul(a1, a1, v)?;
                e.vadd(a2, a4, a0)?;
                e.vadd(a1, a1, a2)?;
                e.vbroadcast_const(a0, 0.5)?;
                e.vmul(v, a1, a0)
            }
            Swish => {
                // s(1 + ax(1 - s)), s = sigmoid(ax)
                e.vbroadcast_const(a0, alpha)?;
                e.vmul(a3, v, a0)?;
                math_approx::emit_sigmoid(e, a4, a3, [a0, a1, a2])?;
                e.vbroadcast_const(a0, 1.0)?;
                e.vsub(a1, a0, a4)?;
                e.vmul(a1, a1, a3)?;
                e.vadd(a1, a1, a0)?;
                e.vmul(v, a1, a4)
            }
            Clip | ClipV2 | ClipV2UseDstForBwd => {
                let upper = if self.alg == Clip { Cond::Le } else { Cond::Lt };
                e.vbroadcast_const(a0, alpha)?;
                e.vbroadcast_const(a1, beta)?;
                e.vbroadcast_const(a2, 1.0)?;
                e.vzero(a3)?;
                e.vcmp(p, Cond::Gt, v, a0)?;
                e.vsel(a4, p, a2, a3)?;
                e.vcmp(p, upper, v, a1)?;
                e.vsel(v, p, a4, a3)
            }
            HardSigmoid => {
                e.vbroadcast_const(a0, alpha)?;
                e.vbroadcast_const(a1, beta)?;
                e.vmov(a4, v)?;
                e.vfmadd213(a4, a0, a1)?;
                e.vzero(a2)?;
                e.vcmp(p, Cond::Gt, a4, a2)?;
                e.vsel(a3, p, a0, a2)?;
                e.vbroadcast_const(a1, 1.0)?;
                e.vcmp(p, Cond::Lt, a4, a1)?;
                e.vsel(v, p, a3, a2)
            }
            HardSwish => {
                e.vbroadcast_const(a0, alpha)?;
                e.vbroadcast_const(a1, beta)?;
                e.vmov(a4, v)?;
                e.vfmadd213(a4, a0, a1)?;
                e.vmul(a3, v, a0)?;
                e.vadd(a3, a3, a3)?;
                e.vadd(a3, a3, a1)?;
                e.vbroadcast_const(a2, 1.0)?;
                e.vcmp(p, Cond::Ge, a4, a2)?;
                e.vsel(a3, p, a2, a3)?;
                e.vzero(a2)?;
                e.vcmp(p, Cond::Le, a4, a2)?;
                e.vsel(v, p, a2, a3)
            }
            Round => Err("round has no derivative".into()),
        }
    }
}

impl Injector for EltwiseInjector {
    fn load_table_addr(&mut self, e: &mut dyn SimdOps) -> Result<(), String> {
        if self.need_table() {
            e.load_table_addr(self.table_reg)?;
        }
        Ok(())
    }

    fn compute_vector(&mut self, e: &mut dyn SimdOps, v: VReg) -> Result<(), String> {
        if self.aux.contains(&v) {
            return Err(format!("v{} collides with injector scratch", v.0));
        }
        if self.is_fwd {
            self.fwd(e, v)
        } else {
            self.bwd(e, v)
        }
    }

    fn prepare_table(&mut self, e: &mut dyn SimdOps) -> Result<(), String> {
        if self.need_table() {
            e.emit_table()?;
        }
        Ok(())
    }

    fn scratch_vregs(&self) -> &[VReg] {
        &self.aux
    }

    fn scratch_pregs(&self) -> &[PReg] {
        &self.mask
    }
}
