//! Shared math approximations: ISA-independent transcendental functions.
//!
//! Provides polynomial coefficients and generic code-generation functions for
//! exp, log, sigmoid and tanh. The injector calls these and they emit SIMD
//! instructions via the `SimdOps` trait, so every ISA shares one sequence.
//!
//! Accuracy targets f32 precision: exp within ~1e-7 relative, log within
//! ~3e-7 absolute for finite positive inputs. Out-of-range inputs follow
//! IEEE: exp overflows to +inf and underflows to 0, log returns -inf at
//! zero, NaN below zero and +inf at +inf. NaN propagates through both.
//!
//! Register contract: `dst` may alias `src`; scratch registers must be
//! distinct from `dst` and from each other.

use super::simd_ops::{Cond, PReg, SimdOps, VReg};

// ── Exp coefficients (Cephes degree-5 polynomial) ───────────────────────────

/// Lower input clamp: ln(f32::MIN_POSITIVE). Results that would need a
/// biased exponent below 1 flush to zero.
pub const EXP_CLAMP_LO: f32 = -87.336_55;
/// Upper input clamp. Anything above ln(f32::MAX) still overflows to +inf
/// because 2^k is built as 2^(k-1) * 2.
pub const EXP_CLAMP_HI: f32 = 89.0;
/// log2(e) for range reduction.
pub const EXP_LOG2E: f32 = 1.442_695_04;
/// Cody-Waite constants for range reduction.
pub const EXP_C1: f32 = -0.693_359_375;
pub const EXP_C2: f32 = 2.121_944_4e-4;
/// Horner polynomial coefficients (degree 5).
pub const EXP_P0: f32 = 1.987_569_15e-4;
pub const EXP_P1: f32 = 1.398_199_95e-3;
pub const EXP_P2: f32 = 8.333_451_9e-3;
pub const EXP_P3: f32 = 4.166_579_59e-2;
pub const EXP_P4: f32 = 1.666_666_55e-1;
pub const EXP_P5: f32 = 5.000_000_12e-1;
/// f32 exponent bias.
pub const EXP_BIAS: u32 = 127;

// ── Log coefficients (atanh series on a reduced mantissa) ───────────────────

/// Mantissa extraction mask.
pub const LOG_MANTISSA_MASK: u32 = 0x007F_FFFF;
/// Mantissas above sqrt(2) are halved so that m lies in [sqrt(2)/2, sqrt(2)).
pub const LOG_SQRT2: f32 = std::f32::consts::SQRT_2;
pub const LOG_LN2: f32 = std::f32::consts::LN_2;
/// 2^23, lifts any positive subnormal into the normal range.
pub const LOG_SUBNORMAL_SCALE: f32 = 8_388_608.0;
/// ln(m) = 2s(1 + s²/3 + s⁴/5 + s⁶/7 + s⁸/9), s = (m-1)/(m+1).
pub const LOG_Q: [f32; 4] = [1.0 / 9.0, 1.0 / 7.0, 1.0 / 5.0, 1.0 / 3.0];

// ── Generic emit functions ──────────────────────────────────────────────────

/// Emit exp(x) approximation using Cephes degree-5 polynomial.
///
/// Algorithm:
/// 1. Clamp input to [ln(FLT_MIN), 89]; NaN passes through the clamp
/// 2. Compute k = round(x * log2(e)), k in [-126, 128]
/// 3. Cody-Waite range reduction: r = x - k * ln(2)
/// 4. Horner polynomial: p = 1 + r + r²(p5 + r*(p4 + ...))
/// 5. Reconstruct: exp(x) = (p * 2^(k-1)) * 2
///
/// Uses `dst` for output, `src` for input, `s[0..3]` as scratch.
pub fn emit_exp<E: SimdOps + ?Sized>(
    e: &mut E,
    dst: VReg,
    src: VReg,
    s: [VReg; 3],
) -> Result<(), String> {
    // Clamp input
    e.vbroadcast_const(s[1], EXP_CLAMP_LO)?;
    e.vmax(s[0], src, s[1])?;
    e.vbroadcast_const(s[1], EXP_CLAMP_HI)?;
    e.vmin(s[0], s[0], s[1])?;

    // k = round(x * log2(e))
    e.vbroadcast_const(s[1], EXP_LOG2E)?;
    e.vmul(s[1], s[0], s[1])?;
    e.vround(s[2], s[1])?;

    // Cody-Waite range reduction: s[0] = x - k*c1 - k*c2
    e.vbroadcast_const(s[1], EXP_C1)?;
    e.vfmadd231(s[0], s[2], s[1])?;
    e.vbroadcast_const(s[1], EXP_C2)?;
    e.vfmadd231(s[0], s[2], s[1])?;

    // Horner polynomial evaluation
    e.vbroadcast_const(dst, EXP_P0)?;
    for c in [EXP_P1, EXP_P2, EXP_P3, EXP_P4, EXP_P5] {
        e.vbroadcast_const(s[1], c)?;
        e.vfmadd213(dst, s[0], s[1])?;
    }
    e.vmul(dst, dst, s[0])?;
    e.vmul(dst, dst, s[0])?;
    e.vadd(dst, dst, s[0])?;
    e.vbroadcast_const(s[1], 1.0)?;
    e.vadd(dst, dst, s[1])?;

    // 2^(k-1): (k + 126) << 23. k = 128 stays representable and the
    // final doubling overflows to +inf; k = -126 gives a zero scale.
    e.vcvt_f32_i32(s[1], s[2])?;
    e.vbroadcast_bits(s[2], EXP_BIAS - 1)?;
    e.vadd_i32(s[1], s[1], s[2])?;
    e.vshl_i32(s[1], s[1], 23)?;

    e.vmul(dst, dst, s[1])?;
    e.vadd(dst, dst, dst)?;

    Ok(())
}

/// Emit sigmoid(x) = 1 / (1 + exp(-x)).
///
/// Uses `dst` for output, `src` for input, `s[0..3]` as scratch.
pub fn emit_sigmoid<E: SimdOps + ?Sized>(
    e: &mut E,
    dst: VReg,
    src: VReg,
    s: [VReg; 3],
) -> Result<(), String> {
    e.vneg(s[0], src)?;
    emit_exp(e, dst, s[0], s)?;
    e.vbroadcast_const(s[1], 1.0)?;
    e.vadd(dst, dst, s[1])?;
    e.vdiv(dst, s[1], dst)
}

/// Emit tanh(x) approximation via `2*sigmoid(2x) - 1`.
///
/// The division stays exact when exp(-2x) overflows, giving -1 for large
/// negative x.
///
/// Uses `dst` for output, `src` for input, `s[0..3]` as scratch.
pub fn emit_tanh<E: SimdOps + ?Sized>(
    e: &mut E,
    dst: VReg,
    src: VReg,
    s: [VReg; 3],
) -> Result<(), String> {
    // dst = exp(-2x)
    e.vbroadcast_const(s[1], -2.0)?;
    e.vmul(s[0], src, s[1])?;
    emit_exp(e, dst, s[0], s)?;

    // dst = 1 + exp(-2x)
    e.vbroadcast_const(s[1], 1.0)?;
    e.vadd(dst, dst, s[1])?;

    // dst = 2 / (1 + exp(-2x))
    e.vbroadcast_const(s[2], 2.0)?;
    e.vdiv(dst, s[2], dst)?;

    e.vbroadcast_const(s[1], 1.0)?;
    e.vsub(dst, dst, s[1])?;

    Ok(())
}

/// Emit ln(x).
///
/// Algorithm:
/// 1. Scale subnormals by 2^23 into the normal range
/// 2. Extract exponent: k = float(bits >> 23) - 127 (- 23 if scaled)
/// 3. Extract mantissa: m = (bits & 0x007FFFFF) | 1.0 → [1.0, 2.0)
/// 4. Force k to -inf for ±0, NaN for x < 0 or NaN, +inf for +inf
/// 5. If m > sqrt(2): m *= 0.5, k += 1
/// 6. s = (m - 1)/(m + 1), z = s²
/// 7. result = 2s * (1 + z/3 + z²/5 + z³/7 + z⁴/9) + k*ln(2)
///
/// Zero and +inf reduce to m = 1 and a NaN k poisons the sum, so the final
/// term k*ln(2) carries the IEEE result for every special input.
///
/// Uses `dst` for output, `src` for input, `s[0..4]` as scratch and `mask`
/// as a predicate temporary.
pub fn emit_log<E: SimdOps + ?Sized>(
    e: &mut E,
    dst: VReg,
    src: VReg,
    s: [VReg; 4],
    mask: PReg,
) -> Result<(), String> {
    // s[1] = x, or x * 2^23 for x below the smallest normal
    e.vbroadcast_const(s[2], f32::MIN_POSITIVE)?;
    e.vcmp(mask, Cond::Lt, src, s[2])?;
    e.vbroadcast_const(s[2], LOG_SUBNORMAL_SCALE)?;
    e.vmul(s[1], src, s[2])?;
    e.vsel(s[1], mask, s[1], src)?;

    // k = float(bits >> 23) - 127
    e.vshr_i32(s[0], s[1], 23)?;
    e.vcvt_i32_f32(s[0], s[0])?;
    e.vbroadcast_const(s[2], 127.0)?;
    e.vsub(s[0], s[0], s[2])?;
    e.vbroadcast_const(s[2], 23.0)?;
    e.vsub(s[3], s[0], s[2])?;
    e.vsel(s[0], mask, s[3], s[0])?;

    // m in [1, 2)
    e.vbroadcast_bits(s[2], LOG_MANTISSA_MASK)?;
    e.vand(s[1], s[1], s[2])?;
    e.vbroadcast_const(s[2], 1.0)?;
    e.vor(s[1], s[1], s[2])?;

    // special inputs; `dst` is still unwritten so `src` is intact here
    e.vzero(s[2])?;
    e.vcmp(mask, Cond::Eq, src, s[2])?;
    e.vbroadcast_bits(s[3], f32::NEG_INFINITY.to_bits())?;
    e.vsel(s[0], mask, s[3], s[0])?;
    e.vcmp(mask, Cond::Lt, src, s[2])?;
    e.vbroadcast_bits(s[3], f32::NAN.to_bits())?;
    e.vsel(s[0], mask, s[3], s[0])?;
    e.vcmp(mask, Cond::Ne, src, src)?;
    e.vsel(s[0], mask, s[3], s[0])?;
    e.vbroadcast_bits(s[2], f32::INFINITY.to_bits())?;
    e.vcmp(mask, Cond::Eq, src, s[2])?;
    e.vsel(s[0], mask, s[2], s[0])?;

    // fold m above sqrt(2) into the next octave
    e.vbroadcast_const(s[2], LOG_SQRT2)?;
    e.vcmp(mask, Cond::Gt, s[1], s[2])?;
    e.vbroadcast_const(s[2], 0.5)?;
    e.vmul(dst, s[1], s[2])?;
    e.vsel(s[1], mask, dst, s[1])?;
    e.vbroadcast_const(s[2], 1.0)?;
    e.vadd(dst, s[0], s[2])?;
    e.vsel(s[0], mask, dst, s[0])?;

    // s = (m - 1)/(m + 1)
    e.vsub(dst, s[1], s[2])?;
    e.vadd(s[1], s[1], s[2])?;
    e.vdiv(s[1], dst, s[1])?;
    e.vmul(s[2], s[1], s[1])?;

    e.vbroadcast_const(dst, LOG_Q[0])?;
    for c in &LOG_Q[1..] {
        e.vbroadcast_const(s[3], *c)?;
        e.vfmadd213(dst, s[2], s[3])?;
    }
    e.vbroadcast_const(s[3], 1.0)?;
    e.vfmadd213(dst, s[2], s[3])?;
    e.vmul(dst, dst, s[1])?;
    e.vadd(dst, dst, dst)?;

    e.vbroadcast_const(s[3], LOG_LN2)?;
    e.vfmadd231(dst, s[0], s[3])?;

    Ok(())
}
