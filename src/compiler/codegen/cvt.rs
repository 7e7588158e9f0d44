//! In-register 16-bit <-> f32 conversion sequences.
//!
//! A vector loaded with 16-bit lanes holds element `2j` in the low half and
//! element `2j+1` in the high half of 32-bit lane `j`. Widening splits such a
//! register into an "even" and an "odd" f32 register; narrowing packs them
//! back so a single 16-bit store writes the elements in their original order.

use super::simd_ops::{SimdOps, VReg};
use crate::types::DataType;

/// Widen packed 16-bit data in `even` into f32 lanes in `even` and `odd`.
pub fn emit_widen<E: SimdOps + ?Sized>(
    e: &mut E,
    dt: DataType,
    even: VReg,
    odd: VReg,
) -> Result<(), String> {
    match dt {
        DataType::Bf16 => {
            e.vmov(odd, even)?;
            e.vshl_i32(even, even, 16)?;
            e.vshr_i32(odd, odd, 16)?;
            e.vshl_i32(odd, odd, 16)
        }
        DataType::F16 => {
            e.vmov(odd, even)?;
            e.vcvt_f16_f32(even, even)?;
            e.vshr_i32(odd, odd, 16)?;
            e.vcvt_f16_f32(odd, odd)
        }
        DataType::F32 => Err("f32 data needs no widening".into()),
    }
}

/// Narrow f32 lanes in `even`/`odd` back into packed 16-bit data in `even`.
/// `odd` is clobbered.
pub fn emit_narrow<E: SimdOps + ?Sized>(
    e: &mut E,
    dt: DataType,
    even: VReg,
    odd: VReg,
) -> Result<(), String> {
    match dt {
        DataType::Bf16 => {
            e.vcvt_f32_bf16(even, even)?;
            e.vcvt_f32_bf16_hi(even, odd)
        }
        DataType::F16 => {
            e.vcvt_f32_f16(even, even)?;
            e.vcvt_f32_f16(odd, odd)?;
            e.vshl_i32(odd, odd, 16)?;
            e.vor(even, even, odd)
        }
        DataType::F32 => Err("f32 data needs no narrowing".into()),
    }
}
