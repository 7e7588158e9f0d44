//! Scalar elementwise transforms and their derivatives.
//!
//! Backward functions return the derivative only; for use-dst algorithms the
//! argument is the forward output `y`.

use crate::types::AlgKind;

const SQRT_2_OVER_PI: f32 = 0.797_884_6;
const GELU_COEFF: f32 = 0.044_715;

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Forward transform of one element.
pub fn eltwise_fwd(alg: AlgKind, alpha: f32, beta: f32, x: f32) -> f32 {
    use AlgKind::*;
    match alg {
        Relu | ReluUseDstForBwd => {
            if x > 0.0 {
                x
            } else {
                alpha * x
            }
        }
        Tanh | TanhUseDstForBwd => x.tanh(),
        Elu | EluUseDstForBwd => {
            if x > 0.0 {
                x
            } else {
                alpha * x.exp_m1()
            }
        }
        Square => x * x,
        Abs => x.abs(),
        Sqrt | SqrtUseDstForBwd => x.sqrt(),
        Linear => alpha * x + beta,
        SoftRelu => {
            let ax = alpha * x;
            (ax.max(0.0) + (-ax.abs()).exp().ln_1p()) / alpha
        }
        Logistic | LogisticUseDstForBwd => sigmoid(x),
        Exp | ExpUseDstForBwd => x.exp(),
        GeluTanh => {
            let inner = SQRT_2_OVER_PI * (x + GELU_COEFF * x * x * x);
            0.5 * x * (1.0 + inner.tanh())
        }
        Swish => x * sigmoid(alpha * x),
        Log => x.ln(),
        Clip | ClipV2 | ClipV2UseDstForBwd => {
            if x.is_nan() {
                x
            } else {
                x.max(alpha).min(beta)
            }
        }
        HardSigmoid => (alpha * x + beta).clamp(0.0, 1.0),
        HardSwish => x * (alpha * x + beta).clamp(0.0, 1.0),
        Round => x.round_ties_even(),
    }
}

/// Derivative of one element. `None` for algorithms without a backward pass.
pub fn eltwise_bwd(alg: AlgKind, alpha: f32, beta: f32, x: f32) -> Option<f32> {
    use AlgKind::*;
    let d = match alg {
        Relu | ReluUseDstForBwd => {
            if x > 0.0 {
                1.0
            } else {
                alpha
            }
        }
        Tanh => {
            let t = x.tanh();
            1.0 - t * t
        }
        TanhUseDstForBwd => 1.0 - x * x,
        Elu => {
            if x > 0.0 {
                1.0
            } else {
                alpha * x.exp()
            }
        }
        EluUseDstForBwd => {
            if x > 0.0 {
                1.0
            } else {
                x + alpha
            }
        }
        Square => 2.0 * x,
        Abs => {
            if x > 0.0 {
                1.0
            } else if x < 0.0 {
                -1.0
            } else {
                0.0
            }
        }
        Sqrt => 0.5 / x.sqrt(),
        SqrtUseDstForBwd => 0.5 / x,
        Linear => alpha,
        SoftRelu => sigmoid(alpha * x),
        Logistic => {
            let s = sigmoid(x);
            s * (1.0 - s)
        }
        LogisticUseDstForBwd => x * (1.0 - x),
        Exp => x.exp(),
        ExpUseDstForBwd => x,
        GeluTanh => {
            let x2 = x * x;
            let t = (SQRT_2_OVER_PI * x * (1.0 + GELU_COEFF * x2)).tanh();
            let g = SQRT_2_OVER_PI * (1.0 + 3.0 * GELU_COEFF * x2);
            0.5 * (1.0 + t) + 0.5 * x * (1.0 - t * t) * g
        }
        Swish => {
            let s = sigmoid(alpha * x);
            s * (1.0 + alpha * x * (1.0 - s))
        }
        Log => 1.0 / x,
        Clip => {
            if x > alpha && x <= beta {
                1.0
            } else {
                0.0
            }
        }
        ClipV2 | ClipV2UseDstForBwd => {
            if x > alpha && x < beta {
                1.0
            } else {
                0.0
            }
        }
        HardSigmoid => {
            let w = alpha * x + beta;
            if w > 0.0 && w < 1.0 {
                alpha
            } else {
                0.0
            }
        }
        HardSwish => {
            let w = alpha * x + beta;
            if w <= 0.0 {
                0.0
            } else if w >= 1.0 {
                1.0
            } else {
                2.0 * alpha * x + beta
            }
        }
        Round => return None,
    };
    Some(d)
}

/// `dst[i] = f(src[i])`
pub fn scalar_eltwise_fwd(alg: AlgKind, alpha: f32, beta: f32, src: &[f32], dst: &mut [f32]) {
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = eltwise_fwd(alg, alpha, beta, s);
    }
}

/// `diff_src[i] = f'(x[i]) * diff_dst[i]`; leaves `diff_src` untouched for
/// algorithms without a derivative.
pub fn scalar_eltwise_bwd(
    alg: AlgKind,
    alpha: f32,
    beta: f32,
    x: &[f32],
    diff_dst: &[f32],
    diff_src: &mut [f32],
) {
    for ((ds, &xv), &dd) in diff_src.iter_mut().zip(x).zip(diff_dst) {
        if let Some(d) = eltwise_bwd(alg, alpha, beta, xv) {
            *ds = d * dd;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relu_negative_slope() {
        assert_eq!(eltwise_fwd(AlgKind::Relu, 0.1, 0.0, -10.0), -1.0);
        assert_eq!(eltwise_fwd(AlgKind::Relu, 0.1, 0.0, 3.0), 3.0);
        assert_eq!(eltwise_bwd(AlgKind::Relu, 0.1, 0.0, -1.0), Some(0.1));
    }

    #[test]
    fn test_use_dst_derivatives_match_src_form() {
        for &x in &[-2.0f32, -0.3, 0.4, 1.7] {
            let y = eltwise_fwd(AlgKind::Tanh, 0.0, 0.0, x);
            let a = eltwise_bwd(AlgKind::Tanh, 0.0, 0.0, x).unwrap();
            let b = eltwise_bwd(AlgKind::TanhUseDstForBwd, 0.0, 0.0, y).unwrap();
            assert!((a - b).abs() < 1e-6);

            let y = eltwise_fwd(AlgKind::Elu, 0.7, 0.0, x);
            let a = eltwise_bwd(AlgKind::Elu, 0.7, 0.0, x).unwrap();
            let b = eltwise_bwd(AlgKind::EluUseDstForBwd, 0.7, 0.0, y).unwrap();
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_soft_relu_is_stable() {
        let v = eltwise_fwd(AlgKind::SoftRelu, 1.0, 0.0, 100.0);
        assert!((v - 100.0).abs() < 1e-5);
        let v = eltwise_fwd(AlgKind::SoftRelu, 1.0, 0.0, 0.0);
        assert!((v - std::f32::consts::LN_2).abs() < 1e-6);
    }

    #[test]
    fn test_soft_relu_negative_alpha() {
        // ln(1 + e^(ax)) / a, evaluated directly where it does not overflow
        let alpha = -1.5f32;
        for &x in &[-4.0f32, -0.5, 0.0, 0.7, 3.0] {
            let want = (alpha * x).exp().ln_1p() / alpha;
            let got = eltwise_fwd(AlgKind::SoftRelu, alpha, 0.0, x);
            assert!((got - want).abs() < 1e-5, "x={x}: {got} vs {want}");
        }
    }

    #[test]
    fn test_nan_propagates() {
        for alg in [AlgKind::Clip, AlgKind::ClipV2, AlgKind::Relu, AlgKind::HardSigmoid] {
            assert!(eltwise_fwd(alg, 0.0, 1.0, f32::NAN).is_nan(), "{}", alg.name());
        }
    }

    #[test]
    fn test_clip_boundaries() {
        assert_eq!(eltwise_bwd(AlgKind::Clip, 0.0, 1.0, 1.0), Some(1.0));
        assert_eq!(eltwise_bwd(AlgKind::ClipV2, 0.0, 1.0, 1.0), Some(0.0));
        assert_eq!(eltwise_bwd(AlgKind::Clip, 0.0, 1.0, 0.0), Some(0.0));
    }

    #[test]
    fn test_gelu_derivative_numeric() {
        for &x in &[-1.5f32, -0.2, 0.3, 2.0] {
            let h = 1e-2f32;
            let num = (eltwise_fwd(AlgKind::GeluTanh, 0.0, 0.0, x + h)
                - eltwise_fwd(AlgKind::GeluTanh, 0.0, 0.0, x - h))
                / (2.0 * h);
            let ana = eltwise_bwd(AlgKind::GeluTanh, 0.0, 0.0, x).unwrap();
            assert!((num - ana).abs() < 1e-3, "x={x}: {num} vs {ana}");
        }
    }

    #[test]
    fn test_round_has_no_derivative() {
        assert_eq!(eltwise_fwd(AlgKind::Round, 0.0, 0.0, 2.5), 2.0);
        assert_eq!(eltwise_bwd(AlgKind::Round, 0.0, 0.0, 2.5), None);
    }
}
