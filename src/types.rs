//! Core types shared by the generator, the primitives and the tests.

use thiserror::Error;

/// Element data type of the buffers an eltwise primitive operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// IEEE 754 binary32.
    F32,
    /// 16-bit brain float (truncated binary32).
    Bf16,
    /// IEEE 754 binary16.
    F16,
}

impl DataType {
    pub const ALL: [DataType; 3] = [DataType::F32, DataType::Bf16, DataType::F16];

    /// Size of one element in bytes.
    #[inline]
    pub fn size_bytes(self) -> usize {
        match self {
            DataType::F32 => 4,
            DataType::Bf16 | DataType::F16 => 2,
        }
    }

    /// True for the 16-bit encodings that are widened to f32 for compute.
    #[inline]
    pub fn is_reduced_precision(self) -> bool {
        !matches!(self, DataType::F32)
    }
}

/// Propagation direction of a primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    #[inline]
    pub fn is_fwd(self) -> bool {
        matches!(self, Direction::Forward)
    }
}

/// Elementwise algorithm kind understood by the injector.
///
/// `alpha`/`beta` meaning per algorithm:
///
/// | Alg | alpha | beta |
/// |---|---|---|
/// | Relu | negative slope | - |
/// | Elu | scale of the negative branch | - |
/// | Linear | scale | shift |
/// | SoftRelu | sharpness | - |
/// | Swish | sigmoid scale | - |
/// | Clip / ClipV2 | lower bound | upper bound |
/// | HardSigmoid / HardSwish | slope | offset |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlgKind {
    Relu,
    Tanh,
    Elu,
    Square,
    Abs,
    Sqrt,
    Linear,
    SoftRelu,
    Logistic,
    Exp,
    GeluTanh,
    Swish,
    Log,
    Clip,
    ClipV2,
    HardSigmoid,
    HardSwish,
    Round,
    ReluUseDstForBwd,
    TanhUseDstForBwd,
    EluUseDstForBwd,
    SqrtUseDstForBwd,
    LogisticUseDstForBwd,
    ExpUseDstForBwd,
    ClipV2UseDstForBwd,
}

impl AlgKind {
    pub const ALL: [AlgKind; 25] = [
        AlgKind::Relu,
        AlgKind::Tanh,
        AlgKind::Elu,
        AlgKind::Square,
        AlgKind::Abs,
        AlgKind::Sqrt,
        AlgKind::Linear,
        AlgKind::SoftRelu,
        AlgKind::Logistic,
        AlgKind::Exp,
        AlgKind::GeluTanh,
        AlgKind::Swish,
        AlgKind::Log,
        AlgKind::Clip,
        AlgKind::ClipV2,
        AlgKind::HardSigmoid,
        AlgKind::HardSwish,
        AlgKind::Round,
        AlgKind::ReluUseDstForBwd,
        AlgKind::TanhUseDstForBwd,
        AlgKind::EluUseDstForBwd,
        AlgKind::SqrtUseDstForBwd,
        AlgKind::LogisticUseDstForBwd,
        AlgKind::ExpUseDstForBwd,
        AlgKind::ClipV2UseDstForBwd,
    ];

    /// Whether the backward pass computes the derivative from the forward
    /// output instead of the forward input.
    pub fn use_dst_for_bwd(self) -> bool {
        matches!(
            self,
            AlgKind::ReluUseDstForBwd
                | AlgKind::TanhUseDstForBwd
                | AlgKind::EluUseDstForBwd
                | AlgKind::SqrtUseDstForBwd
                | AlgKind::LogisticUseDstForBwd
                | AlgKind::ExpUseDstForBwd
                | AlgKind::ClipV2UseDstForBwd
        )
    }

    /// Whether `f(0) == 0` for these parameters, i.e. zero padding of a
    /// blocked layout stays zero after the forward pass.
    pub fn preserves_zero(self, alpha: f32, beta: f32) -> bool {
        match self {
            AlgKind::Relu
            | AlgKind::Tanh
            | AlgKind::Elu
            | AlgKind::Square
            | AlgKind::Abs
            | AlgKind::Sqrt
            | AlgKind::Swish
            | AlgKind::GeluTanh
            | AlgKind::Round
            | AlgKind::HardSwish
            | AlgKind::ReluUseDstForBwd
            | AlgKind::TanhUseDstForBwd
            | AlgKind::EluUseDstForBwd
            | AlgKind::SqrtUseDstForBwd => true,
            AlgKind::Clip | AlgKind::ClipV2 | AlgKind::ClipV2UseDstForBwd => {
                alpha <= 0.0 && beta >= 0.0
            }
            AlgKind::Linear => beta == 0.0,
            AlgKind::SoftRelu
            | AlgKind::Logistic
            | AlgKind::Exp
            | AlgKind::Log
            | AlgKind::HardSigmoid
            | AlgKind::LogisticUseDstForBwd
            | AlgKind::ExpUseDstForBwd => false,
        }
    }

    /// Whether `f'(0) * 0 == 0`, i.e. zero data and zero gradient in the
    /// padding of a blocked layout produce a zero `diff_src` there. Holds
    /// whenever the derivative at zero is finite.
    pub fn bwd_preserves_zero(self, alpha: f32, beta: f32) -> bool {
        match self {
            AlgKind::Sqrt | AlgKind::SqrtUseDstForBwd | AlgKind::Log | AlgKind::Round => false,
            _ => alpha.is_finite() && beta.is_finite(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AlgKind::Relu => "relu",
            AlgKind::Tanh => "tanh",
            AlgKind::Elu => "elu",
            AlgKind::Square => "square",
            AlgKind::Abs => "abs",
            AlgKind::Sqrt => "sqrt",
            AlgKind::Linear => "linear",
            AlgKind::SoftRelu => "soft_relu",
            AlgKind::Logistic => "logistic",
            AlgKind::Exp => "exp",
            AlgKind::GeluTanh => "gelu_tanh",
            AlgKind::Swish => "swish",
            AlgKind::Log => "log",
            AlgKind::Clip => "clip",
            AlgKind::ClipV2 => "clip_v2",
            AlgKind::HardSigmoid => "hardsigmoid",
            AlgKind::HardSwish => "hardswish",
            AlgKind::Round => "round",
            AlgKind::ReluUseDstForBwd => "relu_dst",
            AlgKind::TanhUseDstForBwd => "tanh_dst",
            AlgKind::EluUseDstForBwd => "elu_dst",
            AlgKind::SqrtUseDstForBwd => "sqrt_dst",
            AlgKind::LogisticUseDstForBwd => "logistic_dst",
            AlgKind::ExpUseDstForBwd => "exp_dst",
            AlgKind::ClipV2UseDstForBwd => "clip_v2_dst",
        }
    }
}

/// Coarse outcome of a primitive lifecycle call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    /// The implementation does not handle this configuration; the caller
    /// should try another one.
    NotApplicable,
    BuildError,
    InvalidArguments,
    RuntimeError,
}

#[derive(Debug, Error)]
pub enum EltwiseError {
    #[error("not applicable: {0}")]
    NotApplicable(String),
    #[error("kernel build failed: {0}")]
    Build(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl EltwiseError {
    pub fn status(&self) -> Status {
        match self {
            EltwiseError::NotApplicable(_) => Status::NotApplicable,
            EltwiseError::Build(_) => Status::BuildError,
            EltwiseError::InvalidArguments(_) => Status::InvalidArguments,
            EltwiseError::Runtime(_) => Status::RuntimeError,
        }
    }

    #[inline]
    pub fn is_not_applicable(&self) -> bool {
        matches!(self, EltwiseError::NotApplicable(_))
    }
}

pub type EltwiseResult<T> = Result<T, EltwiseError>;

/// Collapse a lifecycle result into its [`Status`].
pub fn status_of<T>(r: &EltwiseResult<T>) -> Status {
    match r {
        Ok(_) => Status::Success,
        Err(e) => e.status(),
    }
}
