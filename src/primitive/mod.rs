//! Forward and backward elementwise primitives.
//!
//! Lifecycle: `init` validates a descriptor against one ISA and data type and
//! builds the routine once (or reports `NotApplicable` so the caller can try
//! another implementation); `execute` partitions the buffer over the worker
//! team and runs the routine per partition.

pub mod eltwise_bwd;
pub mod eltwise_fwd;

pub use eltwise_bwd::{BwdArgs, EltwiseBwd};
pub use eltwise_fwd::EltwiseFwd;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use rayon::ThreadPool;

use crate::compiler::{EltwiseKernel, KernelArgs};
use crate::config::EltwiseConfig;
use crate::dispatch::{cpu_capabilities, Capabilities};
use crate::memory::MemoryDesc;
use crate::threading;
use crate::types::{AlgKind, Direction, EltwiseError, EltwiseResult};

/// Partition granularity in bytes (one cache line).
pub const PARTITION_BYTES: usize = 64;

/// Operation descriptor.
///
/// Forward: `src_md` is the input, `dst_md` the output.
/// Backward: `src_md` is the data the derivative is taken at (the forward
/// input, or the forward output for use-dst algorithms), `dst_md` is
/// `diff_src` and `diff_dst_md` the upstream gradient.
#[derive(Debug, Clone, PartialEq)]
pub struct EltwiseDesc {
    pub direction: Direction,
    pub alg: AlgKind,
    pub alpha: f32,
    pub beta: f32,
    pub src_md: MemoryDesc,
    pub dst_md: MemoryDesc,
    pub diff_dst_md: Option<MemoryDesc>,
}

impl EltwiseDesc {
    pub fn forward(
        alg: AlgKind,
        alpha: f32,
        beta: f32,
        src_md: MemoryDesc,
        dst_md: MemoryDesc,
    ) -> Self {
        EltwiseDesc {
            direction: Direction::Forward,
            alg,
            alpha,
            beta,
            src_md,
            dst_md,
            diff_dst_md: None,
        }
    }

    pub fn backward(
        alg: AlgKind,
        alpha: f32,
        beta: f32,
        diff_src_md: MemoryDesc,
        diff_dst_md: MemoryDesc,
        data_md: MemoryDesc,
    ) -> Self {
        EltwiseDesc {
            direction: Direction::Backward,
            alg,
            alpha,
            beta,
            src_md: data_md,
            dst_md: diff_src_md,
            diff_dst_md: Some(diff_dst_md),
        }
    }

    /// Dense, or dense with padding that the transform keeps at zero:
    /// `f(0) == 0` forward, `f'(0) * 0 == 0` backward.
    pub(crate) fn layout_ok(&self, md: &MemoryDesc) -> bool {
        let keeps_padding = match self.direction {
            Direction::Forward => self.alg.preserves_zero(self.alpha, self.beta),
            Direction::Backward => self.alg.bwd_preserves_zero(self.alpha, self.beta),
        };
        md.is_dense(true) && (md.is_dense(false) || keeps_padding)
    }
}

/// Post-operation attached to a primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum PostOp {
    Eltwise { alg: AlgKind, alpha: f32, beta: f32 },
    Sum { scale: f32 },
}

/// Non-default attributes make the primitive inapplicable.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveAttr {
    pub output_scale: f32,
    pub zero_point: i32,
    pub post_ops: Vec<PostOp>,
}

impl Default for PrimitiveAttr {
    fn default() -> Self {
        PrimitiveAttr {
            output_scale: 1.0,
            zero_point: 0,
            post_ops: Vec::new(),
        }
    }
}

impl PrimitiveAttr {
    pub fn has_default_values(&self) -> bool {
        self.output_scale == 1.0 && self.zero_point == 0 && self.post_ops.is_empty()
    }
}

/// Execution resources: the capability snapshot and the worker team.
#[derive(Debug, Clone)]
pub struct Engine {
    caps: Capabilities,
    pool: Option<Arc<ThreadPool>>,
    nthr: usize,
}

impl Engine {
    /// Host capabilities, global rayon pool, `ELTWISE_NUM_THREADS` workers
    /// (or the pool size).
    pub fn new() -> Self {
        let nthr = EltwiseConfig::global()
            .num_threads
            .unwrap_or_else(rayon::current_num_threads)
            .max(1);
        Engine {
            caps: *cpu_capabilities(),
            pool: None,
            nthr,
        }
    }

    /// Override the capability snapshot.
    pub fn with_capabilities(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    /// Number of partitions per execute call.
    pub fn with_num_threads(mut self, nthr: usize) -> Self {
        self.nthr = nthr.max(1);
        self
    }

    /// Run on a dedicated pool instead of the global one.
    pub fn with_pool(mut self, pool: Arc<ThreadPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    pub fn num_threads(&self) -> usize {
        self.nthr
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn not_applicable(what: &str, reason: impl Into<String>) -> EltwiseError {
    let reason = reason.into();
    log::debug!("{what}: not applicable: {reason}");
    EltwiseError::NotApplicable(reason)
}

/// Check that a byte slice holds `offset0 + nelems(true)` elements of `md`.
pub(crate) fn check_len(name: &str, len: usize, md: &MemoryDesc) -> EltwiseResult<()> {
    let need = (md.offset0 + md.nelems(true)) * md.data_type.size_bytes();
    if len < need {
        return Err(EltwiseError::InvalidArguments(format!(
            "{name} holds {len} bytes, {need} required"
        )));
    }
    Ok(())
}

/// Split `md`'s elements over the engine's workers and run `kernel` once per
/// non-empty partition. Addresses point at element 0 (after `offset0`).
///
/// A panic on the worker team is reported as [`EltwiseError::Runtime`].
pub(crate) fn run_partitioned(
    kernel: &EltwiseKernel,
    md: &MemoryDesc,
    engine: &Engine,
    src: usize,
    diff_dst: usize,
    dst: usize,
) -> EltwiseResult<()> {
    let nelems = md.nelems(true);
    if nelems == 0 {
        return Ok(());
    }
    let dsz = md.data_type.size_bytes();
    let granularity = PARTITION_BYTES / dsz;
    log::trace!(
        "eltwise {} {:?}: nelems={nelems} nthr={} granularity={granularity}",
        kernel.desc().alg.name(),
        kernel.desc().direction,
        engine.nthr
    );

    // Addresses travel as usize; every worker writes a disjoint range of
    // caller-owned buffers that outlive the parallel region.
    let team = || threading::parallel(engine.pool.as_deref(), engine.nthr, |ithr, nthr| {
        let part = threading::partition_for(nelems, granularity, nthr, ithr);
        if part.is_empty() {
            return;
        }
        let off = part.start * dsz;
        let args = KernelArgs {
            src: (src + off) as *const u8,
            dst: (dst + off) as *mut u8,
            diff_dst: if diff_dst == 0 {
                std::ptr::null()
            } else {
                (diff_dst + off) as *const u8
            },
            work_amount: part.len() as u64,
        };
        // SAFETY: callers checked every buffer against offset0 + nelems.
        unsafe { kernel.call(&args) };
    });
    panic::catch_unwind(AssertUnwindSafe(team)).map_err(|payload| {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "worker panicked".to_string());
        log::error!("eltwise {}: worker team failed: {msg}", kernel.desc().alg.name());
        EltwiseError::Runtime(msg)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    #[test]
    fn test_default_attr() {
        assert!(PrimitiveAttr::default().has_default_values());
        let attr = PrimitiveAttr { output_scale: 2.0, ..Default::default() };
        assert!(!attr.has_default_values());
        let attr = PrimitiveAttr {
            post_ops: vec![PostOp::Sum { scale: 1.0 }],
            ..Default::default()
        };
        assert!(!attr.has_default_values());
    }

    #[test]
    fn test_layout_rule() {
        let blocked = MemoryDesc::blocked(&[1, 3, 4], DataType::F32, 1, 8);
        let relu = EltwiseDesc::forward(AlgKind::Relu, 0.0, 0.0, blocked.clone(), blocked.clone());
        assert!(relu.layout_ok(&blocked));
        let exp = EltwiseDesc::forward(AlgKind::Exp, 0.0, 0.0, blocked.clone(), blocked.clone());
        assert!(!exp.layout_ok(&blocked));
        let strided = MemoryDesc::strided(&[4], &[2], DataType::F32);
        assert!(!relu.layout_ok(&strided));

        let b = blocked.clone();
        let exp_bwd = EltwiseDesc::backward(AlgKind::Exp, 0.0, 0.0, b.clone(), b.clone(), b.clone());
        assert!(exp_bwd.layout_ok(&blocked));
        let sqrt_bwd = EltwiseDesc::backward(AlgKind::Sqrt, 0.0, 0.0, b.clone(), b.clone(), b);
        assert!(!sqrt_bwd.layout_ok(&blocked));
        let sqrt_fwd = EltwiseDesc::forward(AlgKind::Sqrt, 0.0, 0.0, blocked.clone(), blocked.clone());
        assert!(sqrt_fwd.layout_ok(&blocked));
    }

    #[test]
    fn test_check_len() {
        let md = MemoryDesc::plain(&[10], DataType::Bf16).with_offset0(3);
        assert!(check_len("src", 26, &md).is_ok());
        let err = check_len("src", 25, &md).unwrap_err();
        assert!(matches!(err, EltwiseError::InvalidArguments(_)));
    }

    #[test]
    fn test_engine_threads() {
        let e = Engine::new().with_num_threads(0);
        assert_eq!(e.num_threads(), 1);
        let e = e.with_num_threads(8);
        assert_eq!(e.num_threads(), 8);
    }
}
