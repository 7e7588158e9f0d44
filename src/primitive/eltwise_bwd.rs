//! Backward elementwise primitive: `diff_src[i] = f'(x[i]) * diff_dst[i]`,
//! with `x` the forward input, or the forward output for use-dst algorithms.

use bytemuck::Pod;

use super::eltwise_fwd::check_elem_size;
use super::{check_len, not_applicable, run_partitioned, EltwiseDesc, Engine, PrimitiveAttr};
use crate::compiler::{EltwiseInjector, EltwiseKernel, KernelDesc, KernelKey, KernelRegistry};
use crate::dispatch::IsaLevel;
use crate::memory::MemoryDesc;
use crate::types::{DataType, Direction, EltwiseError, EltwiseResult};

/// Inputs of a backward call. Only the buffer the algorithm differentiates
/// at is required: `dst` for use-dst algorithms, `src` otherwise.
#[derive(Debug, Clone, Copy)]
pub struct BwdArgs<'a> {
    pub src: Option<&'a [u8]>,
    pub dst: Option<&'a [u8]>,
    pub diff_dst: &'a [u8],
}

impl<'a> BwdArgs<'a> {
    pub fn from_typed<T: Pod>(
        src: Option<&'a [T]>,
        dst: Option<&'a [T]>,
        diff_dst: &'a [T],
    ) -> Self {
        BwdArgs {
            src: src.map(bytemuck::cast_slice),
            dst: dst.map(bytemuck::cast_slice),
            diff_dst: bytemuck::cast_slice(diff_dst),
        }
    }
}

/// Backward primitive bound to one ISA and data type.
#[derive(Debug, Clone)]
pub struct EltwiseBwd {
    kernel: EltwiseKernel,
    md: MemoryDesc,
    engine: Engine,
}

impl EltwiseBwd {
    /// Validate `desc` and build the routine. Failed checks are
    /// [`EltwiseError::NotApplicable`].
    pub fn init(
        isa: IsaLevel,
        data_type: DataType,
        desc: &EltwiseDesc,
        attr: &PrimitiveAttr,
        engine: &Engine,
    ) -> EltwiseResult<Self> {
        const WHAT: &str = "eltwise_bwd";
        let data = &desc.src_md;
        let diff_src = &desc.dst_md;

        if !engine.capabilities().mayiuse(isa) {
            return Err(not_applicable(WHAT, format!("{isa} unavailable")));
        }
        let diff_dst = match (&desc.diff_dst_md, desc.direction) {
            (Some(md), Direction::Backward) => md,
            _ => return Err(not_applicable(WHAT, "not a backward descriptor")),
        };
        if [data, diff_src, diff_dst].iter().any(|md| md.data_type != data_type) {
            return Err(not_applicable(WHAT, format!("data types differ from {data_type:?}")));
        }
        if data.has_zero_dim() {
            return Err(not_applicable(WHAT, "zero-sized dimension"));
        }
        if !desc.layout_ok(data) {
            return Err(not_applicable(WHAT, "layout is neither dense nor zero-preserving"));
        }
        if !EltwiseInjector::is_supported(isa, desc.alg, Direction::Backward) {
            return Err(not_applicable(WHAT, format!("{} has no derivative on {isa}", desc.alg.name())));
        }
        if !attr.has_default_values() {
            return Err(not_applicable(WHAT, "non-default attributes"));
        }
        if data != diff_dst || data != diff_src {
            return Err(not_applicable(WHAT, "data, diff_dst and diff_src layouts differ"));
        }

        let kdesc = KernelDesc::new(isa, data_type, desc.alg, desc.alpha, desc.beta, Direction::Backward);
        let kernel = match KernelRegistry::global().build(&kdesc, engine.capabilities()) {
            Some(k) => k?,
            None => {
                return Err(not_applicable(
                    WHAT,
                    format!("no kernel registered for {:?}", KernelKey::of(&kdesc)),
                ))
            }
        };

        Ok(EltwiseBwd {
            kernel,
            md: data.clone(),
            engine: engine.clone(),
        })
    }

    pub fn kernel(&self) -> &EltwiseKernel {
        &self.kernel
    }

    /// Whether `execute` reads `args.dst` instead of `args.src`.
    pub fn uses_dst(&self) -> bool {
        self.kernel.desc().use_dst
    }

    pub fn execute(&self, args: &BwdArgs<'_>, diff_src: &mut [u8]) -> EltwiseResult<()> {
        let data = if self.uses_dst() {
            args.dst.ok_or_else(|| {
                EltwiseError::InvalidArguments("forward output required for this algorithm".into())
            })?
        } else {
            args.src.ok_or_else(|| {
                EltwiseError::InvalidArguments("forward input required for this algorithm".into())
            })?
        };
        check_len(if self.uses_dst() { "dst" } else { "src" }, data.len(), &self.md)?;
        check_len("diff_dst", args.diff_dst.len(), &self.md)?;
        check_len("diff_src", diff_src.len(), &self.md)?;

        let off = self.md.offset0 * self.md.data_type.size_bytes();
        run_partitioned(
            &self.kernel,
            &self.md,
            &self.engine,
            data.as_ptr() as usize + off,
            args.diff_dst.as_ptr() as usize + off,
            diff_src.as_mut_ptr() as usize + off,
        )
    }

    pub fn execute_typed<T: Pod>(&self, args: &BwdArgs<'_>, diff_src: &mut [T]) -> EltwiseResult<()> {
        check_elem_size::<T>(self.md.data_type)?;
        self.execute(args, bytemuck::cast_slice_mut(diff_src))
    }
}
