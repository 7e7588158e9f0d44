//! Forward elementwise primitive: `dst[i] = f(src[i])`.

use bytemuck::Pod;

use super::{check_len, not_applicable, run_partitioned, EltwiseDesc, Engine, PrimitiveAttr};
use crate::compiler::{EltwiseInjector, EltwiseKernel, KernelDesc, KernelKey, KernelRegistry};
use crate::dispatch::IsaLevel;
use crate::memory::MemoryDesc;
use crate::types::{DataType, Direction, EltwiseError, EltwiseResult};

/// Forward primitive bound to one ISA and data type.
#[derive(Debug, Clone)]
pub struct EltwiseFwd {
    kernel: EltwiseKernel,
    md: MemoryDesc,
    engine: Engine,
}

impl EltwiseFwd {
    /// Validate `desc` and build the routine.
    ///
    /// Every failed check is reported as [`EltwiseError::NotApplicable`];
    /// only code generation failures surface as [`EltwiseError::Build`].
    pub fn init(
        isa: IsaLevel,
        data_type: DataType,
        desc: &EltwiseDesc,
        attr: &PrimitiveAttr,
        engine: &Engine,
    ) -> EltwiseResult<Self> {
        const WHAT: &str = "eltwise_fwd";
        let src = &desc.src_md;
        let dst = &desc.dst_md;

        if !engine.capabilities().mayiuse(isa) {
            return Err(not_applicable(WHAT, format!("{isa} unavailable")));
        }
        if desc.direction != Direction::Forward {
            return Err(not_applicable(WHAT, "not a forward descriptor"));
        }
        if src.data_type != data_type || dst.data_type != data_type {
            return Err(not_applicable(
                WHAT,
                format!("src {:?} / dst {:?}, expected {data_type:?}", src.data_type, dst.data_type),
            ));
        }
        if src.has_zero_dim() {
            return Err(not_applicable(WHAT, "zero-sized dimension"));
        }
        if !desc.layout_ok(src) {
            return Err(not_applicable(WHAT, "layout is neither dense nor zero-preserving"));
        }
        if !EltwiseInjector::is_supported(isa, desc.alg, Direction::Forward) {
            return Err(not_applicable(WHAT, format!("{} unsupported on {isa}", desc.alg.name())));
        }
        if !attr.has_default_values() {
            return Err(not_applicable(WHAT, "non-default attributes"));
        }
        if src != dst {
            return Err(not_applicable(WHAT, "src and dst layouts differ"));
        }

        let kdesc = KernelDesc::new(isa, data_type, desc.alg, desc.alpha, desc.beta, Direction::Forward);
        let kernel = match KernelRegistry::global().build(&kdesc, engine.capabilities()) {
            Some(k) => k?,
            None => {
                return Err(not_applicable(
                    WHAT,
                    format!("no kernel registered for {:?}", KernelKey::of(&kdesc)),
                ))
            }
        };

        Ok(EltwiseFwd {
            kernel,
            md: src.clone(),
            engine: engine.clone(),
        })
    }

    pub fn kernel(&self) -> &EltwiseKernel {
        &self.kernel
    }

    pub fn memory_desc(&self) -> &MemoryDesc {
        &self.md
    }

    /// Apply the transform from `src` into `dst` (raw bytes of the configured
    /// data type, `offset0` honoured on both).
    pub fn execute(&self, src: &[u8], dst: &mut [u8]) -> EltwiseResult<()> {
        check_len("src", src.len(), &self.md)?;
        check_len("dst", dst.len(), &self.md)?;
        let off = self.md.offset0 * self.md.data_type.size_bytes();
        let src_addr = src.as_ptr() as usize + off;
        let dst_addr = dst.as_mut_ptr() as usize + off;
        run_partitioned(&self.kernel, &self.md, &self.engine, src_addr, 0, dst_addr)
    }

    /// Apply the transform in place.
    pub fn execute_in_place(&self, buf: &mut [u8]) -> EltwiseResult<()> {
        check_len("buffer", buf.len(), &self.md)?;
        let off = self.md.offset0 * self.md.data_type.size_bytes();
        let addr = buf.as_mut_ptr() as usize + off;
        run_partitioned(&self.kernel, &self.md, &self.engine, addr, 0, addr)
    }

    /// Typed convenience over [`execute`](Self::execute); `T` must have the
    /// size of the configured data type (`f32`, `half::bf16`, `half::f16`).
    pub fn execute_typed<T: Pod>(&self, src: &[T], dst: &mut [T]) -> EltwiseResult<()> {
        check_elem_size::<T>(self.md.data_type)?;
        self.execute(bytemuck::cast_slice(src), bytemuck::cast_slice_mut(dst))
    }
}

pub(crate) fn check_elem_size<T>(dt: DataType) -> EltwiseResult<()> {
    if std::mem::size_of::<T>() != dt.size_bytes() {
        return Err(EltwiseError::InvalidArguments(format!(
            "element type of {} bytes used with {dt:?}",
            std::mem::size_of::<T>()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Capabilities;
    use crate::types::AlgKind;

    fn engine(nthr: usize) -> Engine {
        Engine::new()
            .with_capabilities(Capabilities::from_levels(&[IsaLevel::Sve128]))
            .with_num_threads(nthr)
    }

    fn plain(n: usize) -> MemoryDesc {
        MemoryDesc::plain(&[n], DataType::F32)
    }

    #[test]
    fn test_abs_small() {
        let desc = EltwiseDesc::forward(AlgKind::Abs, 0.0, 0.0, plain(5), plain(5));
        let p = EltwiseFwd::init(IsaLevel::Sve128, DataType::F32, &desc, &Default::default(), &engine(2)).unwrap();
        let src = [-1.0f32, 2.0, -3.0, 4.0, -5.0];
        let mut dst = [0.0f32; 5];
        p.execute_typed(&src, &mut dst).unwrap();
        assert_eq!(dst, [1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_offset0_respected() {
        let md = plain(4).with_offset0(2);
        let desc = EltwiseDesc::forward(AlgKind::Square, 0.0, 0.0, md.clone(), md);
        let p = EltwiseFwd::init(IsaLevel::Sve128, DataType::F32, &desc, &Default::default(), &engine(1)).unwrap();
        let src = [9.0f32, 9.0, 1.0, 2.0, 3.0, 4.0];
        let mut dst = [-1.0f32; 6];
        p.execute_typed(&src, &mut dst).unwrap();
        assert_eq!(dst, [-1.0, -1.0, 1.0, 4.0, 9.0, 16.0]);
    }

    #[test]
    fn test_in_place() {
        let desc = EltwiseDesc::forward(AlgKind::Linear, 2.0, 1.0, plain(7), plain(7));
        let p = EltwiseFwd::init(IsaLevel::Sve128, DataType::F32, &desc, &Default::default(), &engine(3)).unwrap();
        let mut buf: Vec<f32> = (0..7).map(|i| i as f32).collect();
        p.execute_in_place(bytemuck::cast_slice_mut(&mut buf)).unwrap();
        assert_eq!(buf, vec![1.0, 3.0, 5.0, 7.0, 9.0, 11.0, 13.0]);
    }

    #[test]
    fn test_rejections_are_not_applicable() {
        let attr = PrimitiveAttr::default();
        let e = engine(1);
        let ok = EltwiseDesc::forward(AlgKind::Relu, 0.0, 0.0, plain(8), plain(8));

        let err = EltwiseFwd::init(IsaLevel::Avx2, DataType::F32, &ok, &attr, &e).unwrap_err();
        assert!(err.is_not_applicable());
        let err = EltwiseFwd::init(IsaLevel::Sve128, DataType::Bf16, &ok, &attr, &e).unwrap_err();
        assert!(err.is_not_applicable());

        let mismatch = EltwiseDesc::forward(AlgKind::Relu, 0.0, 0.0, plain(8), plain(9));
        assert!(EltwiseFwd::init(IsaLevel::Sve128, DataType::F32, &mismatch, &attr, &e)
            .unwrap_err()
            .is_not_applicable());

        let zero = EltwiseDesc::forward(AlgKind::Relu, 0.0, 0.0, plain(0), plain(0));
        assert!(EltwiseFwd::init(IsaLevel::Sve128, DataType::F32, &zero, &attr, &e)
            .unwrap_err()
            .is_not_applicable());

        let scaled = PrimitiveAttr { output_scale: 0.5, ..Default::default() };
        assert!(EltwiseFwd::init(IsaLevel::Sve128, DataType::F32, &ok, &scaled, &e)
            .unwrap_err()
            .is_not_applicable());
    }

    #[test]
    fn test_short_buffer_is_invalid_arguments() {
        let desc = EltwiseDesc::forward(AlgKind::Relu, 0.0, 0.0, plain(8), plain(8));
        let p = EltwiseFwd::init(IsaLevel::Sve128, DataType::F32, &desc, &Default::default(), &engine(1)).unwrap();
        let src = [0.0f32; 8];
        let mut dst = [0.0f32; 7];
        let err = p.execute_typed(&src, &mut dst).unwrap_err();
        assert!(matches!(err, EltwiseError::InvalidArguments(_)));
        let mut wide = [0.0f64; 8];
        assert!(p.execute_typed(&[0.0f64; 8], &mut wide).is_err());
    }
}
