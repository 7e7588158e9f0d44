//! Property-based tests.
//!
//! - balance211 partitions are disjoint, ordered and cover the work
//! - granule partitions never split a granule and stay within the total
//! - bf16/f16 identity routines reproduce their input bit for bit
//! - any element count produces the scalar reference result

use proptest::prelude::*;

use half::{bf16, f16};

use eltwise_kernels::scalar_ops::eltwise_fwd;
use eltwise_kernels::threading::{balance211, partition};
use eltwise_kernels::{
    AlgKind, Capabilities, DataType, EltwiseDesc, EltwiseFwd, Engine, IsaLevel, MemoryDesc,
    PrimitiveAttr,
};

fn engine(nthr: usize) -> Engine {
    Engine::new()
        .with_capabilities(Capabilities::from_levels(&IsaLevel::ALL))
        .with_num_threads(nthr)
}

fn identity(dt: DataType, isa: IsaLevel, n: usize, nthr: usize) -> EltwiseFwd {
    let md = MemoryDesc::plain(&[n], dt);
    let desc = EltwiseDesc::forward(AlgKind::Linear, 1.0, 0.0, md.clone(), md);
    EltwiseFwd::init(isa, dt, &desc, &PrimitiveAttr::default(), &engine(nthr)).unwrap()
}

fn arb_isa() -> impl Strategy<Value = IsaLevel> {
    prop::sample::select(IsaLevel::ALL.to_vec())
}

proptest! {
    #[test]
    fn prop_balance211_covers_in_order(n in 0usize..10_000, team in 1usize..97) {
        let mut expect_start = 0;
        let mut min_len = usize::MAX;
        let mut max_len = 0;
        for tid in 0..team {
            let (s, e) = balance211(n, team, tid);
            prop_assert_eq!(s, expect_start);
            prop_assert!(e >= s);
            min_len = min_len.min(e - s);
            max_len = max_len.max(e - s);
            expect_start = e;
        }
        prop_assert_eq!(expect_start, n);
        prop_assert!(max_len - min_len <= 1);
    }

    #[test]
    fn prop_partition_respects_granules(
        total in 1usize..50_000,
        granularity in 1usize..64,
        nthr in 1usize..65,
    ) {
        let parts = partition(total, granularity, nthr);
        prop_assert_eq!(parts.len(), nthr);
        let mut covered = 0;
        for p in &parts {
            if p.is_empty() {
                continue;
            }
            prop_assert_eq!(p.start, covered);
            prop_assert_eq!(p.start % granularity, 0);
            prop_assert!(p.end <= total);
            covered = p.end;
        }
        prop_assert_eq!(covered, total);
    }

    #[test]
    fn prop_bf16_identity_bits(
        bits in prop::collection::vec(any::<u16>(), 1..200),
        isa in arb_isa(),
        nthr in 1usize..6,
    ) {
        let src: Vec<bf16> = bits
            .into_iter()
            .map(bf16::from_bits)
            .filter(|v| !v.is_nan())
            .collect();
        prop_assume!(!src.is_empty());
        let p = identity(DataType::Bf16, isa, src.len(), nthr);
        let mut dst = vec![bf16::ZERO; src.len()];
        p.execute_typed(&src, &mut dst).unwrap();
        for (s, d) in src.iter().zip(&dst) {
            prop_assert_eq!(s.to_bits(), d.to_bits());
        }
    }

    #[test]
    fn prop_f16_identity_bits(
        bits in prop::collection::vec(any::<u16>(), 1..200),
        isa in arb_isa(),
    ) {
        let src: Vec<f16> = bits
            .into_iter()
            .map(f16::from_bits)
            .filter(|v| !v.is_nan())
            .collect();
        prop_assume!(!src.is_empty());
        let p = identity(DataType::F16, isa, src.len(), 2);
        let mut dst = vec![f16::ZERO; src.len()];
        p.execute_typed(&src, &mut dst).unwrap();
        for (s, d) in src.iter().zip(&dst) {
            prop_assert_eq!(s.to_bits(), d.to_bits());
        }
    }

    #[test]
    fn prop_any_length_matches_reference(
        src in prop::collection::vec(-50.0f32..50.0, 1..300),
        isa in arb_isa(),
        nthr in 1usize..9,
    ) {
        let md = MemoryDesc::plain(&[src.len()], DataType::F32);
        let desc = EltwiseDesc::forward(AlgKind::Relu, 0.2, 0.0, md.clone(), md);
        let p = EltwiseFwd::init(isa, DataType::F32, &desc, &PrimitiveAttr::default(), &engine(nthr)).unwrap();
        let mut dst = vec![0.0f32; src.len()];
        p.execute_typed(&src, &mut dst).unwrap();
        for (s, d) in src.iter().zip(&dst) {
            prop_assert_eq!(*d, eltwise_fwd(AlgKind::Relu, 0.2, 0.0, *s));
        }
    }
}
