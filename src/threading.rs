//! Work partitioning and fork-join execution.
//!
//! `balance211` splits `n` work items across a team so that each member gets
//! `⌊n/T⌋` or `⌈n/T⌉` items, larger shares first, contiguous and in order.

use rayon::prelude::*;
use rayon::ThreadPool;

#[inline]
pub fn div_up(a: usize, b: usize) -> usize {
    debug_assert!(b > 0);
    a.div_ceil(b)
}

/// Range `[start, end)` of `n` items assigned to member `tid` of `team`.
pub fn balance211(n: usize, team: usize, tid: usize) -> (usize, usize) {
    if team <= 1 || n == 0 {
        return if tid == 0 { (0, n) } else { (n, n) };
    }
    let n1 = div_up(n, team);
    let n2 = n1 - 1;
    // members [0, t1) take n1 items, the rest n2
    let t1 = n - n2 * team;
    let my = if tid < t1 { n1 } else { n2 };
    let start = if tid <= t1 {
        tid * n1
    } else {
        t1 * n1 + (tid - t1) * n2
    };
    (start, start + my)
}

/// Element range owned by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkPartition {
    pub start: usize,
    pub end: usize,
}

impl WorkPartition {
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Partition of worker `ithr` when `total` elements are split in granules of
/// `granularity` elements over `nthr` workers. Clamped to `total`.
pub fn partition_for(total: usize, granularity: usize, nthr: usize, ithr: usize) -> WorkPartition {
    let granules = div_up(total, granularity.max(1));
    let (s, e) = balance211(granules, nthr, ithr);
    WorkPartition {
        start: (s * granularity).min(total),
        end: (e * granularity).min(total),
    }
}

/// Partitions of all `nthr` workers, in worker order.
pub fn partition(total: usize, granularity: usize, nthr: usize) -> Vec<WorkPartition> {
    (0..nthr.max(1))
        .map(|ithr| partition_for(total, granularity, nthr, ithr))
        .collect()
}

/// Run `f(ithr, nthr)` for every worker and join.
///
/// Uses `pool` when given, otherwise the global rayon pool. A single worker
/// runs inline on the calling thread.
pub fn parallel<F>(pool: Option<&ThreadPool>, nthr: usize, f: F)
where
    F: Fn(usize, usize) + Send + Sync,
{
    let nthr = nthr.max(1);
    if nthr == 1 {
        f(0, 1);
        return;
    }
    let run = || (0..nthr).into_par_iter().for_each(|ithr| f(ithr, nthr));
    match pool {
        Some(p) => p.install(run),
        None => run(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_balance211_even_and_uneven() {
        assert_eq!(balance211(8, 4, 0), (0, 2));
        assert_eq!(balance211(8, 4, 3), (6, 8));
        // 10 over 4: 3, 3, 2, 2
        let r: Vec<_> = (0..4).map(|t| balance211(10, 4, t)).collect();
        assert_eq!(r, vec![(0, 3), (3, 6), (6, 8), (8, 10)]);
    }

    #[test]
    fn test_balance211_more_workers_than_items() {
        let r: Vec<_> = (0..5).map(|t| balance211(2, 5, t)).collect();
        assert_eq!(r, vec![(0, 1), (1, 2), (2, 2), (2, 2), (2, 2)]);
    }

    #[test]
    fn test_single_worker_takes_all() {
        assert_eq!(balance211(7, 1, 0), (0, 7));
        assert_eq!(balance211(0, 3, 1), (0, 0));
    }

    #[test]
    fn test_partition_clamps_to_total() {
        // 9 f32 elements, 16-element granules, 8 workers
        let parts = partition(9, 16, 8);
        assert_eq!(parts[0], WorkPartition { start: 0, end: 9 });
        assert!(parts[1..].iter().all(|p| p.is_empty()));
    }

    #[test]
    fn test_parallel_visits_every_worker() {
        let hits = AtomicUsize::new(0);
        parallel(None, 6, |ithr, nthr| {
            assert_eq!(nthr, 6);
            hits.fetch_add(1 << ithr, Ordering::Relaxed);
        });
        assert_eq!(hits.load(Ordering::Relaxed), 0b11_1111);
    }

    #[test]
    fn test_parallel_on_private_pool() {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let hits = AtomicUsize::new(0);
        parallel(Some(&pool), 3, |_, _| {
            hits.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(hits.load(Ordering::Relaxed), 3);
    }
}
