//! `RecurDispatcher` — the trait boundary the `Tiler` recurses through
//! (spec §5, §9 "Parallel dispatch"). The legacy MPI `parallel_recur_requests`
//! / `parallel_server` pair is re-expressed here as an ordinary trait: the
//! core algorithm is agnostic to whether a child recursion runs inline or on
//! another thread, as long as results come back in section-index order.

/// Dispatches a batch of independent recursive child calls and returns their
/// results in the same order they were submitted (spec §5 "Ordering
/// guarantees": children are concatenated in section-index order regardless
/// of how many workers ran them).
pub trait RecurDispatcher: Send + Sync {
    fn dispatch<F, R>(&self, jobs: Vec<F>) -> Vec<R>
    where
        F: FnOnce() -> R + Send,
        R: Send;
}

/// Single-threaded dispatcher: walks children one at a time, each fully
/// persisted via its `TileStore` guard before the next begins (spec §5
/// "serial mode always fully processes one child ... then moves to the
/// next").
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialDispatcher;

impl RecurDispatcher for SerialDispatcher {
    fn dispatch<F, R>(&self, jobs: Vec<F>) -> Vec<R>
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        jobs.into_iter().map(|job| job()).collect()
    }
}

/// Fans children out across a rayon thread pool while still funnelling every
/// child through the same `TileStore` abstraction, so results are
/// byte-identical to `SerialDispatcher` for a given parameter set (spec §5).
#[derive(Debug, Default, Clone, Copy)]
pub struct RayonDispatcher;

impl RecurDispatcher for RayonDispatcher {
    fn dispatch<F, R>(&self, jobs: Vec<F>) -> Vec<R>
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        use rayon::prelude::*;
        jobs.into_par_iter().map(|job| job()).collect()
    }
}

/// Builds a `rayon::ThreadPool` honoring `Params::threads`, for use with
/// [`RayonDispatcher`].
pub fn build_thread_pool(threads: Option<usize>) -> crate::error::HsegResult<rayon::ThreadPool> {
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| crate::error::HsegError::algorithm_error(format!("failed to build thread pool: {e}")))
}

/// Message-passing dispatcher boundary for a future distributed backend
/// (spec §9 "Parallel dispatch", §1 Non-goals: MPI transport is out of
/// scope). No implementation ships; this exists purely to mark where one
/// would plug in without touching `Tiler`.
pub trait RemoteDispatcher: RecurDispatcher {
    /// Rank of the local process within the distributed run.
    fn rank(&self) -> u32;
    /// Total number of ranks participating.
    fn world_size(&self) -> u32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_dispatcher_preserves_submission_order() {
        let d = SerialDispatcher;
        let jobs: Vec<Box<dyn FnOnce() -> i32 + Send>> =
            vec![Box::new(|| 1), Box::new(|| 2), Box::new(|| 3)];
        let results: Vec<i32> = d.dispatch(jobs.into_iter().map(|j| move || j()).collect());
        assert_eq!(results, vec![1, 2, 3]);
    }

    #[test]
    fn rayon_dispatcher_preserves_submission_order() {
        let d = RayonDispatcher;
        let jobs: Vec<Box<dyn FnOnce() -> i32 + Send>> = (0..8).map(|i| -> Box<dyn FnOnce() -> i32 + Send> { Box::new(move || i) }).collect();
        let results: Vec<i32> = d.dispatch(jobs.into_iter().map(|j| move || j()).collect());
        assert_eq!(results, (0..8).collect::<Vec<_>>());
    }
}
