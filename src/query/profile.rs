use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// A snapshot of per-stage query timings.
///
/// Profiling is enabled via the `JX_PROFILE` environment variable; every
/// stage accumulates elapsed nanoseconds and the number of times it ran.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryProfileSnapshot {
    /// Total nanoseconds spent planning.
    pub plan_ns: u64,
    /// Number of plans built.
    pub plan_count: u64,
    /// Total nanoseconds spent pulling documents from storage.
    pub scan_ns: u64,
    /// Number of scans.
    pub scan_count: u64,
    /// Total nanoseconds spent expanding and filtering rows.
    pub filter_ns: u64,
    /// Number of filter passes.
    pub filter_count: u64,
    /// Total nanoseconds spent bucketing and accumulating.
    pub aggregate_ns: u64,
    /// Number of aggregation passes.
    pub aggregate_count: u64,
    /// Total nanoseconds spent sorting.
    pub sort_ns: u64,
    /// Number of sorts.
    pub sort_count: u64,
    /// Total nanoseconds spent shaping results.
    pub shape_ns: u64,
    /// Number of results shaped.
    pub shape_count: u64,
}

#[derive(Default)]
struct QueryProfileCounters {
    plan_ns: AtomicU64,
    plan_count: AtomicU64,
    scan_ns: AtomicU64,
    scan_count: AtomicU64,
    filter_ns: AtomicU64,
    filter_count: AtomicU64,
    aggregate_ns: AtomicU64,
    aggregate_count: AtomicU64,
    sort_ns: AtomicU64,
    sort_count: AtomicU64,
    shape_ns: AtomicU64,
    shape_count: AtomicU64,
}

static PROFILE_ENABLED: OnceLock<bool> = OnceLock::new();
static PROFILE_COUNTERS: OnceLock<QueryProfileCounters> = OnceLock::new();

fn profiling_enabled() -> bool {
    *PROFILE_ENABLED.get_or_init(|| std::env::var_os("JX_PROFILE").is_some())
}

fn counters() -> Option<&'static QueryProfileCounters> {
    profiling_enabled().then(|| PROFILE_COUNTERS.get_or_init(QueryProfileCounters::default))
}

pub(crate) fn profile_timer() -> Option<Instant> {
    profiling_enabled().then(Instant::now)
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum QueryProfileKind {
    /// Planning a query document.
    Plan,
    /// Pulling documents from storage.
    Scan,
    /// Expanding nested rows and applying filters.
    Filter,
    /// Bucketing rows and feeding accumulators.
    Aggregate,
    /// Sorting output rows.
    Sort,
    /// Rendering the requested format.
    Shape,
}

/// Adds the time elapsed since `start` to one stage, when profiling is on.
pub(crate) fn record_profile_timer(kind: QueryProfileKind, start: Option<Instant>) {
    let Some(start) = start else {
        return;
    };
    let Some(counters) = counters() else {
        return;
    };
    let nanos = start.elapsed().as_nanos().min(u64::MAX as u128) as u64;
    let (ns, count) = match kind {
        QueryProfileKind::Plan => (&counters.plan_ns, &counters.plan_count),
        QueryProfileKind::Scan => (&counters.scan_ns, &counters.scan_count),
        QueryProfileKind::Filter => (&counters.filter_ns, &counters.filter_count),
        QueryProfileKind::Aggregate => (&counters.aggregate_ns, &counters.aggregate_count),
        QueryProfileKind::Sort => (&counters.sort_ns, &counters.sort_count),
        QueryProfileKind::Shape => (&counters.shape_ns, &counters.shape_count),
    };
    ns.fetch_add(nanos, Ordering::Relaxed);
    count.fetch_add(1, Ordering::Relaxed);
}

/// Retrieves a snapshot of current query profiling metrics.
///
/// # Arguments
///
/// * `reset` - If `true`, resets all counters to zero after reading them.
///
/// # Returns
///
/// Returns `Some(QueryProfileSnapshot)` if profiling is enabled via the
/// `JX_PROFILE` environment variable, or `None` if profiling is disabled.
///
/// # Example
///
/// ```no_run
/// use jx::query::profile::profile_snapshot;
///
/// if let Some(snapshot) = profile_snapshot(true) {
///     println!("aggregate: {}ns over {} passes", snapshot.aggregate_ns, snapshot.aggregate_count);
/// }
/// ```
pub fn profile_snapshot(reset: bool) -> Option<QueryProfileSnapshot> {
    let counters = counters()?;
    let load = |counter: &AtomicU64| {
        if reset {
            counter.swap(0, Ordering::Relaxed)
        } else {
            counter.load(Ordering::Relaxed)
        }
    };
    Some(QueryProfileSnapshot {
        plan_ns: load(&counters.plan_ns),
        plan_count: load(&counters.plan_count),
        scan_ns: load(&counters.scan_ns),
        scan_count: load(&counters.scan_count),
        filter_ns: load(&counters.filter_ns),
        filter_count: load(&counters.filter_count),
        aggregate_ns: load(&counters.aggregate_ns),
        aggregate_count: load(&counters.aggregate_count),
        sort_ns: load(&counters.sort_ns),
        sort_count: load(&counters.sort_count),
        shape_ns: load(&counters.shape_ns),
        shape_count: load(&counters.shape_count),
    })
}
