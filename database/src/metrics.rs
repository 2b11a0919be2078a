use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts};

type Result<T, E> = std::result::Result<T, E>;

fn register_int_counter_vec(
    name: &str,
    help: &str,
    label_names: &[&str],
) -> Result<IntCounterVec, prometheus::Error> {
    let opts = Opts::new(name, help);
    let counter = IntCounterVec::new(opts, label_names)?;
    prometheus::register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn register_histogram_vec(
    name: &str,
    help: &str,
    label_names: &[&str],
) -> Result<HistogramVec, prometheus::Error> {
    let opts = HistogramOpts::new(name, help)
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]);
    let histogram = HistogramVec::new(opts, label_names)?;
    prometheus::register(Box::new(histogram.clone()))?;
    Ok(histogram)
}

lazy_static! {
    pub(crate) static ref DATABASE_QUERIES: IntCounterVec = register_int_counter_vec(
        "database_queries_counter",
        "Total number of database queries by method_name and table_name",
        &["method_name", "table_name"]
    )
    .unwrap();
    pub(crate) static ref BLOCK_COMMIT_ROLLBACKS: IntCounterVec = register_int_counter_vec(
        "database_block_commit_rollbacks",
        "Block commits rolled back by backend",
        &["backend"]
    )
    .unwrap();
    pub(crate) static ref BLOCK_COMMIT_SECONDS: HistogramVec = register_histogram_vec(
        "database_block_commit_seconds",
        "Time spent committing one block write-set by backend",
        &["backend"]
    )
    .unwrap();
}

pub(crate) fn count_query(method_name: &str, table_name: &str) {
    DATABASE_QUERIES
        .with_label_values(&[method_name, table_name])
        .inc();
}
