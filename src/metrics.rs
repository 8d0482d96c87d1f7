//! Metric names and recording helpers.
//!
//! Without the `observability` feature the `metrics` macros are replaced by no-op
//! macros of the same name, so call sites compile unchanged and record nothing.

#[cfg(feature = "observability")]
pub use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

#[cfg(not(feature = "observability"))]
pub enum Unit {}

#[cfg(not(feature = "observability"))]
mod noop {
    #[macro_export]
    macro_rules! counter {
        ($($args:tt)*) => {};
    }

    #[macro_export]
    macro_rules! histogram {
        ($($args:tt)*) => {};
    }

    #[macro_export]
    macro_rules! describe_counter {
        ($($args:tt)*) => {};
    }

    #[macro_export]
    macro_rules! describe_histogram {
        ($($args:tt)*) => {};
    }
}

#[cfg(not(feature = "observability"))]
use crate::{counter, describe_counter, describe_histogram, histogram};

/// Registers descriptions for every metric the SDK emits. Call once at startup.
pub fn describe_metrics() {
    describe_histogram!(
        "multicall_batch_size_bucket",
        "Number of calls per aggregate3 request."
    );
    describe_counter!(
        "multicall_fetch_failed_total",
        Unit::Count,
        "Multicall rounds that failed at the RPC layer, labeled by stage."
    );
    describe_counter!(
        "pair_state_refresh_total",
        Unit::Count,
        "Pairs resolved per refresh, labeled by resulting state."
    );
    describe_counter!(
        "trade_search_total",
        Unit::Count,
        "Trade computations, labeled by outcome (found, no_route, no_candidates, invalid_route, aggregator)."
    );
    describe_counter!(
        "trade_stale_discarded_total",
        Unit::Count,
        "Refresh results dropped because the request changed while in flight."
    );
    describe_counter!(
        "trade_cache_hits_total",
        Unit::Count,
        "Trade memo hits within one pair snapshot epoch."
    );
    describe_counter!(
        "trade_cache_miss_total",
        Unit::Count,
        "Trade memo misses within one pair snapshot epoch."
    );
    describe_counter!(
        "aggregator_quote_failed_total",
        Unit::Count,
        "Aggregator quotes turned into no-route, labeled by reason."
    );
}

/// Installs the Prometheus exporter on `addr`.
#[cfg(feature = "observability")]
pub fn install_prometheus_exporter(addr: std::net::SocketAddr) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    Ok(())
}

pub fn record_multicall_batch_size(size: f64) {
    histogram!("multicall_batch_size_bucket", size);
}

pub fn increment_multicall_fetch_failed(stage: &str) {
    counter!("multicall_fetch_failed_total", 1, "stage" => stage.to_string());
}

pub fn increment_pair_state(state: &str, count: u64) {
    counter!("pair_state_refresh_total", count, "state" => state.to_string());
}

pub fn increment_trade_search(outcome: &str) {
    counter!("trade_search_total", 1, "outcome" => outcome.to_string());
}

pub fn increment_stale_discarded() {
    counter!("trade_stale_discarded_total", 1);
}

pub fn increment_trade_cache_hit() {
    counter!("trade_cache_hits_total", 1);
}

pub fn increment_trade_cache_miss() {
    counter!("trade_cache_miss_total", 1);
}

pub fn increment_aggregator_failure(reason: &str) {
    counter!("aggregator_quote_failed_total", 1, "reason" => reason.to_string());
}
