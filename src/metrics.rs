//! Metrics exposition and the recording helpers used by the jobs.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

pub fn init_metrics(addr: SocketAddr) {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus recorder");

    tracing::info!("metrics server listening on http://{}", addr);
}

pub fn record_job_duration(name: &'static str, status: &'static str, elapsed: Duration) {
    histogram!("job_duration_seconds", "name" => name, "status" => status)
        .record(elapsed.as_secs_f64());
}

pub fn record_block_fetched() {
    counter!("blocks_fetched_total").increment(1);
}

pub fn record_transactions_inserted(amount: usize) {
    counter!("transactions_inserted_total").increment(amount as u64);
}

pub fn record_block_indexed(block_number: u64) {
    gauge!("block_indexed").set(block_number as f64);
}

pub fn record_transactions_broadcasted(amount: usize) {
    counter!("transactions_broadcasted_total").increment(amount as u64);
}
