//! Prometheus 메트릭 수집 시스템
//!
//! 쿼리 실행, 연결 상태, 변경 이벤트 발행, 복제 지연을 기록합니다.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, TextEncoder,
};
use std::time::Duration;

lazy_static! {
    // 쿼리 메트릭
    pub static ref DB_QUERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "db_queries_total",
        "Total number of executed statements",
        &["kind"]
    )
    .expect("Failed to register db queries counter");

    pub static ref DB_QUERY_ERRORS_TOTAL: IntCounter = register_int_counter!(
        "db_query_errors_total",
        "Total number of failed statements"
    )
    .expect("Failed to register db query errors counter");

    pub static ref DB_QUERY_LATENCY: HistogramVec = register_histogram_vec!(
        "db_query_latency_seconds",
        "Statement latency in seconds",
        &["kind"]
    )
    .expect("Failed to register db query latency histogram");

    // 연결 메트릭
    pub static ref DB_POOL_CONNECTED: IntGaugeVec = register_int_gauge_vec!(
        "db_pool_connected",
        "1 while the pool for the given role is open",
        &["role"]
    )
    .expect("Failed to register db pool gauge");

    // 변경 이벤트 메트릭
    pub static ref CHANGE_EVENTS_PUBLISHED: IntCounterVec = register_int_counter_vec!(
        "db_change_events_published_total",
        "Change events handed to a sink",
        &["sink", "type"]
    )
    .expect("Failed to register change events counter");

    // 복제 메트릭
    pub static ref REPLICATION_LAG: IntGauge = register_int_gauge!(
        "db_replication_lag",
        "Last measured master/slave log position difference (-1 when unknown)"
    )
    .expect("Failed to register replication lag gauge");
}

/// 메트릭 헬퍼 함수들
pub struct Metrics;

impl Metrics {
    /// 쿼리 실행 시간 기록
    pub fn observe_query(kind: &str, duration: Duration) {
        DB_QUERIES_TOTAL.with_label_values(&[kind]).inc();
        DB_QUERY_LATENCY
            .with_label_values(&[kind])
            .observe(duration.as_secs_f64());
    }

    /// 쿼리 에러 기록
    pub fn record_query_error() {
        DB_QUERY_ERRORS_TOTAL.inc();
    }

    /// 풀 연결 상태 업데이트
    pub fn set_pool_connected(role: &str, connected: bool) {
        DB_POOL_CONNECTED
            .with_label_values(&[role])
            .set(i64::from(connected));
    }

    /// 변경 이벤트 발행 기록
    pub fn record_change_event(sink: &str, change_type: &str) {
        CHANGE_EVENTS_PUBLISHED
            .with_label_values(&[sink, change_type])
            .inc();
    }

    /// 복제 지연 업데이트
    pub fn set_replication_lag(lag: i64) {
        REPLICATION_LAG.set(lag);
    }

    /// Prometheus 메트릭을 텍스트 형식으로 수집
    pub fn gather_metrics() -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        Metrics::observe_query("select", Duration::from_millis(3));
        Metrics::record_query_error();
        Metrics::record_change_event("in_memory", "create");
        Metrics::set_pool_connected("master", true);
        Metrics::set_replication_lag(-1);

        let metrics_text = Metrics::gather_metrics().expect("Failed to gather metrics");
        assert!(metrics_text.contains("db_queries_total"));
        assert!(metrics_text.contains("db_change_events_published_total"));
        assert!(metrics_text.contains("db_replication_lag"));
    }
}
