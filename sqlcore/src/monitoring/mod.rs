//! 모니터링 모듈 - Prometheus 메트릭
//!
//! 데이터 접근 계층의 성능과 상태를 기록합니다.

pub mod metrics;

pub use metrics::{
    Metrics, CHANGE_EVENTS_PUBLISHED, DB_POOL_CONNECTED, DB_QUERIES_TOTAL, DB_QUERY_ERRORS_TOTAL,
    DB_QUERY_LATENCY, REPLICATION_LAG,
};
