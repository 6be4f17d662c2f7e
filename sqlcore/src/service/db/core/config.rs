//! 데이터베이스 서비스 설정 모듈
//!
//! 빌더 패턴으로 데이터베이스 서비스 설정을 관리

use crate::config::db::DbConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 데이터베이스 서비스 설정
#[derive(Debug, Clone, Default)]
pub struct DbServiceConfig {
    /// 접속 주소 설정
    pub db_config: DbConfig,

    /// 쿼리 실행 설정
    pub query_config: QueryConfig,

    /// 연결 풀 설정
    pub pool_config: PoolConfig,
}

/// 쿼리 실행 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// 쿼리 로깅 활성화
    pub enable_query_logging: bool,

    /// 느린 쿼리 로깅 (임계값: ms)
    pub slow_query_threshold_ms: u64,
}

/// 연결 풀 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// 풀의 최소 연결 수
    pub min_connections: u32,

    /// 풀의 최대 연결 수
    pub max_connections: u32,

    /// 연결 획득 타임아웃
    pub acquire_timeout: Duration,

    /// 유휴 연결 타임아웃
    pub idle_timeout: Duration,

    /// 최대 연결 수명
    pub max_lifetime: Duration,

    /// 연결 획득 재시도 활성화
    pub enable_retry: bool,

    /// 최대 재시도 횟수
    pub max_retries: u32,

    /// 재시도 지연 시간 (시도 횟수만큼 선형 증가)
    pub retry_delay: Duration,
}

impl DbServiceConfig {
    /// 환경 변수에서 설정 생성
    pub fn from_env() -> Self {
        Self::new(DbConfig::from_env())
    }

    /// 기본값으로 설정 생성
    pub fn new(db_config: DbConfig) -> Self {
        Self {
            db_config,
            query_config: QueryConfig::default(),
            pool_config: PoolConfig::default(),
        }
    }

    /// Builder method for query configuration
    pub fn with_query_config(mut self, config: QueryConfig) -> Self {
        self.query_config = config;
        self
    }

    /// Builder method for pool configuration
    pub fn with_pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Log every statement and anything slower than 200ms
    pub fn verbose(mut self) -> Self {
        self.query_config.enable_query_logging = true;
        self.query_config.slow_query_threshold_ms = 200;
        self
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            enable_query_logging: true,
            slow_query_threshold_ms: 1000,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 0,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(3600),
            enable_retry: true,
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}
