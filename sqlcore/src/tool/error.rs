//! Database Error Management
//!
//! 데이터 접근 계층에서 발생하는 모든 에러를 하나의 열거형으로 관리합니다.
//! 쓰기 경로의 에러는 절대 삼키지 않고 호출자에게 그대로 전달됩니다.

use thiserror::Error;
use tracing::{error, info, warn};

/// 데이터 접근 계층 에러
///
/// 호출자는 이 열거형의 변형(variant)으로 실패 종류를 구분합니다.
/// 복제 지연 확인 실패는 에러가 아니라 `-1` 반환값으로 표현됩니다.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    /// 연결 풀 생성 또는 연결 획득 실패
    #[error("Connection error: {0}")]
    Connection(String),

    /// `connect()` 성공 전에 접근자를 호출함
    #[error("Database is not connected: {0}")]
    NotConnected(String),

    /// 스키마 검증기가 행을 거부함 (아무것도 기록되지 않음)
    #[error("Validation error: {0}")]
    Validation(String),

    /// 쿼리 실행 실패 (제약 조건 위반, 문법, 쿼리 중 네트워크 단절)
    #[error("Query error: {0}")]
    Query(String),

    /// 트랜잭션 핸들 오용 (커밋/롤백 이후 사용 등)
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// 잘못된 식별자, 페이지 값, 패치 형식
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// 행과 문서 간 변환 실패
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DbError {
    /// 에러의 심각도를 반환합니다.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            // Critical: 저장소를 사용할 수 없음
            DbError::Connection(_) | DbError::NotConnected(_) | DbError::Configuration(_) => {
                ErrorSeverity::Critical
            }

            // High: 쓰기/읽기 실패
            DbError::Query(_) | DbError::Transaction(_) | DbError::Timeout(_) => {
                ErrorSeverity::High
            }

            // Medium: 호출자 입력 오류
            DbError::InvalidInput(_) | DbError::Serialization(_) => ErrorSeverity::Medium,

            // Low: 검증기가 거부함 (아무것도 기록되지 않음)
            DbError::Validation(_) => ErrorSeverity::Low,
        }
    }

    /// 에러를 로깅합니다.
    ///
    /// 심각도에 따라 적절한 로깅 레벨을 사용합니다.
    pub fn log(&self, context: &str) {
        let error_msg = self.to_string();

        match self.severity() {
            ErrorSeverity::Critical => error!("[CRITICAL] {} - {}", context, error_msg),
            ErrorSeverity::High => error!("[HIGH] {} - {}", context, error_msg),
            ErrorSeverity::Medium => warn!("[MEDIUM] {} - {}", context, error_msg),
            ErrorSeverity::Low => info!("[LOW] {} - {}", context, error_msg),
        }
    }

    /// 연결이 끊어졌음을 의미하는 에러인지 확인합니다.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, DbError::Connection(_))
    }
}

/// 에러 심각도 레벨
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorSeverity {
    Critical, // 시스템 장애
    High,     // 쿼리/트랜잭션 실패
    Medium,   // 호출자 입력 오류
    Low,      // 검증 거부
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

/// 데이터 접근 계층 결과 타입
pub type DbResult<T> = Result<T, DbError>;

/// SQLx 에러를 DbError로 변환하는 헬퍼 함수
///
/// # Arguments
/// * `err` - SQLx 에러
/// * `context` - 에러 컨텍스트
pub fn map_sqlx_error(err: sqlx::Error, context: &str) -> DbError {
    match err {
        sqlx::Error::Database(db_err) => {
            error!("데이터베이스 에러 [{}]: {}", context, db_err);
            DbError::Query(format!("{context}: {db_err}"))
        }
        sqlx::Error::Io(io_err) => {
            error!("I/O 에러 [{}]: {}", context, io_err);
            DbError::Connection(format!("{context}: {io_err}"))
        }
        sqlx::Error::Tls(tls_err) => {
            error!("TLS 에러 [{}]: {}", context, tls_err);
            DbError::Connection(format!("{context}: {tls_err}"))
        }
        sqlx::Error::Protocol(proto_err) => {
            error!("프로토콜 에러 [{}]: {}", context, proto_err);
            DbError::Connection(format!("{context}: {proto_err}"))
        }
        sqlx::Error::PoolTimedOut => {
            error!("연결 풀 타임아웃 [{}]", context);
            DbError::Timeout(format!("{context}: connection pool timed out"))
        }
        sqlx::Error::PoolClosed => {
            error!("연결 풀이 닫힘 [{}]", context);
            DbError::Connection(format!("{context}: connection pool is closed"))
        }
        sqlx::Error::Configuration(cfg_err) => {
            DbError::Configuration(format!("{context}: {cfg_err}"))
        }
        sqlx::Error::ColumnNotFound(column) => {
            DbError::Query(format!("{context}: column '{column}' not found"))
        }
        other => {
            error!("기타 데이터베이스 에러 [{}]: {}", context, other);
            DbError::Query(format!("{context}: {other}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = DbError::InvalidInput("page must be >= 1".to_string());
        assert_eq!(error.to_string(), "Invalid input: page must be >= 1");
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(
            DbError::Connection("refused".into()).severity(),
            ErrorSeverity::Critical
        );
        assert_eq!(DbError::Query("syntax".into()).severity(), ErrorSeverity::High);
        assert_eq!(
            DbError::InvalidInput("page".into()).severity(),
            ErrorSeverity::Medium
        );
        assert_eq!(
            DbError::Validation("email".into()).severity(),
            ErrorSeverity::Low
        );
    }

    #[test]
    fn test_pool_errors_map_to_connection_kinds() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolClosed, "select"),
            DbError::Connection(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut, "select"),
            DbError::Timeout(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound, "select"),
            DbError::Query(_)
        ));
    }

    #[test]
    fn test_serde_error_conversion() {
        let err = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        assert!(matches!(DbError::from(err), DbError::Serialization(_)));
    }
}
