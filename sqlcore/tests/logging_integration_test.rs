//! 로깅 초기화 통합 테스트
//!
//! 전역 구독자는 프로세스당 한 번만 설치되므로 이 파일은 별도 바이너리로 둡니다.

use anyhow::Result;
use sqlcore::logging::{init_tracing, LoggingConfig};

#[test]
fn test_init_tracing_installs_subscriber_once() -> Result<()> {
    let config = LoggingConfig {
        level: "sqlcore=debug,info".to_string(),
        json_format: true,
        with_target: true,
    };

    init_tracing(&config)?;
    tracing::info!(table = "users", "logging initialized");

    // a second install is reported, not ignored
    assert!(init_tracing(&config).is_err());
    Ok(())
}
