//! 로깅 초기화
//!
//! 라이브러리는 `tracing` 이벤트만 남기고, 구독자 설치는 애플리케이션이
//! 한 번 호출하는 `init_tracing`이 담당합니다.
//!
//! # 사용 예시
//! ```rust,no_run
//! use sqlcore::logging::{init_tracing, LoggingConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_tracing(&LoggingConfig::from_env())?;
//!     tracing::info!("data layer ready");
//!     Ok(())
//! }
//! ```

pub mod config;

pub use config::LoggingConfig;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// 전역 tracing 구독자 설치
///
/// `RUST_LOG`가 있으면 그 필터를, 없으면 `config.level`을 사용합니다.
/// 이미 구독자가 설치되어 있으면 에러를 돌려줍니다.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    config.validate()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target);

    let result = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}
