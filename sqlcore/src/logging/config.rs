//! 로깅 설정 관리

use serde::{Deserialize, Serialize};

/// 로깅 시스템 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 기본 필터 (`RUST_LOG`가 없을 때 사용, 기본값: "info")
    pub level: String,

    /// JSON 형식 여부 (기본값: false)
    pub json_format: bool,

    /// 이벤트의 target 표시 여부 (기본값: true)
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_target: true,
        }
    }
}

impl LoggingConfig {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("LOG_LEVEL") {
            if !val.trim().is_empty() {
                config.level = val;
            }
        }

        if let Ok(val) = std::env::var("LOG_JSON_FORMAT") {
            config.json_format = val.to_lowercase() == "true";
        }

        if let Ok(val) = std::env::var("LOG_WITH_TARGET") {
            config.with_target = val.to_lowercase() == "true";
        }

        config
    }

    /// 설정 유효성 검증
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.level.trim().is_empty() {
            return Err(anyhow::anyhow!("level must not be empty"));
        }
        tracing_subscriber::EnvFilter::try_new(&self.level)
            .map_err(|e| anyhow::anyhow!("invalid log filter '{}': {}", self.level, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(!config.json_format);
        assert!(config.with_target);
    }

    #[test]
    fn test_config_validation() {
        let mut config = LoggingConfig::default();
        assert!(config.validate().is_ok());

        config.level = "sqlcore=debug,sqlx=warn".to_string();
        assert!(config.validate().is_ok());

        config.level = "  ".to_string();
        assert!(config.validate().is_err());
    }
}
