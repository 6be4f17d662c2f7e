use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

/// 문서에 기록되는 타임스탬프
///
/// 모든 타임스탬프는 UTC RFC3339(마이크로초) 문자열로 문서에 들어갑니다.
/// 같은 형식이므로 문자열 비교가 시간 비교와 일치합니다.
pub struct CurrentTime {
    pub current_time: DateTime<Utc>,
}

impl CurrentTime {
    pub fn new() -> Self {
        Self {
            current_time: Utc::now(),
        }
    }

    pub fn to_rfc3339(&self) -> String {
        format_timestamp(&self.current_time)
    }

    /// JSON 문서에 넣을 값
    pub fn to_value(&self) -> Value {
        Value::String(self.to_rfc3339())
    }
}

impl Default for CurrentTime {
    fn default() -> Self {
        Self::new()
    }
}

pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// RFC3339 문자열을 UTC 시각으로 해석합니다.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_round_trip_keeps_micros() {
        let now = CurrentTime::new();
        let parsed = parse_timestamp(&now.to_rfc3339()).unwrap();
        assert_eq!(
            parsed.timestamp_micros(),
            now.current_time.timestamp_micros()
        );
    }

    #[test]
    fn test_non_timestamp_is_rejected() {
        assert!(parse_timestamp("John Doe").is_none());
    }
}
