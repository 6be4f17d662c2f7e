//! 문자열 ID 생성 유틸리티
//!
//! 자동 증가 컬럼을 쓰지 않는 테이블을 위한 불투명(opaque) 문자열 ID를 만듭니다.
//! 앞 8자리는 초 단위 타임스탬프(hex), 뒤 16자리는 난수(hex)입니다.
//! 시간 순으로 대략 정렬되지만 같은 초 안에서는 단조 증가하지 않습니다.

use chrono::Utc;
use rand::Rng;

/// 생성되는 ID의 길이 (ObjectId와 같은 24자)
pub const GENERATED_ID_LEN: usize = 24;

/// 새 문자열 ID를 생성합니다.
pub fn generate_id() -> String {
    let timestamp = Utc::now().timestamp().max(0) as u32;
    let random: u64 = rand::thread_rng().gen();
    format!("{timestamp:08x}{random:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_id_shape() {
        let id = generate_id();
        assert_eq!(id.len(), GENERATED_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let ids: std::collections::HashSet<String> = (0..1000).map(|_| generate_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_generated_id_prefix_is_time_ordered() {
        let first = generate_id();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let second = generate_id();
        assert!(first[..8] < second[..8]);
    }
}
