//! 문서(JSON) 처리 유틸리티
//!
//! 점(.)으로 구분된 경로 조회, 패치 병합, 변경 감지를 제공합니다.

use serde_json::{Map, Value};

/// 테이블 행을 표현하는 JSON 객체
pub type Document = Map<String, Value>;

/// `on_updated` 구독자가 관심을 두는 속성
#[derive(Debug, Clone, PartialEq)]
pub enum WatchedProperty {
    /// 경로의 값이 이전 문서와 달라지면 변경으로 봅니다.
    Changed(String),
    /// 모든 경로가 주어진 값과 같아졌고, 이전에는 같지 않았으면 변경으로 봅니다.
    ChangedTo(Vec<(String, Value)>),
}

impl From<&str> for WatchedProperty {
    fn from(path: &str) -> Self {
        WatchedProperty::Changed(path.to_string())
    }
}

impl From<String> for WatchedProperty {
    fn from(path: String) -> Self {
        WatchedProperty::Changed(path)
    }
}

/// `user.profile.name` 형식의 경로로 값을 찾습니다.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// 경로 값을 비교용으로 꺼냅니다. 없는 값과 null은 같게 취급합니다.
fn lookup(value: Option<&Value>, path: &str) -> Value {
    value
        .and_then(|v| get_path(v, path))
        .cloned()
        .unwrap_or(Value::Null)
}

/// 감시 속성 중 하나라도 변경되었는지 확인합니다.
pub fn deep_compare(
    data: &Value,
    initial_data: Option<&Value>,
    properties: &[WatchedProperty],
) -> bool {
    properties.iter().any(|property| match property {
        WatchedProperty::Changed(path) => {
            lookup(Some(data), path) != lookup(initial_data, path)
        }
        WatchedProperty::ChangedTo(expected) => expected.iter().all(|(path, target)| {
            lookup(Some(data), path) == *target && lookup(initial_data, path) != *target
        }),
    })
}

/// 패치를 문서에 얕게(최상위 키 기준) 병합합니다.
pub fn merge_patch(target: &mut Document, patch: &Document) {
    for (key, value) in patch {
        target.insert(key.clone(), value.clone());
    }
}
