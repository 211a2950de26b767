//! Structural payload classification.
//!
//! `detect` is total: every `serde_json::Value`, including `null` and deeply
//! nested values, maps to exactly one `DataType`.

use serde::Serialize;
use serde_json::{Map, Value};

const TIME_KEYS: &[&str] = &["timestamp", "date", "time", "ts"];
const VALUE_KEYS: &[&str] = &["value", "price", "close"];
const ID_KEYS: &[&str] = &["symbol", "ticker", "name", "id"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    TimeSeries,
    Entity,
    Table,
    Unknown,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::TimeSeries => "time_series",
            DataType::Entity => "entity",
            DataType::Table => "table",
            DataType::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShapeMetadata {
    TimeSeries {
        points: usize,
        time_key: String,
        value_key: String,
        /// Set when the series sat under an object's `data` field.
        nested: bool,
    },
    Entity {
        id_key: String,
        id_value: String,
        fields: usize,
    },
    Table {
        columns: Vec<String>,
        rows: usize,
    },
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    pub data_type: DataType,
    pub metadata: ShapeMetadata,
}

impl DetectionResult {
    fn unknown() -> Self {
        Self {
            data_type: DataType::Unknown,
            metadata: ShapeMetadata::None,
        }
    }
}

pub fn detect(payload: &Value) -> DetectionResult {
    match payload {
        Value::Array(items) => detect_array(items, false),
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("data") {
                let nested = detect_array(items, true);
                if nested.data_type == DataType::TimeSeries {
                    return nested;
                }
            }
            detect_entity(map)
        }
        _ => DetectionResult::unknown(),
    }
}

fn detect_array(items: &[Value], nested: bool) -> DetectionResult {
    if items.is_empty() {
        return DetectionResult::unknown();
    }
    let rows: Vec<&Map<String, Value>> = items.iter().filter_map(Value::as_object).collect();
    if rows.len() != items.len() {
        return DetectionResult::unknown();
    }

    if let Some((time_key, value_key)) = series_keys(&rows) {
        return DetectionResult {
            data_type: DataType::TimeSeries,
            metadata: ShapeMetadata::TimeSeries {
                points: rows.len(),
                time_key: time_key.to_string(),
                value_key: value_key.to_string(),
                nested,
            },
        };
    }
    if nested {
        return DetectionResult::unknown();
    }

    let columns = union_keys(&rows);
    let shares_key = columns
        .iter()
        .any(|col| rows.iter().all(|row| row.contains_key(col.as_str())));
    if !shares_key {
        return DetectionResult::unknown();
    }
    DetectionResult {
        data_type: DataType::Table,
        metadata: ShapeMetadata::Table {
            columns,
            rows: rows.len(),
        },
    }
}

/// First time key and numeric value key present on every row.
fn series_keys(rows: &[&Map<String, Value>]) -> Option<(&'static str, &'static str)> {
    let time_key = TIME_KEYS
        .iter()
        .find(|k| rows.iter().all(|row| row.contains_key(**k)))?;
    let value_key = VALUE_KEYS.iter().find(|k| {
        rows.iter()
            .all(|row| row.get(**k).map(Value::is_number).unwrap_or(false))
    })?;
    Some((*time_key, *value_key))
}

fn union_keys(rows: &[&Map<String, Value>]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

fn detect_entity(map: &Map<String, Value>) -> DetectionResult {
    let id = ID_KEYS.iter().find_map(|k| match map.get(*k) {
        Some(Value::String(s)) if !s.is_empty() => Some((*k, s.clone())),
        Some(Value::Number(n)) => Some((*k, n.to_string())),
        _ => None,
    });
    let Some((id_key, id_value)) = id else {
        return DetectionResult::unknown();
    };
    let scalar_fields = map
        .iter()
        .filter(|(k, v)| k.as_str() != id_key && is_scalar(v))
        .count();
    if scalar_fields == 0 {
        return DetectionResult::unknown();
    }
    DetectionResult {
        data_type: DataType::Entity,
        metadata: ShapeMetadata::Entity {
            id_key: id_key.to_string(),
            id_value,
            fields: map.len(),
        },
    }
}

fn is_scalar(v: &Value) -> bool {
    matches!(v, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_time_series() {
        let r = detect(&json!([
            {"timestamp": "2024-01-01", "value": 1.5},
            {"timestamp": "2024-01-02", "value": 2}
        ]));
        assert_eq!(r.data_type, DataType::TimeSeries);
        assert_eq!(
            r.metadata,
            ShapeMetadata::TimeSeries {
                points: 2,
                time_key: "timestamp".to_string(),
                value_key: "value".to_string(),
                nested: false,
            }
        );
    }

    #[test]
    fn detects_series_under_data_field() {
        let r = detect(&json!({"symbol": "AAPL", "data": [{"date": "d1", "close": 150.0}]}));
        assert_eq!(r.data_type, DataType::TimeSeries);
        assert!(matches!(r.metadata, ShapeMetadata::TimeSeries { nested: true, .. }));
    }

    #[test]
    fn non_numeric_values_are_a_table() {
        let r = detect(&json!([
            {"timestamp": "t1", "value": "n/a"},
            {"timestamp": "t2", "value": "n/a", "note": "x"}
        ]));
        assert_eq!(r.data_type, DataType::Table);
        assert_eq!(
            r.metadata,
            ShapeMetadata::Table {
                columns: vec!["timestamp".to_string(), "value".to_string(), "note".to_string()],
                rows: 2,
            }
        );
    }

    #[test]
    fn detects_entity() {
        let r = detect(&json!({"symbol": "AAPL", "price": 150.2, "sector": "Tech"}));
        assert_eq!(r.data_type, DataType::Entity);
        assert!(matches!(r.metadata, ShapeMetadata::Entity { ref id_value, fields: 3, .. } if id_value == "AAPL"));
    }

    #[test]
    fn entity_needs_a_scalar_field() {
        assert_eq!(detect(&json!({"name": "x"})).data_type, DataType::Unknown);
        assert_eq!(detect(&json!({"name": "x", "nested": {"a": 1}})).data_type, DataType::Unknown);
    }

    #[test]
    fn rows_without_common_key_are_unknown() {
        assert_eq!(detect(&json!([{"a": 1}, {"b": 2}])).data_type, DataType::Unknown);
    }

    #[test]
    fn detect_is_total() {
        let mut deep = json!(1);
        for _ in 0..200 {
            deep = json!({ "inner": [deep] });
        }
        let inputs = vec![
            Value::Null,
            json!({}),
            json!([]),
            json!("text"),
            json!(42),
            json!(true),
            json!([1, 2, 3]),
            json!([{"timestamp": 1, "value": 1}, 5]),
            deep,
        ];
        for input in inputs {
            let r = detect(&input);
            assert_eq!(r.data_type, DataType::Unknown, "{}", input);
            assert_eq!(r.metadata, ShapeMetadata::None);
        }
    }

    #[test]
    fn detect_is_deterministic() {
        let payload = json!([{"ts": 1, "price": 2.0}]);
        assert_eq!(detect(&payload), detect(&payload));
    }
}
