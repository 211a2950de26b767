//! Payload routing: detect shape, look up the handler, fall back to raw.

pub mod entity;
pub mod table;
pub mod time_series;

use serde_json::Value;

use crate::logging::{self, obj, v_str, Domain};
use crate::registry::{Presentation, TypeRegistry};
use crate::shape::{detect, DetectionResult};

pub const RAW_HANDLER: &str = "raw";

/// Register the built-in handlers. Order is significant only when two modules
/// claim the same discriminant; the later one wins.
///
/// 1. time series
/// 2. entity
/// 3. table
pub fn install_builtin_handlers(registry: &mut TypeRegistry) {
    time_series::register(registry);
    entity::register(registry);
    table::register(registry);
}

pub struct Router<'a> {
    registry: &'a TypeRegistry,
}

impl<'a> Router<'a> {
    pub fn new(registry: &'a TypeRegistry) -> Self {
        Self { registry }
    }

    pub fn render(&self, payload: &Value) -> Presentation {
        let detection = detect(payload);
        self.render_detected(payload, &detection)
    }

    pub fn render_detected(&self, payload: &Value, detection: &DetectionResult) -> Presentation {
        match self.registry.lookup(detection.data_type) {
            Some(handler) => handler.render(payload, &detection.metadata),
            None => {
                logging::debug(
                    Domain::Registry,
                    "fallback",
                    obj(&[("data_type", v_str(detection.data_type.as_str()))]),
                );
                Presentation::raw(RAW_HANDLER, payload)
            }
        }
    }
}

/// Short display form of a scalar; containers are rendered compactly.
pub(crate) fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::DataType;
    use serde_json::json;

    fn registry() -> TypeRegistry {
        let mut reg = TypeRegistry::new();
        install_builtin_handlers(&mut reg);
        reg
    }

    #[test]
    fn builtins_cover_every_known_shape() {
        let reg = registry();
        assert_eq!(
            reg.registered(),
            vec![DataType::TimeSeries, DataType::Entity, DataType::Table]
        );
        assert!(!reg.has(DataType::Unknown));
    }

    #[test]
    fn routes_series_to_series_handler() {
        let reg = registry();
        let p = Router::new(&reg).render(&json!([
            {"timestamp": "t1", "value": 10.0},
            {"timestamp": "t2", "value": 12.0}
        ]));
        assert_eq!(p.handler, time_series::NAME);
        assert!(!p.fallback);
    }

    #[test]
    fn unknown_shape_falls_back_to_raw() {
        let reg = registry();
        let p = Router::new(&reg).render(&json!("plain text"));
        assert_eq!(p.handler, RAW_HANDLER);
        assert!(p.fallback);
        assert_eq!(p.lines, vec!["\"plain text\""]);
    }

    #[test]
    fn empty_registry_always_falls_back() {
        let reg = TypeRegistry::new();
        let p = Router::new(&reg).render(&json!({"symbol": "AAPL", "price": 1.0}));
        assert!(p.fallback);
    }
}
