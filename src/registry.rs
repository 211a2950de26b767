//! Discriminant -> renderer mapping.
//!
//! The registry knows only the `RenderHandler` contract, never a concrete
//! handler. Handler modules register themselves through an explicit call made
//! at startup (see `render::install_builtin_handlers`), so the install order is
//! visible in one place instead of depending on module load order.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::logging::{self, obj, v_str, Domain};
use crate::shape::{DataType, ShapeMetadata};

/// Renderer-agnostic output of a handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Presentation {
    pub handler: String,
    pub title: String,
    pub lines: Vec<String>,
    /// True when this is the generic raw rendering rather than a shaped one.
    pub fallback: bool,
}

impl Presentation {
    /// Generic raw rendering, used when no handler applies or a handler
    /// rejects the payload.
    pub fn raw(handler: &str, payload: &Value) -> Self {
        let body = serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
        Self {
            handler: handler.to_string(),
            title: "Raw data".to_string(),
            lines: body.lines().map(str::to_string).collect(),
            fallback: true,
        }
    }
}

/// A pluggable visualization. Given a payload of its discriminant it must
/// render a presentation, and for a structurally invalid payload a safe
/// fallback instead of failing.
pub trait RenderHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn render(&self, payload: &Value, metadata: &ShapeMetadata) -> Presentation;
}

#[derive(Default)]
pub struct TypeRegistry {
    handlers: HashMap<DataType, Arc<dyn RenderHandler>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last registration for a discriminant wins. The replaced handler is
    /// returned and the overwrite is logged.
    pub fn register(
        &mut self,
        data_type: DataType,
        handler: Arc<dyn RenderHandler>,
    ) -> Option<Arc<dyn RenderHandler>> {
        let name = handler.name();
        let previous = self.handlers.insert(data_type, handler);
        match &previous {
            Some(old) => logging::warn(
                Domain::Registry,
                "overwrite",
                obj(&[
                    ("data_type", v_str(data_type.as_str())),
                    ("previous", v_str(old.name())),
                    ("handler", v_str(name)),
                ]),
            ),
            None => logging::debug(
                Domain::Registry,
                "register",
                obj(&[("data_type", v_str(data_type.as_str())), ("handler", v_str(name))]),
            ),
        }
        previous
    }

    /// `None` is the absent sentinel; callers fall back to `Presentation::raw`.
    pub fn lookup(&self, data_type: DataType) -> Option<Arc<dyn RenderHandler>> {
        self.handlers.get(&data_type).cloned()
    }

    pub fn has(&self, data_type: DataType) -> bool {
        self.handlers.contains_key(&data_type)
    }

    pub fn registered(&self) -> Vec<DataType> {
        let mut types: Vec<DataType> = self.handlers.keys().copied().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl RenderHandler for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        fn render(&self, payload: &Value, _metadata: &ShapeMetadata) -> Presentation {
            Presentation {
                handler: self.0.to_string(),
                title: self.0.to_string(),
                lines: vec![payload.to_string()],
                fallback: false,
            }
        }
    }

    #[test]
    fn lookup_of_unregistered_is_absent() {
        let reg = TypeRegistry::new();
        assert!(reg.lookup(DataType::Table).is_none());
        assert!(!reg.has(DataType::Table));
        assert!(reg.is_empty());
    }

    #[test]
    fn lookup_returns_the_registered_handler() {
        let mut reg = TypeRegistry::new();
        let h: Arc<dyn RenderHandler> = Arc::new(Named("a"));
        assert!(reg.register(DataType::Table, Arc::clone(&h)).is_none());
        let found = reg.lookup(DataType::Table).unwrap();
        assert!(Arc::ptr_eq(&found, &h));
        assert!(reg.has(DataType::Table));
    }

    #[test]
    fn second_registration_wins() {
        let mut reg = TypeRegistry::new();
        let first: Arc<dyn RenderHandler> = Arc::new(Named("first"));
        let second: Arc<dyn RenderHandler> = Arc::new(Named("second"));
        reg.register(DataType::Entity, Arc::clone(&first));
        let replaced = reg.register(DataType::Entity, Arc::clone(&second)).unwrap();

        assert!(Arc::ptr_eq(&replaced, &first));
        let found = reg.lookup(DataType::Entity).unwrap();
        assert!(Arc::ptr_eq(&found, &second));
        assert_eq!(found.name(), "second");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn registered_lists_sorted_discriminants() {
        let mut reg = TypeRegistry::new();
        reg.register(DataType::Table, Arc::new(Named("t")));
        reg.register(DataType::TimeSeries, Arc::new(Named("s")));
        assert_eq!(reg.registered(), vec![DataType::TimeSeries, DataType::Table]);
    }

    #[test]
    fn raw_presentation_is_marked_fallback() {
        let p = Presentation::raw("raw", &serde_json::json!({"a": 1}));
        assert!(p.fallback);
        assert_eq!(p.lines, vec!["{", "  \"a\": 1", "}"]);
    }
}
