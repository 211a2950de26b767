use std::sync::Arc;

use serde_json::Value;

use super::scalar_text;
use crate::registry::{Presentation, RenderHandler, TypeRegistry};
use crate::shape::{DataType, ShapeMetadata};

pub const NAME: &str = "entity";

pub fn register(registry: &mut TypeRegistry) {
    registry.register(DataType::Entity, Arc::new(EntityHandler));
}

/// Key/value card for a single object such as a company or ticker profile.
pub struct EntityHandler;

impl RenderHandler for EntityHandler {
    fn name(&self) -> &'static str {
        NAME
    }

    fn render(&self, payload: &Value, metadata: &ShapeMetadata) -> Presentation {
        let (ShapeMetadata::Entity { id_key, id_value, .. }, Some(map)) = (metadata, payload.as_object())
        else {
            return Presentation::raw(NAME, payload);
        };

        let lines = map
            .iter()
            .filter(|(k, _)| *k != id_key)
            .map(|(k, v)| match v {
                Value::Object(inner) => format!("{}: {{{} fields}}", k, inner.len()),
                Value::Array(items) => format!("{}: [{} items]", k, items.len()),
                scalar => format!("{}: {}", k, scalar_text(scalar)),
            })
            .collect();
        Presentation {
            handler: NAME.to_string(),
            title: id_value.clone(),
            lines,
            fallback: false,
        }
    }
}
