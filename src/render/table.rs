use std::sync::Arc;

use serde_json::Value;

use super::scalar_text;
use crate::registry::{Presentation, RenderHandler, TypeRegistry};
use crate::shape::{DataType, ShapeMetadata};

pub const NAME: &str = "table";
const MAX_ROWS: usize = 20;

pub fn register(registry: &mut TypeRegistry) {
    registry.register(DataType::Table, Arc::new(TableHandler));
}

/// Pipe-separated text table; long tables are truncated.
pub struct TableHandler;

impl RenderHandler for TableHandler {
    fn name(&self) -> &'static str {
        NAME
    }

    fn render(&self, payload: &Value, metadata: &ShapeMetadata) -> Presentation {
        let (ShapeMetadata::Table { columns, .. }, Some(rows)) = (metadata, payload.as_array()) else {
            return Presentation::raw(NAME, payload);
        };
        if columns.is_empty() || rows.iter().any(|r| !r.is_object()) {
            return Presentation::raw(NAME, payload);
        }

        let mut lines = Vec::with_capacity(rows.len().min(MAX_ROWS) + 3);
        lines.push(columns.join(" | "));
        lines.push(columns.iter().map(|c| "-".repeat(c.len().max(1))).collect::<Vec<_>>().join("-+-"));
        for row in rows.iter().take(MAX_ROWS) {
            let cells: Vec<String> = columns
                .iter()
                .map(|c| row.get(c).map(scalar_text).unwrap_or_default())
                .collect();
            lines.push(cells.join(" | "));
        }
        if rows.len() > MAX_ROWS {
            lines.push(format!("... {} more rows", rows.len() - MAX_ROWS));
        }
        Presentation {
            handler: NAME.to_string(),
            title: format!("Table ({} rows x {} columns)", rows.len(), columns.len()),
            lines,
            fallback: false,
        }
    }
}
