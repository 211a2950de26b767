use std::sync::Arc;

use serde_json::Value;

use super::scalar_text;
use crate::registry::{Presentation, RenderHandler, TypeRegistry};
use crate::shape::{DataType, ShapeMetadata};

pub const NAME: &str = "time_series";

pub fn register(registry: &mut TypeRegistry) {
    registry.register(DataType::TimeSeries, Arc::new(TimeSeriesHandler));
}

/// Summarizes an ordered series of `{time, value}` points.
pub struct TimeSeriesHandler;

struct Point {
    time: String,
    value: f64,
}

impl RenderHandler for TimeSeriesHandler {
    fn name(&self) -> &'static str {
        NAME
    }

    fn render(&self, payload: &Value, metadata: &ShapeMetadata) -> Presentation {
        let ShapeMetadata::TimeSeries {
            time_key,
            value_key,
            nested,
            ..
        } = metadata
        else {
            return Presentation::raw(NAME, payload);
        };
        let items = if *nested {
            payload.get("data").and_then(Value::as_array)
        } else {
            payload.as_array()
        };
        let Some(points) = items.and_then(|items| extract(items, time_key, value_key)) else {
            return Presentation::raw(NAME, payload);
        };
        let (Some(first), Some(last)) = (points.first(), points.last()) else {
            return Presentation::raw(NAME, payload);
        };

        let min = points.iter().map(|p| p.value).fold(f64::INFINITY, f64::min);
        let max = points.iter().map(|p| p.value).fold(f64::NEG_INFINITY, f64::max);
        let mut lines = vec![
            format!("first: {} = {}", first.time, first.value),
            format!("last:  {} = {}", last.time, last.value),
            format!("range: {} .. {}", min, max),
        ];
        if first.value != 0.0 {
            let change = (last.value - first.value) / first.value * 100.0;
            lines.push(format!("change: {:+.2}%", change));
        }

        let title = match payload.get("symbol").or_else(|| payload.get("ticker")) {
            Some(sym) if *nested => format!("{} ({} points)", scalar_text(sym), points.len()),
            _ => format!("Time series ({} points)", points.len()),
        };
        Presentation {
            handler: NAME.to_string(),
            title,
            lines,
            fallback: false,
        }
    }
}

fn extract(items: &[Value], time_key: &str, value_key: &str) -> Option<Vec<Point>> {
    items
        .iter()
        .map(|item| {
            Some(Point {
                time: scalar_text(item.get(time_key)?),
                value: item.get(value_key)?.as_f64()?,
            })
        })
        .collect()
}
