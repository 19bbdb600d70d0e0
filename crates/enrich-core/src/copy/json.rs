use base64::Engine;
use serde_json::{Map, Number};
use std::collections::HashSet;
use tracing::debug;

use super::strategy::{CopyContext, CopyStrategy, Fidelity, StrategyError, StrategyKind};
use crate::value::Value;

/// Convert to JSON, expanding containers only above `max_depth`.
///
/// A container sitting at nesting level `max_depth` or deeper collapses to
/// `null`. Bytes become base64 text and opaque handles their type name.
/// Shared cells do not add a level, so a cell re-entered at the same level
/// (a cycle made only of cells) also collapses to `null`.
fn to_json(
    value: &Value,
    level: usize,
    max_depth: usize,
    on_path: &mut HashSet<(usize, usize)>,
) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::Number((*i).into()),
        Value::Float(x) => Number::from_f64(*x)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => {
            serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
        Value::Opaque(opaque) => serde_json::Value::String(opaque.type_name().to_string()),
        Value::Shared(shared) => {
            let key = (shared.id(), level);
            if !on_path.insert(key) {
                return serde_json::Value::Null;
            }
            let json = to_json(&shared.get(), level, max_depth, on_path);
            on_path.remove(&key);
            json
        }
        Value::Array(_) | Value::Record(_) if level >= max_depth => serde_json::Value::Null,
        Value::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|item| to_json(item, level + 1, max_depth, on_path))
                .collect(),
        ),
        Value::Record(record) => {
            let mut map = Map::new();
            for (key, item) in record {
                map.insert(key.clone(), to_json(item, level + 1, max_depth, on_path));
            }
            serde_json::Value::Object(map)
        }
    }
}

fn from_json(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => Value::Array(items.into_iter().map(from_json).collect()),
        serde_json::Value::Object(map) => {
            Value::Record(map.into_iter().map(|(k, v)| (k, from_json(v))).collect())
        }
    }
}

/// Depth-bounded JSON text round trip.
#[derive(Debug, Default)]
pub struct JsonMarshalStrategy;

impl CopyStrategy for JsonMarshalStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FastMarshal
    }

    fn fidelity(&self) -> Fidelity {
        Fidelity::Approximate
    }

    fn probe(&self, _ctx: &CopyContext<'_>) -> bool {
        true
    }

    fn attempt(&self, source: &Value, max_depth: usize) -> Result<Value, StrategyError> {
        let text = serde_json::to_string(&to_json(source, 0, max_depth, &mut HashSet::new()))
            .map_err(|e| StrategyError::Encode(e.to_string()))?;
        debug!(chars = text.len(), max_depth, "JSON marshal encoded");
        // The parser enforces its own nesting limit; overly deep copies fail here.
        let parsed: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| StrategyError::Decode(e.to_string()))?;
        Ok(from_json(parsed))
    }
}
