//! Dynamic row values.
//!
//! Rows arriving from tabular input are opaque records whose members can be
//! scalars, nested records, arrays, shared reference cells (which may alias or
//! form cycles) and runtime handles that have no serialized form.
//!
//! `Value::clone` is shallow for [`SharedValue`]: the clone aliases the same
//! cell. Use [`crate::copy::ObjectCopier`] when an independent copy is needed.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::{EnrichError, Result};

pub type Record = BTreeMap<String, Value>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Record(Record),
    Shared(SharedValue),
    Opaque(OpaqueValue),
}

/// Reference cell shared between several places in a value graph.
#[derive(Clone)]
pub struct SharedValue(Arc<RwLock<Value>>);

impl SharedValue {
    pub fn new(value: Value) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// Read the cell. Recursive reads are allowed so that traversals can
    /// re-enter a cell reached through a cycle.
    pub fn get(&self) -> parking_lot::RwLockReadGuard<'_, Value> {
        self.0.read_recursive()
    }

    pub fn set(&self, value: Value) {
        *self.0.write() = value;
    }

    /// Identity of the underlying cell, stable for the cell's lifetime.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &SharedValue) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Follow cells holding cells to the last one, whose content is something
    /// else. `None` when the chain loops back on itself.
    pub fn last_in_chain(&self) -> Option<SharedValue> {
        let mut seen = HashSet::new();
        let mut current = self.clone();
        loop {
            if !seen.insert(current.id()) {
                return None;
            }
            let next = match &*current.get() {
                Value::Shared(next) => Some(next.clone()),
                _ => None,
            };
            match next {
                Some(next) => current = next,
                None => return Some(current),
            }
        }
    }
}

impl fmt::Debug for SharedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shared(#{:x})", self.id())
    }
}

/// Handle to a runtime object with no serialized form (callbacks, sockets,
/// interpreter internals). Only its type name survives text encodings.
#[derive(Clone)]
pub struct OpaqueValue {
    type_name: String,
    handle: Arc<dyn Any + Send + Sync>,
}

impl OpaqueValue {
    pub fn new<T: Any + Send + Sync>(type_name: impl Into<String>, handle: T) -> Self {
        Self {
            type_name: type_name.into(),
            handle: Arc::new(handle),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.handle.downcast_ref::<T>()
    }
}

impl fmt::Debug for OpaqueValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({})", self.type_name)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Value::Array(items) => f.debug_list().entries(items).finish(),
            Value::Record(record) => f.debug_map().entries(record.iter()).finish(),
            Value::Shared(shared) => shared.fmt(f),
            Value::Opaque(opaque) => opaque.fmt(f),
        }
    }
}

impl Value {
    pub fn record<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Record(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn shared(value: Value) -> Self {
        Value::Shared(SharedValue::new(value))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
            Value::Shared(_) => "shared",
            Value::Opaque(opaque) => opaque.type_name(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(x) if x.fract() == 0.0 => Some(*x as i64),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Render a scalar as text, the way a tabular writer would.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(x) => Some(x.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Shared(shared) => {
                let cell = shared.last_in_chain()?;
                let text = cell.get().to_text();
                text
            }
            _ => None,
        }
    }

    /// Nesting depth: scalars are 0, a container is one more than its deepest
    /// member. Shared cells are transparent. Returns `None` for cyclic values.
    pub fn depth(&self) -> Option<usize> {
        fn walk(value: &Value, on_path: &mut HashSet<usize>) -> Option<usize> {
            match value {
                Value::Array(items) => {
                    let mut deepest = 0;
                    for item in items {
                        deepest = deepest.max(walk(item, on_path)?);
                    }
                    Some(deepest + 1)
                }
                Value::Record(record) => {
                    let mut deepest = 0;
                    for item in record.values() {
                        deepest = deepest.max(walk(item, on_path)?);
                    }
                    Some(deepest + 1)
                }
                Value::Shared(shared) => {
                    if !on_path.insert(shared.id()) {
                        return None;
                    }
                    let depth = walk(&shared.get(), on_path);
                    on_path.remove(&shared.id());
                    depth
                }
                _ => Some(0),
            }
        }
        walk(self, &mut HashSet::new())
    }

    /// Whether the value is marked serializable for the binary snapshot path.
    ///
    /// Arrays are judged by their first non-null element; empty and all-null
    /// arrays are vacuously serializable. Opaque handles are not.
    pub fn is_serializable(&self) -> bool {
        fn check(value: &Value, seen: &mut HashSet<usize>) -> bool {
            match value {
                Value::Opaque(_) => false,
                Value::Array(items) => items
                    .iter()
                    .find(|item| !item.is_null())
                    .map_or(true, |first| check(first, seen)),
                Value::Shared(shared) => {
                    if !seen.insert(shared.id()) {
                        return true;
                    }
                    check(&shared.get(), seen)
                }
                _ => true,
            }
        }
        check(self, &mut HashSet::new())
    }

    /// Structural equality that follows shared cells and treats a pair of
    /// cells already under comparison as equal, so cyclic graphs terminate.
    pub fn structurally_eq(&self, other: &Value) -> bool {
        fn eq(a: &Value, b: &Value, assumed: &mut HashSet<(usize, usize)>) -> bool {
            match (a, b) {
                (Value::Shared(x), Value::Shared(y)) => {
                    if x.ptr_eq(y) || !assumed.insert((x.id(), y.id())) {
                        return true;
                    }
                    eq(&x.get(), &y.get(), assumed)
                }
                (Value::Shared(x), other) | (other, Value::Shared(x)) => {
                    // A loop of bare cells holds no value to compare.
                    let Some(cell) = x.last_in_chain() else {
                        return false;
                    };
                    if !assumed.insert((cell.id(), other as *const Value as usize)) {
                        return true;
                    }
                    let inner = cell.get();
                    eq(&inner, other, assumed)
                }
                (Value::Null, Value::Null) => true,
                (Value::Bool(x), Value::Bool(y)) => x == y,
                (Value::Int(x), Value::Int(y)) => x == y,
                (Value::Float(x), Value::Float(y)) => x == y || (x.is_nan() && y.is_nan()),
                (Value::String(x), Value::String(y)) => x == y,
                (Value::Bytes(x), Value::Bytes(y)) => x == y,
                (Value::Array(xs), Value::Array(ys)) => {
                    xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| eq(x, y, assumed))
                }
                (Value::Record(xs), Value::Record(ys)) => {
                    xs.len() == ys.len()
                        && xs
                            .iter()
                            .zip(ys)
                            .all(|((kx, vx), (ky, vy))| kx == ky && eq(vx, vy, assumed))
                }
                (Value::Opaque(x), Value::Opaque(y)) => Arc::ptr_eq(&x.handle, &y.handle),
                _ => false,
            }
        }
        eq(self, other, &mut HashSet::new())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.structurally_eq(other)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<f32>> for Value {
    fn from(vector: Vec<f32>) -> Self {
        Value::Array(vector.into_iter().map(|x| Value::Float(x as f64)).collect())
    }
}

/// Read a field of a row record. Shared cells wrapping the record are followed.
pub fn get_field(record: &Value, field: &str) -> Option<Value> {
    match record {
        Value::Record(map) => map.get(field).cloned(),
        Value::Shared(shared) => {
            let cell = shared.last_in_chain()?;
            let field = get_field(&cell.get(), field);
            field
        }
        _ => None,
    }
}

/// Return the record with `field` set to `value`.
pub fn set_field(record: Value, field: &str, value: Value) -> Result<Value> {
    match record {
        Value::Record(mut map) => {
            map.insert(field.to_string(), value);
            Ok(Value::Record(map))
        }
        Value::Shared(shared) => {
            let cell = shared.last_in_chain().ok_or_else(|| {
                EnrichError::InvalidArgument(format!(
                    "cannot set field '{}' on cells that only hold each other",
                    field
                ))
            })?;
            let inner = cell.get().clone();
            let updated = set_field(inner, field, value)?;
            cell.set(updated);
            Ok(Value::Shared(shared))
        }
        other => Err(EnrichError::InvalidArgument(format!(
            "cannot set field '{}' on a {} value",
            field,
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_counts_container_levels() {
        assert_eq!(Value::Int(1).depth(), Some(0));
        assert_eq!(Value::Array(vec![]).depth(), Some(1));
        let nested = Value::record([
            ("a", Value::Int(1)),
            ("b", Value::record([("c", Value::Int(2))])),
        ]);
        assert_eq!(nested.depth(), Some(2));
    }

    #[test]
    fn depth_of_cycle_is_none() {
        let cell = SharedValue::new(Value::Null);
        cell.set(Value::record([("me", Value::Shared(cell.clone()))]));
        assert_eq!(Value::Shared(cell).depth(), None);
    }

    #[test]
    fn serializable_checks_first_non_null_array_element() {
        let opaque = Value::Opaque(OpaqueValue::new("Callback", 7u8));
        assert!(!opaque.is_serializable());
        assert!(Value::Array(vec![]).is_serializable());
        assert!(Value::Array(vec![Value::Null, Value::Null]).is_serializable());
        assert!(!Value::Array(vec![Value::Null, opaque.clone()]).is_serializable());
        assert!(Value::Array(vec![Value::Int(1), opaque]).is_serializable());
    }

    #[test]
    fn cyclic_values_compare_without_looping() {
        let build = || {
            let cell = SharedValue::new(Value::Null);
            cell.set(Value::record([
                ("name", Value::from("node")),
                ("next", Value::Shared(cell.clone())),
            ]));
            Value::Shared(cell)
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn clone_aliases_shared_cells() {
        let original = Value::shared(Value::record([("n", Value::Int(1))]));
        let alias = original.clone();
        let updated = set_field(alias, "n", Value::Int(2)).unwrap();
        assert_eq!(get_field(&original, "n"), Some(Value::Int(2)));
        assert_eq!(get_field(&updated, "n"), Some(Value::Int(2)));
    }

    #[test]
    fn cell_cycles_without_a_record_terminate() {
        let cell = SharedValue::new(Value::Null);
        cell.set(Value::Shared(cell.clone()));
        let looped = Value::Shared(cell.clone());

        assert_eq!(looped.to_text(), None);
        assert_eq!(get_field(&looped, "text"), None);
        assert_eq!(looped.depth(), None);
        assert!(looped.structurally_eq(&looped.clone()));
        assert!(!looped.structurally_eq(&Value::Int(1)));
        assert!(matches!(
            set_field(looped, "x", Value::Null),
            Err(EnrichError::InvalidArgument(_))
        ));

        let a = SharedValue::new(Value::Null);
        let b = SharedValue::new(Value::Shared(a.clone()));
        a.set(Value::Shared(b));
        assert_eq!(Value::Shared(a).to_text(), None);
    }

    #[test]
    fn chained_cells_reach_the_record() {
        let record = SharedValue::new(Value::record([("text", Value::from("lifetimes"))]));
        let outer = Value::shared(Value::Shared(record.clone()));
        assert_eq!(get_field(&outer, "text"), Some(Value::from("lifetimes")));

        set_field(outer, "topic", Value::from("memory")).unwrap();
        assert_eq!(
            get_field(&Value::Shared(record), "topic"),
            Some(Value::from("memory"))
        );
    }

    #[test]
    fn set_field_rejects_scalars() {
        let err = set_field(Value::Int(3), "x", Value::Null).unwrap_err();
        assert!(matches!(err, EnrichError::InvalidArgument(_)));
    }
}
