//! Binary graph snapshot for trusted, in-process values.
//!
//! The snapshot stores every shared cell once in a slot table and refers to
//! it by index, so aliasing and cycles survive the round trip at any depth.
//! Decoding an attacker-controlled stream is out of the question, which is why
//! [`TrustedBinaryStrategy::probe`] refuses anything not marked `Trusted`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use super::strategy::{
    CopyContext, CopyStrategy, Fidelity, SourceTrust, StrategyError, StrategyKind,
};
use crate::value::{SharedValue, Value};

#[derive(Debug, Serialize, Deserialize)]
enum Node {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<Node>),
    Record(Vec<(String, Node)>),
    Slot(u32),
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    slots: Vec<Option<Node>>,
    root: Node,
}

struct SnapshotBuilder {
    slots: Vec<Option<Node>>,
    slot_of: HashMap<usize, u32>,
}

impl SnapshotBuilder {
    fn node(&mut self, value: &Value) -> Result<Node, StrategyError> {
        Ok(match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(*b),
            Value::Int(i) => Node::Int(*i),
            Value::Float(x) => Node::Float(*x),
            Value::String(s) => Node::Str(s.clone()),
            Value::Bytes(b) => Node::Bytes(b.clone()),
            Value::Array(items) => Node::Array(
                items
                    .iter()
                    .map(|item| self.node(item))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Record(record) => Node::Record(
                record
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.node(v)?)))
                    .collect::<Result<_, StrategyError>>()?,
            ),
            Value::Shared(shared) => {
                if let Some(slot) = self.slot_of.get(&shared.id()) {
                    return Ok(Node::Slot(*slot));
                }
                let slot = u32::try_from(self.slots.len())
                    .map_err(|_| StrategyError::Encode("too many shared cells".to_string()))?;
                self.slot_of.insert(shared.id(), slot);
                self.slots.push(None);
                let inner = self.node(&shared.get())?;
                self.slots[slot as usize] = Some(inner);
                Node::Slot(slot)
            }
            Value::Opaque(opaque) => {
                return Err(StrategyError::NotSerializable(opaque.type_name().to_string()))
            }
        })
    }
}

fn restore(node: Node, cells: &[SharedValue]) -> Result<Value, StrategyError> {
    Ok(match node {
        Node::Null => Value::Null,
        Node::Bool(b) => Value::Bool(b),
        Node::Int(i) => Value::Int(i),
        Node::Float(x) => Value::Float(x),
        Node::Str(s) => Value::String(s),
        Node::Bytes(b) => Value::Bytes(b),
        Node::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| restore(item, cells))
                .collect::<Result<_, _>>()?,
        ),
        Node::Record(entries) => Value::Record(
            entries
                .into_iter()
                .map(|(k, v)| Ok((k, restore(v, cells)?)))
                .collect::<Result<_, StrategyError>>()?,
        ),
        Node::Slot(slot) => Value::Shared(
            cells
                .get(slot as usize)
                .cloned()
                .ok_or_else(|| StrategyError::Decode(format!("dangling slot {slot}")))?,
        ),
    })
}

pub(crate) fn encode(value: &Value) -> Result<Vec<u8>, StrategyError> {
    let mut builder = SnapshotBuilder {
        slots: Vec::new(),
        slot_of: HashMap::new(),
    };
    let root = builder.node(value)?;
    let snapshot = Snapshot {
        slots: builder.slots,
        root,
    };
    bincode::serde::encode_to_vec(&snapshot, bincode::config::standard())
        .map_err(|e: bincode::error::EncodeError| StrategyError::Encode(e.to_string()))
}

pub(crate) fn decode(bytes: &[u8]) -> Result<Value, StrategyError> {
    let (snapshot, _): (Snapshot, usize) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e: bincode::error::DecodeError| StrategyError::Decode(e.to_string()))?;

    // Cells exist before their contents so slots can point at each other.
    let cells: Vec<SharedValue> = (0..snapshot.slots.len())
        .map(|_| SharedValue::new(Value::Null))
        .collect();
    for (cell, node) in cells.iter().zip(snapshot.slots) {
        let node = node.ok_or_else(|| StrategyError::Decode("unfilled slot".to_string()))?;
        cell.set(restore(node, &cells)?);
    }
    restore(snapshot.root, &cells)
}

/// Exact copy through an in-memory binary snapshot. Never touches disk.
#[derive(Debug, Default)]
pub struct TrustedBinaryStrategy;

impl CopyStrategy for TrustedBinaryStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TrustedBinarySerialization
    }

    fn fidelity(&self) -> Fidelity {
        Fidelity::Exact
    }

    fn probe(&self, ctx: &CopyContext<'_>) -> bool {
        if ctx.trust != SourceTrust::Trusted {
            debug!("Source not marked trusted, binary snapshot not attempted");
            return false;
        }
        ctx.source.is_serializable()
    }

    fn depth_bounded(&self) -> bool {
        false
    }

    fn attempt(&self, source: &Value, _max_depth: usize) -> Result<Value, StrategyError> {
        let bytes = encode(source)?;
        debug!(bytes = bytes.len(), "Binary snapshot encoded");
        decode(&bytes)
    }
}
