// src/task/identity.rs

//! Stable task identity hashing.
//!
//! The identity is a blake3 digest over a canonical JSON encoding of the
//! analysis name, the ordered input identities and the parameters. Object
//! keys are re-inserted in sorted order at every nesting level, so two
//! parameter mappings with the same content collide regardless of how they
//! were built.

use blake3::Hasher;
use serde_json::{Map, Value, json};

use crate::task::{InputRef, Params, TaskId};

/// Bumped whenever the canonical encoding changes.
const IDENTITY_VERSION: u32 = 1;

pub fn task_identity(analysis: &str, inputs: &[InputRef], params: &Params) -> TaskId {
    let canonical_params: Map<String, Value> = params
        .iter()
        .map(|(k, v)| (k.clone(), canonicalize(v)))
        .collect();

    let encoded = json!({
        "v": IDENTITY_VERSION,
        "analysis": analysis,
        "inputs": inputs,
        "params": canonical_params,
    });

    let mut hasher = Hasher::new();
    // serde_json only fails on non-string map keys, which `Value` cannot hold.
    let bytes = serde_json::to_vec(&encoded).unwrap_or_default();
    hasher.update(&bytes);
    TaskId::from_hex(hasher.finalize().to_hex().to_string())
}

/// Rebuild `value` with every object's keys in sorted order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
