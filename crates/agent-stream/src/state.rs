//! Agent state kept in sync through snapshots and JSON-Patch style deltas.
//!
//! Only `add`, `replace` and `remove` over object keys are applied. Array
//! indices are not interpreted: a path that crosses an array is skipped.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::PatchError;

/// One patch operation as sent in a `STATE_DELTA` event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: Value },
    Replace { path: String, value: Value },
    Remove { path: String },
    Move { from: String, path: String },
    Copy { from: String, path: String },
    Test { path: String, value: Value },
}

impl PatchOp {
    pub fn from_value(value: &Value) -> Result<Self, PatchError> {
        Self::deserialize(value).map_err(|e| PatchError::Malformed(e.to_string()))
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. }
            | Self::Replace { path, .. }
            | Self::Remove { path }
            | Self::Move { path, .. }
            | Self::Copy { path, .. }
            | Self::Test { path, .. } => path,
        }
    }
}

/// Outcome of applying one delta.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaReport {
    pub applied: usize,
    /// Operations that were skipped, by position in the delta.
    pub skipped: Vec<(usize, PatchError)>,
}

/// Holds the latest agent state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSynchronizer {
    state: Option<Value>,
}

impl StateSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Option<&Value> {
        self.state.as_ref()
    }

    pub fn clear(&mut self) {
        self.state = None;
    }

    /// Replaces the state wholesale.
    pub fn apply_snapshot(&mut self, state: Value) {
        self.state = Some(state);
    }

    /// Applies raw patch operations in order.
    ///
    /// Each operation that cannot be applied is skipped with a diagnostic;
    /// the remaining operations still run. The new state is built on a copy
    /// and swapped in at the end.
    pub fn apply_delta(&mut self, ops: &[Value]) -> DeltaReport {
        let mut doc = self
            .state
            .clone()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let mut report = DeltaReport::default();
        for (idx, raw) in ops.iter().enumerate() {
            let result = PatchOp::from_value(raw).and_then(|op| apply_op(&mut doc, &op));
            match result {
                Ok(()) => report.applied += 1,
                Err(err) => {
                    warn!(index = idx, error = %err, "skipping state patch operation");
                    report.skipped.push((idx, err));
                }
            }
        }
        self.state = Some(doc);
        report
    }
}

/// Applies a single operation to `doc`.
pub fn apply_op(doc: &mut Value, op: &PatchOp) -> Result<(), PatchError> {
    match op {
        PatchOp::Add { path, value } | PatchOp::Replace { path, value } => {
            let segments = parse_pointer(path)?;
            let Some((last, parents)) = segments.split_last() else {
                *doc = value.clone();
                return Ok(());
            };
            let target = walk_creating(doc, parents, path)?;
            target.insert(last.clone(), value.clone());
            Ok(())
        }
        PatchOp::Remove { path } => {
            let segments = parse_pointer(path)?;
            let Some((last, parents)) = segments.split_last() else {
                return Err(PatchError::RemoveRoot);
            };
            let mut current = &mut *doc;
            for seg in parents {
                match current.get_mut(seg.as_str()) {
                    Some(next) => current = next,
                    None => {
                        debug!(path = %path, "remove target already absent");
                        return Ok(());
                    }
                }
            }
            match current {
                Value::Object(map) => {
                    map.remove(last);
                    Ok(())
                }
                _ => Err(PatchError::NotAnObject { path: path.clone() }),
            }
        }
        PatchOp::Move { path, .. } => Err(PatchError::Unsupported {
            op: "move",
            path: path.clone(),
        }),
        PatchOp::Copy { path, .. } => Err(PatchError::Unsupported {
            op: "copy",
            path: path.clone(),
        }),
        PatchOp::Test { path, .. } => Err(PatchError::Unsupported {
            op: "test",
            path: path.clone(),
        }),
    }
}

fn walk_creating<'a>(
    doc: &'a mut Value,
    segments: &[String],
    path: &str,
) -> Result<&'a mut Map<String, Value>, PatchError> {
    let mut current = doc;
    for seg in segments {
        let Value::Object(map) = current else {
            return Err(PatchError::NotAnObject {
                path: path.to_string(),
            });
        };
        current = map
            .entry(seg.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    match current {
        Value::Object(map) => Ok(map),
        _ => Err(PatchError::NotAnObject {
            path: path.to_string(),
        }),
    }
}

/// Splits an RFC 6901 pointer into unescaped object keys.
fn parse_pointer(path: &str) -> Result<Vec<String>, PatchError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err(PatchError::InvalidPath(path.to_string()));
    };
    Ok(rest
        .split('/')
        .map(|seg| seg.replace("~1", "/").replace("~0", "~"))
        .collect())
}
