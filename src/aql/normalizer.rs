// =============================================================================
// Result Normalization
// =============================================================================
// Turns the raw cursor result into uniform rows.
//
// Shape rules:
//
// 1. A top-level element that is an array whose items are all objects is
//    spliced into the stream (e.g. `RETURN UNION(vertices, edges)`). Any other
//    array is kept whole as a scalar.
// 2. A record is an edge iff it is an object whose `_from` and `_to` are both
//    strings of the form `collection/key`.
// 3. If the stream contains at least one edge it is a graph stream: edges are
//    tagged `edge` and every other object `vertex`. A scalar in a graph stream
//    is an error.
// 4. Otherwise every element is a `document`; scalars are wrapped as
//    `{"value": <scalar>}`.

use crate::model::{Row, RowKind};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

/// Field name used when wrapping a scalar result element
pub const SCALAR_FIELD: &str = "value";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("graph result contains a non-record element at position {index}: {found}")]
    MixedScalar { index: usize, found: String },
}

/// Shape detected for a result stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Flat,
    Graph,
}

pub struct ResultNormalizer;

impl ResultNormalizer {
    pub fn normalize(raw: Vec<JsonValue>) -> Result<Vec<Row>, NormalizeError> {
        let elements = flatten(raw);
        let shape = detect_shape(&elements);

        elements
            .into_iter()
            .enumerate()
            .map(|(index, element)| match (shape, element) {
                (ResultShape::Graph, JsonValue::Object(fields)) => {
                    let kind = if is_edge(&fields) {
                        RowKind::Edge
                    } else {
                        RowKind::Vertex
                    };
                    Ok(Row { kind, fields })
                }
                (ResultShape::Graph, other) => Err(NormalizeError::MixedScalar {
                    index,
                    found: crate::aql::value::json_type_name(&other).to_string(),
                }),
                (ResultShape::Flat, JsonValue::Object(fields)) => Ok(Row {
                    kind: RowKind::Document,
                    fields,
                }),
                (ResultShape::Flat, scalar) => {
                    let mut fields = Map::with_capacity(1);
                    fields.insert(SCALAR_FIELD.to_string(), scalar);
                    Ok(Row {
                        kind: RowKind::Document,
                        fields,
                    })
                }
            })
            .collect()
    }
}

/// Classify an already flattened stream
pub fn detect_shape(elements: &[JsonValue]) -> ResultShape {
    let has_edge = elements
        .iter()
        .any(|e| e.as_object().map(is_edge).unwrap_or(false));
    if has_edge {
        ResultShape::Graph
    } else {
        ResultShape::Flat
    }
}

/// Structural edge test, see the module header
pub fn is_edge(record: &Map<String, JsonValue>) -> bool {
    let endpoint = |key: &str| {
        record
            .get(key)
            .and_then(JsonValue::as_str)
            .map(is_document_handle)
            .unwrap_or(false)
    };
    endpoint("_from") && endpoint("_to")
}

/// `collection/key` with both parts non-empty and exactly one slash
pub fn is_document_handle(handle: &str) -> bool {
    match handle.split_once('/') {
        Some((collection, key)) => {
            !collection.is_empty() && !key.is_empty() && !key.contains('/')
        }
        None => false,
    }
}

fn flatten(raw: Vec<JsonValue>) -> Vec<JsonValue> {
    let mut out = Vec::with_capacity(raw.len());
    for element in raw {
        match element {
            JsonValue::Array(items) if items.iter().all(JsonValue::is_object) => {
                out.extend(items);
            }
            other => out.push(other),
        }
    }
    out
}
