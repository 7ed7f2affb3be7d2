// =============================================================================
// Graph View
// =============================================================================
// Splits a normalized graph stream into vertices and edges and renders it as
// Cytoscape.js elements JSON.

use crate::model::{Row, RowKind};
use indexmap::IndexSet;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue, json};

/// Vertices and edges of a graph result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphView {
    pub vertices: Vec<Map<String, JsonValue>>,
    pub edges: Vec<Map<String, JsonValue>>,
}

impl GraphView {
    /// Build a view from normalized rows
    ///
    /// Document rows of a flat result become vertices of a graph without
    /// edges. Edge endpoints that were not returned as vertices are added as
    /// `{"_id": <handle>}` stubs, in the order they are first referenced.
    pub fn from_rows(rows: &[Row]) -> Self {
        let mut vertices = Vec::new();
        let mut edges = Vec::new();
        let mut known: IndexSet<String> = IndexSet::new();
        let mut needed: IndexSet<String> = IndexSet::new();

        for row in rows {
            match row.kind {
                RowKind::Edge => {
                    for key in ["_from", "_to"] {
                        if let Some(handle) = row.get(key).and_then(JsonValue::as_str) {
                            needed.insert(handle.to_string());
                        }
                    }
                    edges.push(row.fields.clone());
                }
                RowKind::Vertex | RowKind::Document => {
                    if let Some(id) = row.get("_id").and_then(JsonValue::as_str) {
                        known.insert(id.to_string());
                    }
                    vertices.push(row.fields.clone());
                }
            }
        }

        for id in needed.difference(&known) {
            let mut stub = Map::new();
            stub.insert("_id".to_string(), JsonValue::String(id.clone()));
            vertices.push(stub);
        }

        Self { vertices, edges }
    }

    /// Render as Cytoscape.js network JSON
    ///
    /// System attributes (leading `_`) are dropped apart from the handles that
    /// become `id`, `source` and `target`. A vertex's `name` defaults to its
    /// handle. Vertices without `_id` are skipped.
    pub fn to_cytoscape(&self, network_name: &str) -> JsonValue {
        let nodes: Vec<JsonValue> = self
            .vertices
            .iter()
            .filter_map(|vertex| {
                let id = vertex.get("_id")?.clone();
                let mut data = Map::new();
                data.insert("name".to_string(), id.clone());
                data.extend(user_attributes(vertex));
                data.insert("id".to_string(), id);
                Some(json!({ "data": data }))
            })
            .collect();

        let edges: Vec<JsonValue> = self
            .edges
            .iter()
            .enumerate()
            .map(|(index, edge)| {
                let id = edge
                    .get("_key")
                    .or_else(|| edge.get("_id"))
                    .cloned()
                    .unwrap_or_else(|| JsonValue::String(format!("e{index}")));
                let mut data = user_attributes(edge);
                data.insert("id".to_string(), id);
                data.insert(
                    "source".to_string(),
                    edge.get("_from").cloned().unwrap_or(JsonValue::Null),
                );
                data.insert(
                    "target".to_string(),
                    edge.get("_to").cloned().unwrap_or(JsonValue::Null),
                );
                json!({ "data": data })
            })
            .collect();

        json!({
            "format_version": "1.0",
            "generated_by": env!("CARGO_PKG_NAME"),
            "target_cytoscapejs_version": "~3.0",
            "data": { "shared_name": network_name, "name": network_name },
            "elements": { "nodes": nodes, "edges": edges },
        })
    }
}

fn user_attributes(record: &Map<String, JsonValue>) -> Map<String, JsonValue> {
    record
        .iter()
        .filter(|(k, _)| !k.starts_with('_'))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
