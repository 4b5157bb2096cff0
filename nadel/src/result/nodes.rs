use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::normalized::QueryPath;

/// A value of a service result and where it lives.
#[derive(Clone, Debug, PartialEq)]
pub struct JsonNode {
    pub path: Path,
    pub value: Value,
}

/// Addressable view over the result of one service call.
///
/// Nodes are looked up by [`QueryPath`]: lists are flattened (recording the index of every
/// element in the node path) and null values are skipped, so one query path can fan out to many
/// nodes.
#[derive(Debug)]
pub struct JsonNodes {
    data: Value,
    cache: Mutex<HashMap<QueryPath, Arc<Vec<JsonNode>>>>,
}

impl JsonNodes {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            cache: Default::default(),
        }
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub(crate) fn into_data(self) -> Value {
        self.data
    }

    /// Every non-null value found at `query_path`. The empty path yields the root object.
    pub fn get_nodes(&self, query_path: &QueryPath) -> Arc<Vec<JsonNode>> {
        if let Some(nodes) = self.cache.lock().get(query_path) {
            return nodes.clone();
        }

        let mut current = vec![(Path::empty(), &self.data)];
        for segment in query_path.segments() {
            let mut next = Vec::new();
            for (path, value) in current {
                if let Some(child) = value.as_object().and_then(|object| object.get(segment.as_str())) {
                    flatten(path.child(segment.as_str()), child, &mut next);
                }
            }
            current = next;
        }

        let nodes: Arc<Vec<JsonNode>> = Arc::new(
            current
                .into_iter()
                .filter(|(_, value)| !value.is_null())
                .map(|(path, value)| JsonNode {
                    path,
                    value: value.clone(),
                })
                .collect(),
        );
        self.cache.lock().insert(query_path.clone(), nodes.clone());
        nodes
    }
}

fn flatten<'a>(path: Path, value: &'a Value, out: &mut Vec<(Path, &'a Value)>) {
    match value {
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                flatten(path.child(index), item, out);
            }
        }
        Value::Null => {}
        value => out.push((path, value)),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn test_nodes_flatten_lists_and_skip_nulls() {
        let nodes = JsonNodes::new(json!({
            "board": {
                "edges": [
                    {"node": {"id": "1"}},
                    {"node": null},
                    [{"node": {"id": "3"}}],
                ]
            }
        }));
        let found = nodes.get_nodes(&QueryPath::from(["board", "edges", "node"].as_slice()));
        let paths: Vec<String> = found.iter().map(|node| node.path.to_string()).collect();
        assert_eq!(paths, vec!["/board/edges/0/node", "/board/edges/2/0/node"]);
        assert_eq!(found[1].value, json!({"id": "3"}));
    }

    #[test]
    fn test_root_and_missing_paths() {
        let nodes = JsonNodes::new(json!({"issue": null}));
        let root = nodes.get_nodes(&QueryPath::root());
        assert_eq!(root.len(), 1);
        assert!(root[0].path.is_empty());
        assert!(nodes
            .get_nodes(&QueryPath::from(["issue", "key"].as_slice()))
            .is_empty());
    }
}
