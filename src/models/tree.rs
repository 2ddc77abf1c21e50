use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A value recovered from a generated JSON block.
///
/// Scalars are kept as text so traversal code only has to distinguish
/// leaves, lists and nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeValue {
    Leaf(String),
    List(Vec<TreeValue>),
    Node(BTreeMap<String, TreeValue>),
}

impl TreeValue {
    pub fn as_leaf(&self) -> Option<&str> {
        match self {
            TreeValue::Leaf(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&BTreeMap<String, TreeValue>> {
        match self {
            TreeValue::Node(map) => Some(map),
            _ => None,
        }
    }

    /// Number of leaves below (and including) this value
    pub fn leaf_count(&self) -> usize {
        match self {
            TreeValue::Leaf(_) => 1,
            TreeValue::List(items) => items.iter().map(TreeValue::leaf_count).sum(),
            TreeValue::Node(map) => map.values().map(TreeValue::leaf_count).sum(),
        }
    }

    /// Nesting depth; a leaf has depth 1
    pub fn depth(&self) -> usize {
        match self {
            TreeValue::Leaf(_) => 1,
            TreeValue::List(items) => 1 + items.iter().map(TreeValue::depth).max().unwrap_or(0),
            TreeValue::Node(map) => 1 + map.values().map(TreeValue::depth).max().unwrap_or(0),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            TreeValue::Leaf(s) => Value::String(s.clone()),
            TreeValue::List(items) => Value::Array(items.iter().map(TreeValue::to_json).collect()),
            TreeValue::Node(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for TreeValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => TreeValue::Leaf(String::new()),
            Value::Bool(b) => TreeValue::Leaf(b.to_string()),
            Value::Number(n) => TreeValue::Leaf(n.to_string()),
            Value::String(s) => TreeValue::Leaf(s),
            Value::Array(items) => TreeValue::List(items.into_iter().map(TreeValue::from).collect()),
            Value::Object(map) => {
                TreeValue::Node(map.into_iter().map(|(k, v)| (k, TreeValue::from(v))).collect())
            }
        }
    }
}

/// Section key (lowercased) to the structure parsed from its build block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FusedTree {
    pub sections: BTreeMap<String, TreeValue>,
}

impl FusedTree {
    pub fn get(&self, key: &str) -> Option<&TreeValue> {
        self.sections.get(key)
    }

    pub fn insert(&mut self, key: String, value: TreeValue) {
        self.sections.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Render back into the `### key` block format produced by the build stage
    pub fn to_blocks(&self) -> String {
        self.sections
            .iter()
            .map(|(key, value)| {
                let json = serde_json::to_string_pretty(&value.to_json()).unwrap_or_default();
                format!("### {key}\n```json\n{json}\n```")
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_from_value_keeps_shape() {
        let value = TreeValue::from(json!({
            "claim": "x",
            "evidence": ["a", 2, null],
            "nested": {"ok": true}
        }));

        let node = value.as_node().unwrap();
        assert_eq!(node["claim"].as_leaf(), Some("x"));
        assert_eq!(
            node["evidence"],
            TreeValue::List(vec![
                TreeValue::Leaf("a".into()),
                TreeValue::Leaf("2".into()),
                TreeValue::Leaf(String::new()),
            ])
        );
        assert_eq!(node["nested"].as_node().unwrap()["ok"].as_leaf(), Some("true"));
        assert_eq!(value.leaf_count(), 5);
        assert_eq!(value.depth(), 3);
    }

    #[test]
    fn test_serde_round_trip_through_cache_format() {
        let mut tree = FusedTree::default();
        tree.insert(
            "method".into(),
            TreeValue::from(json!({"steps": ["collect", "analyze"]})),
        );
        let text = serde_json::to_string(&tree).unwrap();
        assert_eq!(text, r#"{"method":{"steps":["collect","analyze"]}}"#);
        let back: FusedTree = serde_json::from_str(&text).unwrap();
        assert_eq!(back, tree);
    }
}
