use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_SNIPPET_VERSION: &str = "1.0";

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn default_version() -> String {
    DEFAULT_SNIPPET_VERSION.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnippetRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "now_millis")]
    pub created: i64,
    #[serde(default = "now_millis")]
    pub modified: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
}

impl SnippetRecord {
    pub fn new(text: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: None,
            text: text.into(),
            tags: Vec::new(),
            created: now,
            modified: now,
            title: None,
            description: String::new(),
            category: String::new(),
            version: default_version(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn same_content(&self, other: &SnippetRecord) -> bool {
        self.text == other.text && self.tags == other.tags && self.title == other.title
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardRecord {
    pub id: String,
    pub name: String,
    pub cards: Vec<Value>,
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderNode {
    pub name: String,
    pub relative_path: String,
    pub children: Vec<TreeNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnippetNode {
    pub name: String,
    pub relative_path: String,
    pub content: SnippetRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardNode {
    pub name: String,
    pub relative_path: String,
    pub content: BoardRecord,
    pub tags: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TreeNode {
    Folder(FolderNode),
    Snippet(SnippetNode),
    Board(BoardNode),
}

impl TreeNode {
    pub fn name(&self) -> &str {
        match self {
            Self::Folder(node) => &node.name,
            Self::Snippet(node) => &node.name,
            Self::Board(node) => &node.name,
        }
    }

    pub fn relative_path(&self) -> &str {
        match self {
            Self::Folder(node) => &node.relative_path,
            Self::Snippet(node) => &node.relative_path,
            Self::Board(node) => &node.relative_path,
        }
    }

    pub fn is_folder_named(&self, name: &str) -> bool {
        matches!(self, Self::Folder(node) if node.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryInfo {
    pub name: String,
    pub is_directory: bool,
    pub is_file: bool,
    pub size: u64,
    pub modified: Option<i64>,
    pub created: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatInfo {
    pub is_file: bool,
    pub is_directory: bool,
    pub size: u64,
    pub mtime: i64,
    pub ctime: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RmOptions {
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialData {
    pub sidebar_tree: Vec<TreeNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BooleanResponse {
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tree_nodes_serialize_with_type_tag() {
        let node = TreeNode::Folder(FolderNode {
            name: "Cut Snippets".to_string(),
            relative_path: "snippets/Cut Snippets".to_string(),
            children: Vec::new(),
        });
        let value = serde_json::to_value(&node).expect("serialize");
        assert_eq!(value["type"], "folder");
        assert_eq!(value["relativePath"], "snippets/Cut Snippets");
    }

    #[test]
    fn board_record_keeps_unknown_fields() {
        let board: BoardRecord = serde_json::from_value(json!({
            "id": "b1",
            "name": "Plot",
            "cards": [{"x": 1}],
            "tags": ["draft"],
            "zoom": 1.5
        }))
        .expect("board");
        assert_eq!(board.extra.get("zoom"), Some(&json!(1.5)));
        let back = serde_json::to_value(&board).expect("serialize");
        assert_eq!(back["zoom"], json!(1.5));
    }

    #[test]
    fn same_content_ignores_timestamps() {
        let mut a = SnippetRecord::new("hello");
        let mut b = a.clone();
        b.created += 10;
        b.modified += 10;
        assert!(a.same_content(&b));
        a.tags.push("x".to_string());
        assert!(!a.same_content(&b));
    }
}
