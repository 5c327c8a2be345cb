use crate::errors::{AppError, AppResult};
use crate::models::{BoardNode, BoardRecord, FolderNode, SnippetNode, SnippetRecord, TreeNode};
use crate::snippet::{legacy_snippet, parse_text, snippet_from_value, SnippetFormat};
use crate::store::{FileStore, CUT_SNIPPETS_FOLDER};
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

type LevelFuture<'a> = Pin<Box<dyn Future<Output = Vec<TreeNode>> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq)]
pub enum StructuredDocument {
    Board(BoardRecord),
    Snippet(SnippetRecord),
    Legacy(SnippetRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Board,
    Snippet,
    Legacy,
}

// A board needs all four of `id`, `name`, `cards[]` and `tags[]`.
fn shape_of(value: &Value) -> Shape {
    let Some(object) = value.as_object() else {
        return Shape::Legacy;
    };
    let has_id = matches!(object.get("id"), Some(Value::String(_)) | Some(Value::Number(_)));
    let has_name = matches!(object.get("name"), Some(Value::String(_)));
    let has_cards = matches!(object.get("cards"), Some(Value::Array(_)));
    let has_tags = matches!(object.get("tags"), Some(Value::Array(_)));

    if has_id && has_name && has_cards && has_tags {
        Shape::Board
    } else if matches!(object.get("text"), Some(Value::String(_))) {
        Shape::Snippet
    } else {
        Shape::Legacy
    }
}

pub fn classify(value: Value, file_stem: &str) -> AppResult<StructuredDocument> {
    match shape_of(&value) {
        Shape::Board => board_from_value(value).map(StructuredDocument::Board),
        Shape::Snippet => snippet_from_value(&value).map(StructuredDocument::Snippet),
        Shape::Legacy => Ok(StructuredDocument::Legacy(legacy_snippet(&value, file_stem))),
    }
}

fn board_from_value(value: Value) -> AppResult<BoardRecord> {
    let Value::Object(mut object) = value else {
        return Err(AppError::Parse("board document must be an object".to_string()));
    };
    let id = match object.remove("id") {
        Some(Value::String(id)) => id,
        Some(Value::Number(id)) => id.to_string(),
        _ => return Err(AppError::Parse("board document has no id".to_string())),
    };
    let Some(Value::String(name)) = object.remove("name") else {
        return Err(AppError::Parse("board document has no name".to_string()));
    };
    let Some(Value::Array(cards)) = object.remove("cards") else {
        return Err(AppError::Parse("board document has no cards array".to_string()));
    };
    let Some(Value::Array(tags)) = object.remove("tags") else {
        return Err(AppError::Parse("board document has no tags array".to_string()));
    };
    let tags = tags
        .into_iter()
        .filter_map(|tag| match tag {
            Value::String(tag) => Some(tag),
            _ => None,
        })
        .collect();

    Ok(BoardRecord {
        id,
        name,
        cards,
        tags,
        extra: object,
    })
}

pub fn pin_cut_snippets(children: &mut Vec<TreeNode>) {
    let position = children
        .iter()
        .position(|node| node.is_folder_named(CUT_SNIPPETS_FOLDER));
    if let Some(index) = position.filter(|index| *index > 0) {
        let folder = children.remove(index);
        children.insert(0, folder);
    }
}

#[derive(Debug, Clone)]
pub struct TreeBuilder {
    store: FileStore,
}

impl TreeBuilder {
    pub fn new(store: FileStore) -> Self {
        Self { store }
    }

    // Only `root_dir` goes through the guard; below it entries keep their on-disk names.
    pub async fn build(&self, root_dir: &str) -> Vec<TreeNode> {
        match self.store.guard().validate(root_dir, None) {
            Ok(safe) => {
                self.build_level(safe.absolute().to_path_buf(), safe.relative().to_string())
                    .await
            }
            Err(rejection) => {
                tracing::warn!(path = %root_dir, reason = %rejection, "tree root rejected");
                Vec::new()
            }
        }
    }

    fn build_level(&self, absolute: PathBuf, dir: String) -> LevelFuture<'_> {
        Box::pin(async move {
            let entries = match self.store.list_resolved(&absolute).await {
                Ok(entries) => entries,
                Err(error) => {
                    tracing::warn!(path = %dir, error = %error, "directory listing failed; subtree left empty");
                    return Vec::new();
                }
            };

            let mut children = Vec::with_capacity(entries.len());
            for (entry, entry_path) in entries {
                // Hidden entries: in-flight temp files, the log directory.
                if entry.name.starts_with('.') {
                    continue;
                }
                let relative = join_relative(&dir, &entry.name);
                let outcome = if entry.is_directory {
                    Ok(Some(TreeNode::Folder(FolderNode {
                        children: self.build_level(entry_path, relative.clone()).await,
                        name: entry.name,
                        relative_path: relative.clone(),
                    })))
                } else if entry.is_file {
                    self.load_file(&entry.name, &entry_path, &relative).await
                } else {
                    Ok(None)
                };
                fold_outcome(&mut children, &relative, outcome);
            }

            pin_cut_snippets(&mut children);
            children
        })
    }

    async fn load_file(&self, name: &str, file: &Path, relative: &str) -> AppResult<Option<TreeNode>> {
        let Some(format) = SnippetFormat::from_path(name) else {
            return Ok(None);
        };
        let Some(content) = self.store.read_resolved(file).await? else {
            return Ok(None);
        };
        let stem = file_stem(name, format);

        let node = match format {
            SnippetFormat::Text => TreeNode::Snippet(SnippetNode {
                name: stem,
                relative_path: relative.to_string(),
                content: parse_text(&content),
            }),
            SnippetFormat::Json => {
                let value: Value = serde_json::from_str(&content)?;
                match classify(value, &stem)? {
                    StructuredDocument::Board(board) => TreeNode::Board(BoardNode {
                        name: stem,
                        relative_path: relative.to_string(),
                        tags: board.tags.iter().cloned().collect(),
                        content: board,
                    }),
                    StructuredDocument::Snippet(snippet) | StructuredDocument::Legacy(snippet) => {
                        TreeNode::Snippet(SnippetNode {
                            name: stem,
                            relative_path: relative.to_string(),
                            content: snippet,
                        })
                    }
                }
            }
        };
        Ok(Some(node))
    }
}

fn fold_outcome(children: &mut Vec<TreeNode>, relative: &str, outcome: AppResult<Option<TreeNode>>) {
    match outcome {
        Ok(Some(node)) => children.push(node),
        Ok(None) => {}
        Err(error) => {
            tracing::warn!(path = %relative, error = %error, "skipping malformed entry");
        }
    }
}

fn join_relative(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

fn file_stem(name: &str, format: SnippetFormat) -> String {
    let cut = name.len().saturating_sub(format.extension().len());
    name.get(..cut).unwrap_or(name).to_string()
}
