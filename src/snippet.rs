use crate::errors::{AppError, AppResult};
use crate::models::{now_millis, SnippetRecord, DEFAULT_SNIPPET_VERSION};
use chrono::DateTime;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

const HEADER_DELIMITER: &str = "---";
const DERIVED_TITLE_CHARS: usize = 50;
const KNOWN_JSON_FIELDS: &[&str] = &[
    "id",
    "text",
    "tags",
    "created",
    "modified",
    "title",
    "description",
    "category",
    "version",
];
const LEGACY_TEXT_FIELDS: &[&str] = &["content", "body", "snippet", "value"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnippetFormat {
    Text,
    Json,
}

impl SnippetFormat {
    pub fn from_path(path: &str) -> Option<Self> {
        let lower = path.to_lowercase();
        if lower.ends_with(".txt") {
            Some(Self::Text)
        } else if lower.ends_with(".json") {
            Some(Self::Json)
        } else {
            None
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Text => ".txt",
            Self::Json => ".json",
        }
    }
}

pub fn parse(format: SnippetFormat, content: &str) -> AppResult<SnippetRecord> {
    match format {
        SnippetFormat::Text => Ok(parse_text(content)),
        SnippetFormat::Json => parse_json(content),
    }
}

pub fn encode(format: SnippetFormat, record: &SnippetRecord) -> AppResult<String> {
    match format {
        SnippetFormat::Text => Ok(encode_text(record)),
        SnippetFormat::Json => encode_json(record),
    }
}

pub fn parse_text(content: &str) -> SnippetRecord {
    let Some((header, body)) = split_header(content) else {
        return SnippetRecord::new(content);
    };

    let mut record = SnippetRecord::new(body.trim());
    let mut created = None;
    let mut modified = None;

    for line in header.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        match key {
            "" => {}
            "tags" => record.tags = split_tags(value),
            "created" => created = value.parse::<i64>().ok(),
            "modified" => modified = value.parse::<i64>().ok(),
            "title" => record.title = Some(value.to_string()),
            "id" => record.id = Some(value.to_string()),
            "description" => record.description = value.to_string(),
            "category" => record.category = value.to_string(),
            "version" => record.version = value.to_string(),
            other => {
                record
                    .attributes
                    .insert(other.to_string(), Value::String(value.to_string()));
            }
        }
    }

    record.created = created.unwrap_or_else(now_millis);
    record.modified = modified.unwrap_or(record.created);
    record
}

// The delimiter is the first line that is exactly `---` and ends in a newline.
fn split_header(content: &str) -> Option<(&str, &str)> {
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        let terminated = line
            .strip_suffix('\n')
            .map(|rest| rest.strip_suffix('\r').unwrap_or(rest));
        if terminated == Some(HEADER_DELIMITER) {
            return Some((&content[..offset], &content[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

fn split_tags(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(ToString::to_string)
        .collect()
}

pub fn encode_text(record: &SnippetRecord) -> String {
    let mut header = Vec::new();
    if let Some(title) = &record.title {
        header.push(format!("title: {}", single_line(title)));
    }
    let tags = record
        .tags
        .iter()
        .map(|tag| single_line(&tag.replace(',', " ")))
        .filter(|tag| !tag.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    header.push(format!("tags: {}", tags));
    header.push(format!("created: {}", record.created));
    header.push(format!("modified: {}", record.modified));
    if let Some(id) = &record.id {
        header.push(format!("id: {}", single_line(id)));
    }
    if !record.description.is_empty() {
        header.push(format!("description: {}", single_line(&record.description)));
    }
    if !record.category.is_empty() {
        header.push(format!("category: {}", single_line(&record.category)));
    }
    if record.version != DEFAULT_SNIPPET_VERSION {
        header.push(format!("version: {}", single_line(&record.version)));
    }
    for (key, value) in &record.attributes {
        let key = single_line(key);
        if key.is_empty() || key.contains(':') || KNOWN_JSON_FIELDS.contains(&key.as_str()) {
            continue;
        }
        let rendered = match value {
            Value::String(text) => single_line(text),
            other => other.to_string(),
        };
        header.push(format!("{}: {}", key, rendered));
    }

    format!("{}\n{}\n{}\n", header.join("\n"), HEADER_DELIMITER, record.text)
}

fn single_line(value: &str) -> String {
    value
        .split(['\r', '\n'])
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

pub fn parse_json(content: &str) -> AppResult<SnippetRecord> {
    let value: Value = serde_json::from_str(content)?;
    snippet_from_value(&value)
}

pub fn snippet_from_value(value: &Value) -> AppResult<SnippetRecord> {
    let Some(object) = value.as_object() else {
        return Err(AppError::Parse("snippet document must be an object".to_string()));
    };
    let Some(text) = object.get("text").and_then(Value::as_str) else {
        return Err(AppError::Parse("snippet document has no string 'text' field".to_string()));
    };

    let created = object.get("created").and_then(timestamp_millis);
    let modified = object.get("modified").and_then(timestamp_millis);
    let attributes = object
        .iter()
        .filter(|(key, _)| !KNOWN_JSON_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect::<BTreeMap<_, _>>();

    Ok(SnippetRecord {
        id: Some(
            string_field(object, "id").unwrap_or_else(|| Uuid::new_v4().to_string()),
        ),
        text: text.to_string(),
        tags: string_array(object.get("tags")),
        created: created.unwrap_or_else(now_millis),
        modified: modified.unwrap_or_else(now_millis),
        title: Some(string_field(object, "title").unwrap_or_else(|| derived_title(text))),
        description: string_field(object, "description").unwrap_or_default(),
        category: string_field(object, "category").unwrap_or_default(),
        version: string_field(object, "version").unwrap_or_else(|| DEFAULT_SNIPPET_VERSION.to_string()),
        attributes,
    })
}

pub fn legacy_snippet(value: &Value, title: &str) -> SnippetRecord {
    let mut record = SnippetRecord::new(String::new());
    record.title = Some(title.to_string());

    match value {
        Value::String(text) => record.text = text.clone(),
        Value::Object(object) => {
            let text_field = LEGACY_TEXT_FIELDS
                .iter()
                .find(|field| object.get(**field).map(Value::is_string).unwrap_or(false));
            record.text = match text_field {
                Some(field) => string_field(object, field).unwrap_or_default(),
                None => value.to_string(),
            };
            record.tags = string_array(object.get("tags"));
            record.attributes = object
                .iter()
                .filter(|(key, _)| Some(&key.as_str()) != text_field && key.as_str() != "tags")
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
        }
        other => record.text = other.to_string(),
    }

    record
}

pub fn encode_json(record: &SnippetRecord) -> AppResult<String> {
    let mut object = Map::new();
    for (key, value) in &record.attributes {
        if !KNOWN_JSON_FIELDS.contains(&key.as_str()) {
            object.insert(key.clone(), value.clone());
        }
    }
    let id = record
        .id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    object.insert("id".to_string(), Value::String(id));
    if let Some(title) = &record.title {
        object.insert("title".to_string(), Value::String(title.clone()));
    }
    object.insert("text".to_string(), Value::String(record.text.clone()));
    object.insert(
        "tags".to_string(),
        Value::Array(record.tags.iter().cloned().map(Value::String).collect()),
    );
    object.insert("description".to_string(), Value::String(record.description.clone()));
    object.insert("category".to_string(), Value::String(record.category.clone()));
    object.insert("version".to_string(), Value::String(record.version.clone()));
    object.insert("created".to_string(), Value::from(record.created));
    object.insert("modified".to_string(), Value::from(record.modified));

    Ok(serde_json::to_string_pretty(&Value::Object(object))?)
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(ToString::to_string)
}

fn string_array(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn timestamp_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64)),
        Value::String(text) => text.trim().parse::<i64>().ok().or_else(|| {
            DateTime::parse_from_rfc3339(text.trim())
                .ok()
                .map(|parsed| parsed.timestamp_millis())
        }),
        _ => None,
    }
}

fn derived_title(text: &str) -> String {
    text.chars().take(DERIVED_TITLE_CHARS).collect()
}
