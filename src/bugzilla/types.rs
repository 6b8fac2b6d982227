//! Record types shared by the client, the merge step and the store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields kept from each comment payload.
pub const COMMENT_INCLUDE_FIELDS: &[&str] = &["id", "text", "author", "time"];

/// Fields kept from each attachment payload.
pub const ATTACHMENT_INCLUDE_FIELDS: &[&str] = &[
  "id",
  "is_obsolete",
  "flags",
  "is_patch",
  "creator",
  "content_type",
];

/// One bug record: the field map returned by the bug endpoint plus the
/// injected `comments`, `attachments` and `history` arrays.
///
/// The remote service owns the schema, so fields are carried verbatim as
/// JSON values rather than being mapped onto a struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BugRecord {
  fields: Map<String, Value>,
}

impl BugRecord {
  pub fn new() -> Self {
    Self { fields: Map::new() }
  }

  pub fn from_fields(fields: Map<String, Value>) -> Self {
    Self { fields }
  }

  /// Bug id, normalized to an integer. The service reports ids as numbers
  /// in most payloads but as strings in a few callback-style responses.
  pub fn id(&self) -> Option<u64> {
    self.fields.get("id").and_then(value_to_id)
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.fields.get(key)
  }

  pub fn insert(&mut self, key: impl Into<String>, value: Value) {
    self.fields.insert(key.into(), value);
  }

  /// Merge every key/value pair from `other` into this record,
  /// last write wins per key.
  pub fn merge_fields(&mut self, other: Map<String, Value>) {
    for (k, v) in other {
      self.fields.insert(k, v);
    }
  }

  pub fn set_comments(&mut self, comments: Vec<Value>) {
    self.fields.insert("comments".into(), Value::Array(comments));
  }

  pub fn set_attachments(&mut self, attachments: Vec<Value>) {
    self.fields.insert("attachments".into(), Value::Array(attachments));
  }

  pub fn set_history(&mut self, history: Vec<Value>) {
    self.fields.insert("history".into(), Value::Array(history));
  }

  /// Whether the record carries no security groups. A missing `groups`
  /// field counts as empty.
  pub fn groups_empty(&self) -> bool {
    match self.fields.get("groups") {
      Some(Value::Array(groups)) => groups.is_empty(),
      _ => true,
    }
  }

  pub fn into_fields(self) -> Map<String, Value> {
    self.fields
  }

  pub fn fields(&self) -> &Map<String, Value> {
    &self.fields
  }
}

/// Normalize a JSON id value (number or numeric string) to an integer.
pub fn value_to_id(value: &Value) -> Option<u64> {
  match value {
    Value::Number(n) => n.as_u64(),
    Value::String(s) => s.parse().ok(),
    _ => None,
  }
}

/// Restrict each object in `items` to the allow-listed keys.
/// Non-object entries are passed through untouched.
pub fn filter_fields(items: Vec<Value>, allowed: &[&str]) -> Vec<Value> {
  items
    .into_iter()
    .map(|item| match item {
      Value::Object(map) => Value::Object(
        map
          .into_iter()
          .filter(|(k, _)| allowed.contains(&k.as_str()))
          .collect(),
      ),
      other => other,
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn record(value: Value) -> BugRecord {
    match value {
      Value::Object(map) => BugRecord::from_fields(map),
      _ => panic!("expected object"),
    }
  }

  #[test]
  fn test_id_from_number() {
    let bug = record(json!({"id": 1337}));
    assert_eq!(bug.id(), Some(1337));
  }

  #[test]
  fn test_id_from_string() {
    let bug = record(json!({"id": "1337"}));
    assert_eq!(bug.id(), Some(1337));
  }

  #[test]
  fn test_id_missing() {
    let bug = record(json!({"summary": "no id here"}));
    assert_eq!(bug.id(), None);
  }

  #[test]
  fn test_groups_empty_variants() {
    assert!(record(json!({"id": 1})).groups_empty());
    assert!(record(json!({"id": 1, "groups": []})).groups_empty());
    assert!(!record(json!({"id": 1, "groups": ["core-security"]})).groups_empty());
  }

  #[test]
  fn test_merge_fields_last_write_wins() {
    let mut bug = record(json!({"id": 1, "status": "NEW"}));
    let update = match json!({"status": "RESOLVED", "resolution": "FIXED"}) {
      Value::Object(map) => map,
      _ => unreachable!(),
    };
    bug.merge_fields(update);
    assert_eq!(bug.get("status"), Some(&json!("RESOLVED")));
    assert_eq!(bug.get("resolution"), Some(&json!("FIXED")));
    assert_eq!(bug.id(), Some(1));
  }

  #[test]
  fn test_filter_fields_strips_extras() {
    let comments = vec![json!({
      "id": 9,
      "text": "hello",
      "author": "a@example.com",
      "time": "2020-01-01T00:00:00Z",
      "raw_text": "should be dropped",
      "tags": ["x"],
    })];
    let filtered = filter_fields(comments, COMMENT_INCLUDE_FIELDS);
    assert_eq!(filtered.len(), 1);
    let keys: Vec<&String> = filtered[0].as_object().unwrap().keys().collect();
    assert_eq!(keys, ["author", "id", "text", "time"]);
  }

  #[test]
  fn test_filter_fields_keeps_non_objects() {
    let items = vec![json!("not an object")];
    let filtered = filter_fields(items, COMMENT_INCLUDE_FIELDS);
    assert_eq!(filtered, vec![json!("not an object")]);
  }
}
