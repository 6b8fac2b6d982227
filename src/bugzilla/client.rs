//! Bugzilla REST API client.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

use super::query::SearchQuery;
use super::types::{
  value_to_id, BugRecord, ATTACHMENT_INCLUDE_FIELDS, COMMENT_INCLUDE_FIELDS,
};

/// Header carrying the static API credential.
const API_KEY_HEADER: &str = "Bugzilla-API-Key";

/// Ids per request when fetching explicit id lists. The service rejects
/// overly long URLs, so id lists are sent in chunks.
const ID_CHUNK_SIZE: usize = 100;

/// Bugzilla REST client. One instance per base URL and credential;
/// no global state is involved.
#[derive(Debug, Clone)]
pub struct BugzillaClient {
  http: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl BugzillaClient {
  pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
    let base_url = Url::parse(base_url)
      .map_err(|e| eyre!("Invalid Bugzilla URL {}: {}", base_url, e))?;

    Ok(Self {
      http: reqwest::Client::new(),
      base_url,
      token,
    })
  }

  /// Fetch the field-metadata document and return its `fields` array.
  pub async fn get_fields(&self) -> Result<Vec<Value>> {
    let body = self.get_json("/rest/field/bug", &[]).await?;

    match body.get("fields") {
      Some(Value::Array(fields)) => Ok(fields.clone()),
      _ => Err(eyre!("Field response is missing the `fields` array")),
    }
  }

  /// Run a structured search, returning one page of bug payloads.
  pub async fn search_bugs(&self, query: &SearchQuery) -> Result<Vec<BugRecord>> {
    let body = self.get_json("/rest/bug", &query.to_params()).await?;
    parse_bug_array(&body)
  }

  /// Fetch full bug payloads for an explicit id list.
  pub async fn get_bugs(&self, ids: &[u64]) -> Result<Vec<BugRecord>> {
    let mut bugs = Vec::new();

    for chunk in ids.chunks(ID_CHUNK_SIZE) {
      let params = vec![("id".to_string(), join_ids(chunk))];
      let body = self.get_json("/rest/bug", &params).await?;
      bugs.extend(parse_bug_array(&body)?);
    }

    Ok(bugs)
  }

  /// Fetch comments for the given ids, keyed by bug id. Each comment is
  /// restricted server-side to the allow-listed fields.
  pub async fn get_comments(&self, ids: &[u64]) -> Result<BTreeMap<u64, Vec<Value>>> {
    let mut out = BTreeMap::new();

    for chunk in ids.chunks(ID_CHUNK_SIZE) {
      let endpoint = format!("/rest/bug/{}/comment", chunk[0]);
      let params = vec![
        ("ids".to_string(), join_ids(chunk)),
        (
          "include_fields".to_string(),
          COMMENT_INCLUDE_FIELDS.join(","),
        ),
      ];
      let body = self.get_json(&endpoint, &params).await?;

      // {"bugs": {"<id>": {"comments": [...]}, ...}}
      let bugs = body
        .get("bugs")
        .and_then(Value::as_object)
        .ok_or_else(|| eyre!("Comment response is missing the `bugs` object"))?;

      for (key, entry) in bugs {
        let id: u64 = key
          .parse()
          .map_err(|_| eyre!("Non-numeric bug id in comment response: {}", key))?;
        let comments = entry
          .get("comments")
          .and_then(Value::as_array)
          .cloned()
          .unwrap_or_default();
        out.insert(id, comments);
      }
    }

    Ok(out)
  }

  /// Fetch attachments for the given ids, keyed by bug id. Attachment
  /// payloads are restricted server-side to the allow-listed fields,
  /// which notably excludes the attachment data itself.
  pub async fn get_attachments(&self, ids: &[u64]) -> Result<BTreeMap<u64, Vec<Value>>> {
    let mut out = BTreeMap::new();

    for chunk in ids.chunks(ID_CHUNK_SIZE) {
      let endpoint = format!("/rest/bug/{}/attachment", chunk[0]);
      let params = vec![
        ("ids".to_string(), join_ids(chunk)),
        (
          "include_fields".to_string(),
          ATTACHMENT_INCLUDE_FIELDS.join(","),
        ),
      ];
      let body = self.get_json(&endpoint, &params).await?;

      // {"bugs": {"<id>": [...], ...}}
      let bugs = body
        .get("bugs")
        .and_then(Value::as_object)
        .ok_or_else(|| eyre!("Attachment response is missing the `bugs` object"))?;

      for (key, entry) in bugs {
        let id: u64 = key
          .parse()
          .map_err(|_| eyre!("Non-numeric bug id in attachment response: {}", key))?;
        let attachments = entry.as_array().cloned().unwrap_or_default();
        out.insert(id, attachments);
      }
    }

    Ok(out)
  }

  /// Fetch edit history for the given ids, keyed by bug id. History
  /// events are carried verbatim.
  pub async fn get_history(&self, ids: &[u64]) -> Result<BTreeMap<u64, Vec<Value>>> {
    let mut out = BTreeMap::new();

    for chunk in ids.chunks(ID_CHUNK_SIZE) {
      let endpoint = format!("/rest/bug/{}/history", chunk[0]);
      let params = vec![("ids".to_string(), join_ids(chunk))];
      let body = self.get_json(&endpoint, &params).await?;

      // {"bugs": [{"id": <id>, "history": [...]}, ...]}
      let bugs = body
        .get("bugs")
        .and_then(Value::as_array)
        .ok_or_else(|| eyre!("History response is missing the `bugs` array"))?;

      for entry in bugs {
        let id = entry
          .get("id")
          .and_then(value_to_id)
          .ok_or_else(|| eyre!("History entry without a bug id"))?;
        let history = entry
          .get("history")
          .and_then(Value::as_array)
          .cloned()
          .unwrap_or_default();
        out.insert(id, history);
      }
    }

    Ok(out)
  }

  async fn get_json(&self, path: &str, params: &[(String, String)]) -> Result<Value> {
    let mut url = self
      .base_url
      .join(path)
      .map_err(|e| eyre!("Invalid endpoint {}: {}", path, e))?;

    if !params.is_empty() {
      url
        .query_pairs_mut()
        .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }

    let mut request = self.http.get(url);
    if let Some(token) = &self.token {
      request = request.header(API_KEY_HEADER, token);
    }

    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", path, e))?
      .error_for_status()
      .map_err(|e| eyre!("Request to {} failed: {}", path, e))?;

    response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse response from {}: {}", path, e))
  }
}

fn parse_bug_array(body: &Value) -> Result<Vec<BugRecord>> {
  let bugs = body
    .get("bugs")
    .and_then(Value::as_array)
    .ok_or_else(|| eyre!("Bug response is missing the `bugs` array"))?;

  Ok(
    bugs
      .iter()
      .filter_map(|bug| match bug {
        Value::Object(map) => Some(BugRecord::from_fields(map.clone())),
        _ => None,
      })
      .collect(),
  )
}

fn join_ids(ids: &[u64]) -> String {
  ids
    .iter()
    .map(|id| id.to_string())
    .collect::<Vec<_>>()
    .join(",")
}
