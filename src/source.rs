//! BugSource: orchestration over the REST client and the local store.
//!
//! One logical fetch is four independent requests (bug fields, comments,
//! attachments, history) joined by bug id into a single record per bug.

use chrono::NaiveDate;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::bugzilla::client::BugzillaClient;
use crate::bugzilla::query::{SearchQuery, DEFAULT_PRODUCTS};
use crate::bugzilla::types::{
  filter_fields, BugRecord, ATTACHMENT_INCLUDE_FIELDS, COMMENT_INCLUDE_FIELDS,
};
use crate::config::Config;
use crate::store::BugStore;

/// Canonical remote snapshot backing the local store.
pub const BUGS_SNAPSHOT_URL: &str = "https://www.dropbox.com/s/xm6wzac9jl81irz/bugs.json.xz?dl=1";

const BUGS_DB_FILE: &str = "bugs.db";
const FIELDS_CACHE_FILE: &str = "bug_fields.json";

/// Downloads bug records and persists them in an append-only local store.
pub struct BugSource {
  client: BugzillaClient,
  store: BugStore,
  data_dir: PathBuf,
  products: Vec<String>,
}

impl BugSource {
  /// Open a source from configuration, reading the API key from the
  /// environment when present.
  pub fn new(config: &Config) -> Result<Self> {
    let token = Config::get_api_token().ok();
    Self::with_token(config, token)
  }

  /// Open a source from configuration with an explicit credential.
  pub fn with_token(config: &Config, token: Option<String>) -> Result<Self> {
    let client = BugzillaClient::new(&config.bugzilla.url, token)?;
    let store = BugStore::open(&config.data_dir.join(BUGS_DB_FILE), BUGS_SNAPSHOT_URL)?;

    let products = config
      .products
      .clone()
      .unwrap_or_else(|| DEFAULT_PRODUCTS.iter().map(|p| p.to_string()).collect());

    Ok(Self {
      client,
      store,
      data_dir: config.data_dir.clone(),
      products,
    })
  }

  /// Build a source from already-constructed parts.
  pub fn from_parts(client: BugzillaClient, store: BugStore, data_dir: impl Into<PathBuf>) -> Self {
    Self {
      client,
      store,
      data_dir: data_dir.into(),
      products: DEFAULT_PRODUCTS.iter().map(|p| p.to_string()).collect(),
    }
  }

  pub fn store(&self) -> &BugStore {
    &self.store
  }

  /// Field metadata for the bug schema, cached on local disk.
  ///
  /// The cache file is returned verbatim when readable; any read or parse
  /// failure counts as a miss and triggers a remote fetch, whose result is
  /// written back so the next call is served locally.
  pub async fn get_bug_fields(&self) -> Result<Vec<Value>> {
    fs::create_dir_all(&self.data_dir)
      .map_err(|e| eyre!("Failed to create data directory: {}", e))?;

    let cache_path = self.data_dir.join(FIELDS_CACHE_FILE);
    if let Some(fields) = read_fields_cache(&cache_path) {
      return Ok(fields);
    }

    let fields = self.client.get_fields().await?;

    let serialized =
      serde_json::to_vec(&fields).map_err(|e| eyre!("Failed to serialize fields: {}", e))?;
    fs::write(&cache_path, serialized)
      .map_err(|e| eyre!("Failed to write field cache {}: {}", cache_path.display(), e))?;

    Ok(fields)
  }

  /// All records currently in the local store, in insertion order.
  pub fn get_bugs(&self) -> Result<Vec<BugRecord>> {
    self.store.read()
  }

  /// Download all bugs created strictly between the two dates (and resolved
  /// before `date_to`), appending each page to the store as it arrives so
  /// partial progress survives a failed later page.
  ///
  /// Pages by advancing the exclusive bug-id lower bound to the maximum id
  /// seen so far; a page shorter than the page limit ends the loop. Bugs
  /// carrying security groups are skipped unless `security` is set.
  pub async fn download_bugs_between(
    &self,
    date_from: NaiveDate,
    date_to: NaiveDate,
    security: bool,
  ) -> Result<()> {
    let mut query = SearchQuery::new(&self.products)
      .created_after(date_from)
      .created_before(date_to)
      .last_resolved_before(date_to);
    if !security {
      query = query.exclude_security_groups();
    }

    let mut last_id = 0;
    loop {
      query.id_above(last_id);
      let bugs = self.fetch_by_query(&query).await?;

      if let Some(max_id) = bugs.keys().next_back() {
        last_id = last_id.max(*max_id);
      }
      debug!(last_id, page_len = bugs.len(), "Fetched page");

      self.store.append(bugs.values().cloned())?;

      if bugs.len() < query.page_limit() {
        break;
      }
    }

    Ok(())
  }

  /// Return records for exactly the requested ids, drawn from the local
  /// store plus freshly fetched remote records.
  ///
  /// Stored records are never re-fetched. Unless `security` is set, fetched
  /// records with a non-empty `groups` field are dropped from both the
  /// result and the store. Yields stored records first (in store order),
  /// then new ones (in ascending id order).
  pub async fn download_bugs(
    &self,
    bug_ids: &[u64],
    security: bool,
  ) -> Result<impl Iterator<Item = BugRecord>> {
    let mut pending: BTreeSet<u64> = bug_ids.iter().copied().collect();

    let mut stored_count = 0usize;
    let mut old_bugs = Vec::new();
    for bug in self.store.read()? {
      stored_count += 1;
      if let Some(id) = bug.id() {
        if pending.remove(&id) {
          old_bugs.push(bug);
        }
      }
    }

    info!(loaded = stored_count, "Loaded bugs");
    info!(to_download = pending.len(), "To download bugs");

    let to_fetch: Vec<u64> = pending.into_iter().collect();
    let mut new_bugs = self.fetch_by_ids(&to_fetch).await?;

    if !security {
      new_bugs.retain(|_, bug| bug.groups_empty());
    }

    info!(
      total = stored_count + new_bugs.len(),
      "Total number of bugs"
    );

    if !new_bugs.is_empty() {
      self.store.append(new_bugs.values().cloned())?;
    }

    Ok(old_bugs.into_iter().chain(new_bugs.into_values()))
  }

  /// Fetch and merge the four record streams for an explicit id list.
  async fn fetch_by_ids(&self, ids: &[u64]) -> Result<BTreeMap<u64, BugRecord>> {
    if ids.is_empty() {
      return Ok(BTreeMap::new());
    }

    let (bugs, comments, attachments, history) = futures::try_join!(
      self.client.get_bugs(ids),
      self.client.get_comments(ids),
      self.client.get_attachments(ids),
      self.client.get_history(ids),
    )?;

    Ok(merge_page(bugs, comments, attachments, history))
  }

  /// Fetch one page of a search query, then the three per-bug streams for
  /// the ids that page returned, merged into one record per id.
  async fn fetch_by_query(&self, query: &SearchQuery) -> Result<BTreeMap<u64, BugRecord>> {
    let bugs = self.client.search_bugs(query).await?;
    let ids: Vec<u64> = bugs.iter().filter_map(BugRecord::id).collect();

    let (comments, attachments, history) = futures::try_join!(
      self.client.get_comments(&ids),
      self.client.get_attachments(&ids),
      self.client.get_history(&ids),
    )?;

    Ok(merge_page(bugs, comments, attachments, history))
  }
}

/// Join the four per-bug response streams into one record per id.
///
/// Bug payload keys merge last-write-wins; comments and attachments are
/// restricted to their allow-lists; history is carried verbatim. An empty
/// record is created on first sight of an id from any stream.
fn merge_page(
  bugs: Vec<BugRecord>,
  comments: BTreeMap<u64, Vec<Value>>,
  attachments: BTreeMap<u64, Vec<Value>>,
  history: BTreeMap<u64, Vec<Value>>,
) -> BTreeMap<u64, BugRecord> {
  let mut merged: BTreeMap<u64, BugRecord> = BTreeMap::new();

  for bug in bugs {
    let Some(id) = bug.id() else {
      debug!("Dropping bug payload without an id");
      continue;
    };
    merged.entry(id).or_default().merge_fields(bug.into_fields());
  }

  for (id, list) in comments {
    merged
      .entry(id)
      .or_default()
      .set_comments(filter_fields(list, COMMENT_INCLUDE_FIELDS));
  }

  for (id, list) in attachments {
    merged
      .entry(id)
      .or_default()
      .set_attachments(filter_fields(list, ATTACHMENT_INCLUDE_FIELDS));
  }

  for (id, list) in history {
    merged.entry(id).or_default().set_history(list);
  }

  merged
}

fn read_fields_cache(path: &Path) -> Option<Vec<Value>> {
  let contents = fs::read(path).ok()?;
  serde_json::from_slice(&contents).ok()
}
