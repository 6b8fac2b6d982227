//! Structured filter queries against the bug search endpoint.

use chrono::NaiveDate;

/// Products included in ranged downloads.
pub const DEFAULT_PRODUCTS: &[&str] = &[
  "Add-on SDK",
  "Android Background Services",
  "Core",
  "External Software Affecting Firefox",
  "Firefox",
  "Firefox for Android",
  // "Firefox for iOS",
  "Firefox Graveyard",
  "Firefox Health Report",
  // "Focus",
  // "Hello (Loop)",
  "NSPR",
  "NSS",
  "Toolkit",
];

/// Page size used by ranged downloads. A page shorter than this signals
/// the last page.
pub const PAGE_LIMIT: usize = 500;

/// A filter query over the bug search endpoint.
///
/// Conditions are expressed as numbered field/operator/value triples
/// (`f1`/`o1`/`v1`, ...). The `bug_id greaterthan` bound always occupies
/// slot 1 so it can be advanced between pages; the remaining conditions
/// are numbered from 2 in insertion order.
#[derive(Debug, Clone)]
pub struct SearchQuery {
  products: Vec<String>,
  limit: usize,
  order: String,
  id_above: u64,
  conditions: Vec<Condition>,
}

#[derive(Debug, Clone)]
struct Condition {
  field: &'static str,
  operator: &'static str,
  value: Option<String>,
}

impl SearchQuery {
  pub fn new<S: AsRef<str>>(products: &[S]) -> Self {
    Self {
      products: products.iter().map(|p| p.as_ref().to_string()).collect(),
      limit: PAGE_LIMIT,
      order: "bug_id".to_string(),
      id_above: 0,
      conditions: Vec::new(),
    }
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = limit;
    self
  }

  /// Creation timestamp strictly after `date`.
  pub fn created_after(mut self, date: NaiveDate) -> Self {
    self.push("creation_ts", "greaterthan", Some(format_date(date)));
    self
  }

  /// Creation timestamp strictly before `date`.
  pub fn created_before(mut self, date: NaiveDate) -> Self {
    self.push("creation_ts", "lessthan", Some(format_date(date)));
    self
  }

  /// Last-resolved timestamp strictly before `date`.
  pub fn last_resolved_before(mut self, date: NaiveDate) -> Self {
    self.push("cf_last_resolved", "lessthan", Some(format_date(date)));
    self
  }

  /// Only bugs with no security group, i.e. publicly visible ones.
  pub fn exclude_security_groups(mut self) -> Self {
    self.push("bug_group", "isempty", None);
    self
  }

  /// Advance the exclusive lower bound on bug id. Called between pages
  /// with the maximum id seen so far.
  pub fn id_above(&mut self, bound: u64) {
    self.id_above = bound;
  }

  pub fn page_limit(&self) -> usize {
    self.limit
  }

  fn push(&mut self, field: &'static str, operator: &'static str, value: Option<String>) {
    self.conditions.push(Condition {
      field,
      operator,
      value,
    });
  }

  /// Serialize to URL query pairs in the order the endpoint expects.
  pub fn to_params(&self) -> Vec<(String, String)> {
    let mut params = vec![
      ("limit".to_string(), self.limit.to_string()),
      ("order".to_string(), self.order.clone()),
    ];

    for product in &self.products {
      params.push(("product".to_string(), product.clone()));
    }

    params.push(("f1".to_string(), "bug_id".to_string()));
    params.push(("o1".to_string(), "greaterthan".to_string()));
    params.push(("v1".to_string(), self.id_above.to_string()));

    for (i, condition) in self.conditions.iter().enumerate() {
      let n = i + 2;
      params.push((format!("f{n}"), condition.field.to_string()));
      params.push((format!("o{n}"), condition.operator.to_string()));
      if let Some(value) = &condition.value {
        params.push((format!("v{n}"), value.clone()));
      }
    }

    params
  }
}

fn format_date(date: NaiveDate) -> String {
  date.format("%Y-%m-%d").to_string()
}
