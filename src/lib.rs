//! Downloads, incrementally updates and locally persists bug records
//! (fields, comments, attachments, history) from a Bugzilla REST service.
//!
//! The entry point is [`BugSource`], which composes a [`BugzillaClient`]
//! with an append-only [`BugStore`].

pub mod bugzilla;
pub mod config;
pub mod source;
pub mod store;

pub use bugzilla::client::BugzillaClient;
pub use bugzilla::query::SearchQuery;
pub use bugzilla::types::BugRecord;
pub use config::Config;
pub use source::BugSource;
pub use store::BugStore;
