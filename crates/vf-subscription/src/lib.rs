//! Screen rule subscriptions
//!
//! A subscription is a JSON5 document of per-app and global rule groups.
//! [`SubscriptionLoader`] fetches it (with an on-disk cache and stale
//! fallback) or reads it from a local file, and [`parse_document`] turns it
//! into a flat list of [`Rule`]s with compiled selectors.

mod error;
mod loader;
mod parse;
mod rule;

pub use error::{SubscriptionError, SubscriptionResult};
pub use loader::{
    cache_file_name, Fetch, HttpFetcher, OfflineFetcher, SubscriptionLoader, SubscriptionSource,
};
pub use parse::parse_document;
pub use rule::{ResetMatch, Rule};
