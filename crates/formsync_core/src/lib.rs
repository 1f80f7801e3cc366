//! # formsync core
//!
//! Record synchronization primitives for business forms.
//!
//! This crate provides:
//! - [`RecordStore`], paged search and CRUD over one model with a page cache
//! - Structural record equality and minimal diffs
//! - [`RecordMerger`], recursive merging of partial update payloads
//! - The [`Transport`] trait through which all remote calls go
//!
//! ## Example
//!
//! ```rust,ignore
//! use formsync_core::{RecordStore, SearchOptions};
//!
//! let store = RecordStore::new("Contact", transport);
//! let result = store.search(SearchOptions::new().with_limit(20)).await?;
//! let saved = store.save(&result.records[0]).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod equality;
mod error;
mod feed;
mod identity;
mod merge;
mod store;
mod transport;
mod upload;

pub use config::StoreConfig;
pub use equality::{compact, diff, equals, parse_date, records_equal};
pub use error::{CoreError, CoreResult};
pub use feed::{EventFeed, StoreEvent, StoreNotification};
pub use identity::{strip_placeholders, PlaceholderIds};
pub use merge::{
    shadow_nested_versions, shadow_version, update_values, KnownVersions, MergeContext,
    NoKnownVersions, RecordMerger,
};
pub use store::{Page, RecordStore, SearchOptions, SearchResult, StoreMode};
pub use transport::{MockTransport, RecordedCall, Transport};
pub use upload::{outgoing, upload_marker, upload_request, ProgressFn, UploadControl};
