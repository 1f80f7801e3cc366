//! # formsync protocol
//!
//! Wire-level types shared by the formsync store and engine.
//!
//! This crate provides:
//! - [`Record`], the tagged plain/dynamic record model over JSON maps
//! - Reserved record keys and transient-key rules
//! - Search, fetch, save, remove and action request messages
//! - [`DirectiveSet`] and [`ActionResponse`] for server action responses
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod directive;
mod error;
mod messages;
mod record;

pub use directive::{
    merge_values, ActionResponse, Attachment, DirectiveKind, DirectiveSet, Message, Notify,
    ReportFormat, ViewDescriptor, REFRESH_APP, REFRESH_TAB,
};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ExportResult, PostRequest, PostResponse, ReadOptions, RecordKey, SearchFilter, SearchRequest,
    SearchResponse, UploadRequest,
};
pub use record::{id_of, is_transient_key, keys, version_of, Map, Record, Value};
