//! # formsync testkit
//!
//! Test utilities for formsync.
//!
//! This crate provides:
//! - [`MemoryBackend`], an in-memory versioned transport with scripted actions
//! - [`RecordingUi`] and [`ScriptedHost`], recording executor capabilities
//! - [`FormHarness`], a form wired to all of the above
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use formsync_testkit::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn action_sets_values() {
//!     let form = FormHarness::new("Order");
//!     form.open(json!({"name": "draft"}));
//!     form.respond("set-name", vec![json!({"values": {"name": "final"}})]);
//!     form.executor.on_click("apply", "set-name", None).await.unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod fixtures;
pub mod generators;
pub mod host;
pub mod logging;
pub mod ui;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::host::*;
    pub use crate::logging::*;
    pub use crate::ui::*;
}

pub use backend::*;
pub use fixtures::*;
pub use generators::*;
pub use host::*;
pub use logging::*;
pub use ui::*;
