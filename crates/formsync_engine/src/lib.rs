//! # formsync engine
//!
//! Runs the action chains of a business form and applies the directives
//! the server answers with.
//!
//! An [`ActionExecutor`] owns the live record of one form. Event handlers
//! hand it comma-separated chains such as `"sync,check-credit,save"`;
//! reserved steps run locally and every other step is posted to the server
//! as a remote action. Each response is split into directive sets which the
//! [`ResponseInterpreter`] applies in a fixed category order, driving the
//! [`UiEffectSink`] and [`FormHost`] capabilities.
//!
//! ## Example
//!
//! ```rust,ignore
//! use formsync_engine::ActionExecutor;
//!
//! let executor = ActionExecutor::new(store, ui, host);
//! executor.load(record);
//! executor.on_change("customer", "sync,action-order-set-customer").await?;
//! executor.on_click("confirm", "action-order-confirm,save", None).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod chain;
mod config;
mod effects;
mod error;
mod executor;
mod form;
mod interpreter;
mod tracker;

pub use chain::{ActionChain, ChainStep};
pub use config::EngineConfig;
pub use effects::{Dismissal, Download, FieldError, FormHost, TargetState, UiEffectSink};
pub use error::{ChainError, ChainResult};
pub use executor::{ActionExecutor, ActionOptions, ChainOutcome, ChainState};
pub use form::FormState;
pub use interpreter::{Flow, ResponseInterpreter};
pub use tracker::{ChainGuard, ChainTracker};
