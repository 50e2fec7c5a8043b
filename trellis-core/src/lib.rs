//! Trellis Core
//!
//! This crate provides the control-flow engine of the Trellis templating
//! runtime. It implements:
//!
//! - A virtual node tree with selector queries and deferred deletion
//! - Conditional, repetition and projection directives
//! - Incremental reconciliation of directive payloads against rendered trees
//! - A registry of rendered instances, one per data-context id
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `tree`: Virtual tree, selectors and markup
//! - `directive`: Directive descriptors and payload resolution
//! - `graph`: Directive dependency graph and evaluation order
//! - `flow`: Initialization and incremental update engine
//! - `registry`: Templates and per-instance state
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use trellis_core::directive::{Directive, DirectiveSet, PayloadTable, Uid};
//! use trellis_core::registry::Template;
//!
//! let directives = DirectiveSet::from_directives([
//!     Directive::conditional("span", "visible").unwrap(),
//!     Directive::repetition("b", "items").unwrap(),
//! ])
//! .unwrap();
//! let template = Template::parse("<div><span><b></b></span></div>", directives).unwrap();
//!
//! let payloads = PayloadTable::new();
//! let uid = Uid::from("row-1");
//! payloads.set(&uid, "visible", json!(false));
//! payloads.set(&uid, "items", json!([]));
//!
//! let mut instance = template.instantiate(uid.clone(), &payloads).unwrap();
//! assert_eq!(instance.render(), "<div></div>");
//!
//! // Reveal the span, then fill it
//! payloads.set(&uid, "visible", json!(true));
//! payloads.set(&uid, "items", json!([1, 2]));
//! instance.update_conditional("span", &payloads).unwrap();
//! instance.update_repetition("b", &payloads).unwrap();
//! assert_eq!(instance.render(), "<div><span><b></b><b></b></span></div>");
//! ```

pub mod config;
pub mod directive;
pub mod error;
pub mod flow;
pub mod graph;
pub mod registry;
pub mod tree;

pub use config::{ConfigError, FlowConfig};
pub use error::{FlowError, FlowResult};
pub use registry::{FlowInstance, FlowRegistry, Template};
