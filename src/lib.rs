#![deny(unused, dead_code)]
#![deny(clippy::all, clippy::pedantic)]
// Module naming: common pattern in domain-driven code
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::too_many_lines)]
// Documentation style: many terms don't need backticks
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// API ergonomics: prefer simplicity over must_use annotations
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
// Format strings: allow non-inlined for readability
#![allow(clippy::uninlined_format_args)]
// Numeric casts: sizes and shares are computed in f64
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_lossless)]
// Control flow style
#![allow(clippy::items_after_statements)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::single_match_else)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::if_not_else)]
#![allow(clippy::match_wildcard_for_single_variants)]
#![allow(clippy::semicolon_if_nothing_returned)]
#![allow(clippy::default_trait_access)]
// Passing style
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::trivially_copy_pass_by_ref)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::unused_self)]
// Option/Result patterns
#![allow(clippy::option_if_let_else)]
#![allow(clippy::map_unwrap_or)]
// Closure style
#![allow(clippy::redundant_closure_for_method_calls)]
// Explicit type bounds
#![allow(clippy::significant_drop_tightening)]
// Error handling style
#![allow(clippy::result_large_err)]
#![allow(clippy::unnecessary_wraps)]
// Async trait methods that may not await
#![allow(clippy::unused_async)]

//! Broker controller - keeps a message broker's addresses in line with a
//! desired address list and republishes its statistics.
//!
//! # Module Organization
//!
//! ## Core
//! - `core::config` - Configuration parsing and validation
//!
//! ## Model
//! - `model::address` - Desired addresses and resolved address settings
//! - `model::broker` - Broker-side topology as reported by management
//!
//! ## Management
//! - `management` - Broker management trait and error taxonomy
//! - `management::jolokia` - Jolokia/HTTP management client
//!
//! ## Control Plane
//! - `control` - Controller lifecycle facade and events
//! - `control::reconcile` - Address reconciliation engine
//! - `control::settings` - Address settings resolution
//! - `control::stats` - Statistics collection and aggregation
//!
//! ## Operations
//! - `ops::telemetry` - Tracing initialization
//!
//! ## CLI
//! - `cli` - Command-line entrypoints

// Core infrastructure
pub mod core;

// Domain model
pub mod model;

// Broker management
pub mod management;

// Control plane
pub mod control;

// Operations
pub mod ops;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::config;
pub use control::{BrokerController, ControllerError, ControllerEvent, ControllerState};
pub use ops::telemetry;
