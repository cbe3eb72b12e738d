//! Query composition and streaming export engine for an amplicon sequencing
//! dataset: samples, their contextual attributes and the OTU observations made
//! in them.
//!
//! The crate is organized around a few pieces:
//!
//! * [`schema`] holds the read-only catalog of contextual attributes, the
//!   rank hierarchy and every ontology vocabulary.
//! * [`taxonomy`] resolves cascading rank options against the OTU population
//!   of one amplicon.
//! * [`filter`] compiles loosely structured filter specifications into typed
//!   predicate terms, accumulating per-term errors.
//! * [`compose`] combines a taxonomy path and contextual filters into a
//!   fingerprinted matching population with lazy, paged materializations.
//! * [`cache`] memoizes option lists and materialized result sets under
//!   fingerprint-derived keys, degrading to recomputation on any failure.
//! * [`store`] executes the actual SQL against SQLite behind the [`store::RowSource`]
//!   trait.
//! * [`export`] streams the three bundle formats through a chunk sink, and
//!   [`interface`] runs them on worker threads with backpressure and
//!   cancellation.
//! * [`engine`] is the facade wiring it all together.

pub mod cache;
pub mod compose;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod filter;
pub mod interface;
pub mod schema;
pub mod store;
pub mod taxonomy;
