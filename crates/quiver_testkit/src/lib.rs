//! # QuiverDB Testkit
//!
//! Test utilities for QuiverDB.
//!
//! This crate provides:
//! - Fixtures for databases and namespaces
//! - Property-based generators for WAL records and items
//! - Concurrent stress runners for copy-on-write commits
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quiver_testkit::prelude::*;
//!
//! #[test]
//! fn counts_items() {
//!     with_items_namespace(|ns, ctx| {
//!         ns.upsert(&mut item(1), ctx).unwrap();
//!         assert_eq!(ns.items_count(ctx).unwrap(), 1);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
