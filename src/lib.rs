// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # akh-disjoint
//!
//! Statistical inference of new disjointness facts over a concept taxonomy.
//!
//! Two pipelines share one evidence model (sample under the taxonomy,
//! aggregate into reliability statistics, decide whether to assert):
//!
//! - **Bubble-up** (`bubble`): generalize existing low-level disjoint facts
//!   to ancestor collections when enough of the children agree
//! - **Evidence mining** (`mining`): score how reliably an external relation
//!   predicts disjointness and assert its unknown pairs once it proves reliable
//!
//! Supporting pieces:
//!
//! - **Taxonomy facade** (`taxonomy`): the store trait plus an in-memory,
//!   petgraph-backed implementation and name resolution
//! - **Filters** (`similarity`, `abstractness`): gate statistical validity
//! - **Sampling** (`sampler`), **reliability** (`reliability`),
//!   **assertion** (`writer`), **worker pool** (`pool`)
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use akh_disjoint::bubble::BubbleUp;
//! use akh_disjoint::config::DisjointConfig;
//! use akh_disjoint::taxonomy::memory::MemoryTaxonomy;
//!
//! let tax = MemoryTaxonomy::load_json("taxonomy.json".as_ref()).unwrap();
//! let report = BubbleUp::new(Arc::new(tax), DisjointConfig::default())
//!     .unwrap()
//!     .run()
//!     .unwrap();
//! println!("asserted {} facts", report.asserted.len());
//! ```

pub mod abstractness;
pub mod bubble;
pub mod concept;
pub mod config;
pub mod error;
pub mod explored;
pub mod mining;
pub mod pool;
pub mod reliability;
pub mod sampler;
pub mod similarity;
pub mod taxonomy;
pub mod writer;
